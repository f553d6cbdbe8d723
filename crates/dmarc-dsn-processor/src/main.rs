use anyhow::Context;
use clap::Parser;
use dmarc_dsn::config::{resolve_data_dir, DATA_DIR_ENV};
use dmarc_dsn::logging::{DiagnosticFormat, LoggingConfig};
use dmarc_dsn::{process, DataDir, Disposition, ProcessContext};
use std::io::Read;
use std::path::PathBuf;

/// DMARC report bounce processor.
///
/// Reads a single bounce message from stdin, typically piped in by the MTA,
/// and appends what it learns to `<data_dir>/domains/<report_domain>`.
/// Messages that cannot be classified are kept in `<data_dir>/saved/`.
#[derive(Debug, Parser)]
#[command(about)]
struct Opt {
    /// Queue id of the bounce; only used to name saved messages.
    queue_id: String,

    /// Envelope address extension encoding the report recipient,
    /// with `=` in place of `@`, eg: `dmarc=example.org`.
    extension: Option<String>,

    /// Directory holding the domain logs and saved messages.
    /// It must already exist and be writable.
    ///
    /// If omitted, $DATA_DIR is used, falling back to ./dmarc_dsn_processor
    data_dir: Option<PathBuf>,

    /// Log field-level details. Setting $VERBOSE to any value
    /// has the same effect.
    #[arg(long, short)]
    verbose: bool,

    /// How diagnostic logs render. full, compact and pretty are intended
    /// for human consumption.
    ///
    /// json outputs machine readable records.
    #[arg(long, default_value = "full")]
    diag_format: DiagnosticFormat,
}

fn main() -> anyhow::Result<()> {
    let opts = match Opt::try_parse() {
        Ok(opts) => opts,
        Err(err) if err.use_stderr() => {
            // Usage errors are configuration errors, and those exit with 1
            err.print()?;
            std::process::exit(1);
        }
        Err(err) => err.exit(),
    };

    LoggingConfig {
        filter_env_var: "DMARC_DSN_LOG",
        default_filter: "dmarc_dsn=info,dmarc_dsn_processor=info",
        verbose_filter: "dmarc_dsn=debug,dmarc_dsn_processor=debug",
        verbose: opts.verbose || LoggingConfig::verbose_from_env(),
        diag_format: opts.diag_format,
    }
    .init()?;

    let data_dir = DataDir::open(resolve_data_dir(
        opts.data_dir,
        std::env::var_os(DATA_DIR_ENV),
    ))?;

    let mut raw = vec![];
    std::io::stdin()
        .read_to_end(&mut raw)
        .context("reading message from stdin")?;

    let ctx = ProcessContext::new(opts.queue_id, opts.extension);
    match process(&ctx, &data_dir, &raw)? {
        Disposition::Written { domains } => {
            tracing::debug!("{}: recorded bounce for {}", ctx.queue_id, domains.join(", "));
        }
        Disposition::Saved { reason, path } => {
            tracing::debug!("{}: {reason}, kept in {}", ctx.queue_id, path.display());
        }
        Disposition::Delayed => {
            tracing::debug!("{}: delayed delivery notice ignored", ctx.queue_id);
        }
    }

    Ok(())
}
