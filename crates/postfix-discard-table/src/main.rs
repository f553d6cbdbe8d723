use clap::Parser;
use dmarc_dsn::config::DEFAULT_DATA_DIR;
use dmarc_dsn::logging::{DiagnosticFormat, LoggingConfig};
use dmarc_dsn::{DataDir, DiscardTableBuilder, MinAge};
use std::io::Write;
use std::path::PathBuf;

/// Postfix discard table builder for bounced DMARC reports.
///
/// Prints one postfix lookup table line for every report domain whose
/// log under `<data_dir>/domains` was last written at least MIN_AGE days
/// ago. Diagnostics go to stderr, the table goes to stdout.
#[derive(Debug, Parser)]
#[command(about)]
struct Opt {
    /// Directory maintained by dmarc-dsn-processor.
    #[arg(long, env = "DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Minimum age, in days, of a domain log before the domain is
    /// listed. Must be an integer between 0 and 90.
    #[arg(long, env = "MIN_AGE", default_value = "30")]
    min_age: String,

    /// Log field-level details. Setting $VERBOSE to any value
    /// has the same effect.
    #[arg(long, short)]
    verbose: bool,

    /// How diagnostic logs render.
    #[arg(long, default_value = "full")]
    diag_format: DiagnosticFormat,
}

fn main() -> anyhow::Result<()> {
    let opts = match Opt::try_parse() {
        Ok(opts) => opts,
        Err(err) if err.use_stderr() => {
            err.print()?;
            std::process::exit(1);
        }
        Err(err) => err.exit(),
    };

    LoggingConfig {
        filter_env_var: "DMARC_DSN_LOG",
        default_filter: "dmarc_dsn=info,postfix_discard_table=info",
        verbose_filter: "dmarc_dsn=debug,postfix_discard_table=debug",
        verbose: opts.verbose || LoggingConfig::verbose_from_env(),
        diag_format: opts.diag_format,
    }
    .init()?;

    // Validate before looking at any file
    let min_age: MinAge = opts.min_age.parse()?;
    let data_dir = DataDir::existing(&opts.data_dir)?;
    tracing::debug!("using {}, min_age={min_age}", data_dir.root().display());

    let entries = DiscardTableBuilder::new(data_dir.domains_dir(), min_age).build()?;

    let mut out = std::io::stdout().lock();
    for entry in entries {
        writeln!(out, "{entry}")?;
    }
    out.flush()?;

    Ok(())
}
