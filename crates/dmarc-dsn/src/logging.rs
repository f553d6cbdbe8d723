use clap::ValueEnum;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Layer};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
#[clap(rename_all = "kebab_case")]
pub enum DiagnosticFormat {
    Pretty,
    #[default]
    Full,
    Compact,
    Json,
}

/// Diagnostics always go to stderr; stdout belongs to the discard table.
pub struct LoggingConfig<'a> {
    /// An env var holding an `EnvFilter` directive; when set it
    /// overrides the computed default filter
    pub filter_env_var: &'a str,
    /// The filter used when not verbose
    pub default_filter: &'a str,
    /// The filter used when verbose
    pub verbose_filter: &'a str,
    pub verbose: bool,
    pub diag_format: DiagnosticFormat,
}

impl<'a> LoggingConfig<'a> {
    /// The `VERBOSE` environment variable raises verbosity when it is
    /// present, regardless of its value
    pub fn verbose_from_env() -> bool {
        std::env::var_os(crate::config::VERBOSE_ENV).is_some()
    }

    pub fn filter(&self) -> &'a str {
        if self.verbose {
            self.verbose_filter
        } else {
            self.default_filter
        }
    }

    pub fn init(&self) -> anyhow::Result<()> {
        let layer = fmt::layer()
            .with_target(false)
            .with_writer(BoxMakeWriter::new(std::io::stderr));
        let layer = match self.diag_format {
            DiagnosticFormat::Pretty => layer.pretty().boxed(),
            DiagnosticFormat::Full => layer.boxed(),
            DiagnosticFormat::Compact => layer.compact().boxed(),
            DiagnosticFormat::Json => layer.json().boxed(),
        };

        let env_filter = EnvFilter::try_new(
            std::env::var(self.filter_env_var)
                .as_deref()
                .unwrap_or(self.filter()),
        )?;

        tracing_subscriber::registry()
            .with(layer.with_filter(env_filter))
            .try_init()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn verbose_selects_filter() {
        let mut config = LoggingConfig {
            filter_env_var: "DMARC_DSN_LOG",
            default_filter: "dmarc_dsn=info",
            verbose_filter: "dmarc_dsn=debug",
            verbose: false,
            diag_format: DiagnosticFormat::Full,
        };
        k9::assert_equal!(config.filter(), "dmarc_dsn=info");
        config.verbose = true;
        k9::assert_equal!(config.filter(), "dmarc_dsn=debug");
    }
}
