use std::ffi::OsString;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_DATA_DIR: &str = "./dmarc_dsn_processor";
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const MIN_AGE_ENV: &str = "MIN_AGE";
pub const VERBOSE_ENV: &str = "VERBOSE";

/// Problems that make it pointless to go any further.
/// These always cause the process to exit with status 1.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{} does not exist or is not a directory", .0.display())]
    DataDirMissing(PathBuf),
    #[error("{} must be writable", .0.display())]
    DataDirNotWritable(PathBuf),
    #[error("{} does not exist, check DATA_DIR", .0.display())]
    DomainsDirMissing(PathBuf),
    #[error("failed to create {}: {source:#}", dir.display())]
    CreateDir {
        dir: PathBuf,
        source: std::io::Error,
    },
    #[error("queue id '{0}' cannot be used as part of a file name")]
    InvalidQueueId(String),
    #[error("MIN_AGE is '{0}', but must be an integer")]
    MinAgeNotInteger(String),
    #[error("MIN_AGE is {0}, but must not be negative")]
    MinAgeNegative(i64),
    #[error("MIN_AGE is {0}, but must be at most {max}", max = MinAge::MAX)]
    MinAgeTooLarge(i64),
}

/// Minimum age, in days, of a domain log file before its domain
/// is listed in the discard table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MinAge(u32);

impl MinAge {
    pub const DEFAULT: MinAge = MinAge(30);
    /// Give the receiver a real chance to fix their issue
    pub const MAX: u32 = 90;

    pub fn days(&self) -> u32 {
        self.0
    }
}

impl Default for MinAge {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl FromStr for MinAge {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, ConfigError> {
        let days: i64 = s
            .trim()
            .parse()
            .map_err(|_| ConfigError::MinAgeNotInteger(s.to_string()))?;
        if days < 0 {
            return Err(ConfigError::MinAgeNegative(days));
        }
        if days > i64::from(Self::MAX) {
            return Err(ConfigError::MinAgeTooLarge(days));
        }
        Ok(Self(days as u32))
    }
}

impl std::fmt::Display for MinAge {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "{}", self.0)
    }
}

/// The command line wins over `DATA_DIR`, which wins over the default
pub fn resolve_data_dir(cli: Option<PathBuf>, env: Option<OsString>) -> PathBuf {
    cli.or_else(|| env.filter(|v| !v.is_empty()).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn min_age() {
        k9::assert_equal!("30".parse::<MinAge>().unwrap(), MinAge::DEFAULT);
        k9::assert_equal!("0".parse::<MinAge>().unwrap().days(), 0);
        k9::assert_equal!("90".parse::<MinAge>().unwrap().days(), 90);
        k9::assert_equal!(" 7 ".parse::<MinAge>().unwrap().days(), 7);

        assert!(matches!(
            "-1".parse::<MinAge>(),
            Err(ConfigError::MinAgeNegative(-1))
        ));
        assert!(matches!(
            "91".parse::<MinAge>(),
            Err(ConfigError::MinAgeTooLarge(91))
        ));
        assert!(matches!(
            "abc".parse::<MinAge>(),
            Err(ConfigError::MinAgeNotInteger(_))
        ));
        assert!(matches!(
            "1.5".parse::<MinAge>(),
            Err(ConfigError::MinAgeNotInteger(_))
        ));

        k9::assert_equal!(
            "91".parse::<MinAge>().unwrap_err().to_string(),
            "MIN_AGE is 91, but must be at most 90"
        );
    }

    #[test]
    fn data_dir_precedence() {
        k9::assert_equal!(
            resolve_data_dir(Some("/cli".into()), Some("/env".into())),
            PathBuf::from("/cli")
        );
        k9::assert_equal!(
            resolve_data_dir(None, Some("/env".into())),
            PathBuf::from("/env")
        );
        k9::assert_equal!(resolve_data_dir(None, None), PathBuf::from(DEFAULT_DATA_DIR));
        k9::assert_equal!(
            resolve_data_dir(None, Some("".into())),
            PathBuf::from(DEFAULT_DATA_DIR)
        );
    }
}
