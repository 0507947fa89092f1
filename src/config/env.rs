//! Configuration from environment variables.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};

use super::{Config, LogLevel, LogTarget, SettingSource};

//----------- EnvSpec ----------------------------------------------------------

/// Configuration-related environment variables.
#[derive(Clone, Debug, Default)]
pub struct EnvSpec {
    /// The configuration file to load.
    pub config: Option<Box<Utf8Path>>,

    /// The key store file.
    pub keystore: Option<Box<Utf8Path>>,

    /// The minimum severity of messages to log.
    pub log_level: Option<LogLevel>,

    /// The target of log messages.
    pub log_target: Option<LogTargetSpec>,
}

impl EnvSpec {
    /// Process environment variables.
    pub fn process() -> Result<Self, EnvError> {
        Self::process_with(|name| std::env::var_os(name))
    }

    /// Process variables from the given lookup function.
    pub fn process_with(
        lookup: impl Fn(&'static str) -> Option<std::ffi::OsString>,
    ) -> Result<Self, EnvError> {
        let var = |var: &'static str| -> Result<Option<String>, EnvError> {
            lookup(var)
                .map(|value| value.into_string().map_err(|_| EnvError::NonUtf8 { var }))
                .transpose()
        };

        let config =
            var("DELSYNC_CONFIG_PATH")?.map(|path| Utf8PathBuf::from(path).into_boxed_path());

        let keystore =
            var("DELSYNC_KEYSTORE")?.map(|path| Utf8PathBuf::from(path).into_boxed_path());

        let log_level = var("DELSYNC_LOG_LEVEL")?
            .map(|value| {
                LogLevel::parse(&value).ok_or_else(|| EnvError::InvalidLogLevel {
                    value: value.into_boxed_str(),
                })
            })
            .transpose()?;

        let log_target = var("DELSYNC_LOG")?.map(LogTargetSpec::parse).transpose()?;

        Ok(Self {
            config,
            keystore,
            log_level,
            log_target,
        })
    }

    /// Merge this into a [`Config`].
    pub fn merge(self, config: &mut Config) {
        let source = SettingSource::Env;
        config.config_file.merge_value(self.config, source);
        config.keystore_path.merge_value(self.keystore, source);
        config.logging.level.merge_value(self.log_level, source);
        config
            .logging
            .target
            .merge_value(self.log_target.map(|t| t.build()), source);
    }
}

//----------- LogTargetSpec ----------------------------------------------------

/// A logging target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogTargetSpec {
    /// Append logs to a file.
    File(Box<Utf8Path>),

    /// Write logs to the UNIX syslog.
    Syslog,
}

//--- Parsing

impl LogTargetSpec {
    /// Parse this value from an owned string.
    pub fn parse(s: String) -> Result<Self, EnvError> {
        if s == "stdout" {
            Ok(Self::File("/dev/stdout".into()))
        } else if s == "stderr" {
            Ok(Self::File("/dev/stderr".into()))
        } else if let Some(s) = s.strip_prefix("file:") {
            let path = <&Utf8Path>::from(s);
            Ok(Self::File(path.into()))
        } else if s == "syslog" {
            Ok(Self::Syslog)
        } else {
            Err(EnvError::InvalidLogTarget { value: s.into() })
        }
    }
}

//--- Conversion

impl LogTargetSpec {
    /// Build the internal configuration.
    pub fn build(self) -> LogTarget {
        match self {
            Self::File(path) => LogTarget::File(path),
            Self::Syslog => LogTarget::Syslog,
        }
    }
}

//----------- EnvError ---------------------------------------------------------

/// An error in processing environment variables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnvError {
    /// A non-UTF-8 value was specified.
    NonUtf8 {
        /// The name of the offending environment variable.
        var: &'static str,
    },

    /// An invalid log level was specified.
    InvalidLogLevel {
        /// The log level value.
        value: Box<str>,
    },

    /// An invalid log target was specified.
    InvalidLogTarget {
        /// The log target value.
        value: Box<str>,
    },
}

impl fmt::Display for EnvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvError::NonUtf8 { var } => {
                write!(f, "'${var}' was not valid UTF-8")
            }
            EnvError::InvalidLogLevel { value } => {
                write!(
                    f,
                    "'$DELSYNC_LOG_LEVEL' ({value:?}) is not a valid log level"
                )
            }
            EnvError::InvalidLogTarget { value } => {
                write!(f, "'$DELSYNC_LOG' ({value:?}) is not a valid logging target")
            }
        }
    }
}

impl std::error::Error for EnvError {}

//============ Tests ===========================================================
