//! Configuring delsync.
//!
//! As per convention, delsync is configured from three sources (from least to
//! most specific): configuration files, environment variables, and command-line
//! arguments.  This module defines and collects together these sources.

use std::{
    fmt,
    hash::{Hash, Hasher},
    time::Duration,
};

use camino::Utf8Path;
use domain::base::Name;

use crate::net::ServerAddr;

pub mod args;
pub mod env;
pub mod file;

//----------- Config -----------------------------------------------------------

/// Configuration for delsync.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// The location of the configuration file.
    pub config_file: Setting<Box<Utf8Path>>,

    /// The file storing SIG(0) and DNSSEC keys.
    pub keystore_path: Setting<Box<Utf8Path>>,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Network-related configuration.
    pub network: NetworkConfig,

    /// Configuration of the update signer.
    pub signer: SignerConfig,

    /// Per-zone configuration, in the order it was given.
    pub zones: Vec<ZoneConfig>,
}

//--- Defaults

impl Default for Config {
    fn default() -> Self {
        Self {
            config_file: Setting::new("/etc/delsync/config.toml".into()),
            keystore_path: Setting::new("/var/db/delsync/keys.db".into()),
            logging: Default::default(),
            network: Default::default(),
            signer: Default::default(),
            zones: Vec::new(),
        }
    }
}

//--- Initialization

impl Config {
    /// Set up a [`clap::Command`] with config-related arguments.
    pub fn setup_cli(cmd: clap::Command) -> clap::Command {
        args::ArgsSpec::setup(cmd)
    }

    /// Initialize delsync's configuration.
    ///
    /// Environment variables and command-line arguments are processed first,
    /// as they may name the configuration file.  The configuration file is
    /// then loaded, if it exists; a missing file is only an error if its
    /// location was given explicitly.
    pub fn init(cli_matches: &clap::ArgMatches) -> Result<Self, ConfigError> {
        // Process environment variables and command-line arguments.
        let env = env::EnvSpec::process()?;
        let args = args::ArgsSpec::process(cli_matches);

        // Combine their data with the default state.
        let mut this = Self::default();
        env.merge(&mut this);
        args.merge(&mut this);

        this.load_file()?;

        Ok(this)
    }

    /// Load the configuration file and merge it in.
    pub fn load_file(&mut self) -> Result<(), ConfigError> {
        let path = self.config_file.value().clone();
        match file::FileSpec::load(&path) {
            Ok(spec) => {
                spec.merge(self);
                Ok(())
            }
            Err(file::FileError::Load(error))
                if error.kind() == std::io::ErrorKind::NotFound
                    && self.config_file.source() == SettingSource::Default =>
            {
                log::debug!("No configuration file at '{path}', using defaults");
                Ok(())
            }
            Err(error) => Err(ConfigError::File { path, error }),
        }
    }

    /// Look up the configuration for a zone.
    pub fn zone(&self, name: &Name<Vec<u8>>) -> Option<&ZoneConfig> {
        self.zones.iter().find(|zone| zone.name == *name)
    }
}

//----------- LoggingConfig ----------------------------------------------------

/// Logging configuration for delsync.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggingConfig {
    /// The minimum severity of messages to log.
    pub level: Setting<LogLevel>,

    /// Where to log messages to.
    pub target: Setting<LogTarget>,

    /// Targets to log trace messages for.
    pub trace_targets: Setting<foldhash::HashSet<Box<str>>>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Setting::new(LogLevel::Warning),
            target: Setting::new(LogTarget::File("/dev/stderr".into())),
            trace_targets: Setting::new(Default::default()),
        }
    }
}

//----------- NetworkConfig ----------------------------------------------------

/// Configuration for talking to name servers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkConfig {
    /// How long to wait for a single DNS exchange.
    pub query_timeout: Setting<Duration>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            query_timeout: Setting::new(Duration::from_secs(5)),
        }
    }
}

//----------- SignerConfig -----------------------------------------------------

/// Configuration for building and signing updates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignerConfig {
    /// The TTL of records added by an update.
    pub update_ttl: Setting<u32>,

    /// How far the SIG(0) validity interval extends around the current time.
    pub sig_validity: Setting<Duration>,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            update_ttl: Setting::new(3600),
            sig_validity: Setting::new(Duration::from_secs(300)),
        }
    }
}

//----------- ZoneConfig -------------------------------------------------------

/// Configuration for a single child zone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZoneConfig {
    /// The name of the child zone.
    pub name: Name<Vec<u8>>,

    /// The name of the parent zone, if not simply the next label up.
    pub parent: Option<Name<Vec<u8>>>,

    /// The primary name server of the child zone.
    pub child_primary: Option<ServerAddr>,

    /// The primary name server of the parent zone.
    pub parent_primary: Option<ServerAddr>,
}

//----------- LogLevel ---------------------------------------------------------

/// A severity level for logging.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    /// A function or variable was interacted with, for debugging.
    Trace,

    /// Something occurred that may be relevant to debugging.
    Debug,

    /// Things are proceeding as expected.
    Info,

    /// Something does not appear to be correct.
    Warning,

    /// Something is wrong (but delsync can recover).
    Error,

    /// Something is wrong and delsync can't function at all.
    Critical,
}

impl LogLevel {
    /// Represent a [`LogLevel`] as a string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }

    /// Parse a [`LogLevel`] from its string representation.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warning" => LogLevel::Warning,
            "error" => LogLevel::Error,
            "critical" => LogLevel::Critical,
            _ => return None,
        })
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//----------- LogTarget --------------------------------------------------------

/// A logging target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogTarget {
    /// Append logs to a file.
    File(Box<Utf8Path>),

    /// Write logs to the UNIX syslog.
    Syslog,
}

//----------- Setting ----------------------------------------------------------

/// A configured setting.
#[derive(Debug, Default, Clone, Copy)]
pub struct Setting<T> {
    /// The default for the value.
    pub default: T,

    /// The setting in the configuration file, if any.
    pub file: Option<T>,

    /// The setting from environment variables, if any.
    pub env: Option<T>,

    /// The setting from command-line arguments, if any.
    pub args: Option<T>,
}

impl<T> Setting<T> {
    /// Construct a new [`Setting`].
    pub const fn new(default: T) -> Self {
        Self {
            default,
            file: None,
            env: None,
            args: None,
        }
    }

    /// The current value.
    pub const fn value(&self) -> &T {
        // This is a 'const' implementation of:
        //
        // self.args.as_ref()
        //     .or(self.env.as_ref())
        //     .or(self.file.as_ref())
        //     .unwrap_or(&self.default)

        match self {
            Self {
                args: Some(value), ..
            }
            | Self {
                env: Some(value), ..
            }
            | Self {
                file: Some(value), ..
            }
            | Self { default: value, .. } => value,
        }
    }

    /// The source of the current value.
    pub const fn source(&self) -> SettingSource {
        match self {
            Self { args: Some(_), .. } => SettingSource::Args,
            Self { env: Some(_), .. } => SettingSource::Env,
            Self { file: Some(_), .. } => SettingSource::File,
            Self { default: _, .. } => SettingSource::Default,
        }
    }

    /// Record a value from the given source, if one was specified.
    pub fn merge_value(&mut self, value: Option<T>, source: SettingSource) {
        let Some(value) = value else { return };
        match source {
            SettingSource::Default => self.default = value,
            SettingSource::File => self.file = Some(value),
            SettingSource::Env => self.env = Some(value),
            SettingSource::Args => self.args = Some(value),
        }
    }
}

impl<T: PartialEq> PartialEq for Setting<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value() == other.value()
    }
}

impl<T: Eq> Eq for Setting<T> {}

impl<T: Hash> Hash for Setting<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value().hash(state)
    }
}

//----------- SettingSource ----------------------------------------------------

/// The source of a configured setting.
///
/// There are four possible sources for a setting.  Each source has a designated
/// priority, with which it can override settings from other sources.  They are
/// enumerated here from lowest to highest priority.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SettingSource {
    /// A default.
    Default,

    /// The configuration file.
    File,

    /// Environment variables.
    Env,

    /// Command-line arguments.
    Args,
}

//----------- ConfigError ------------------------------------------------------

/// An error in configuring delsync.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// An error occurred regarding environment variables.
    Env(env::EnvError),

    /// An error occurred regarding the configuration file.
    File {
        /// The location of the config file.
        path: Box<Utf8Path>,

        /// The error that occurred.
        error: file::FileError,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Env(error) => error.fmt(f),
            ConfigError::File {
                error: file::FileError::Load(error),
                path,
            } => {
                write!(f, "could not load the config file '{path}': {error}")
            }
            ConfigError::File {
                error: file::FileError::Parse(error),
                path,
            } => {
                write!(f, "could not parse the config file '{path}': {error}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Env(error) => Some(error),
            ConfigError::File { error, .. } => Some(error),
        }
    }
}

impl From<env::EnvError> for ConfigError {
    fn from(value: env::EnvError) -> Self {
        Self::Env(value)
    }
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setting_priority() {
        let mut setting = Setting::new(1u32);
        assert_eq!(*setting.value(), 1);
        assert_eq!(setting.source(), SettingSource::Default);

        setting.merge_value(Some(3), SettingSource::Args);
        setting.merge_value(Some(2), SettingSource::File);
        setting.merge_value(None, SettingSource::Env);
        assert_eq!(*setting.value(), 3);
        assert_eq!(setting.source(), SettingSource::Args);

        setting.args = None;
        assert_eq!(*setting.value(), 2);
        assert_eq!(setting.source(), SettingSource::File);
    }

    #[test]
    fn log_level_names() {
        for level in [
            LogLevel::Trace,
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warning,
            LogLevel::Error,
            LogLevel::Critical,
        ] {
            assert_eq!(LogLevel::parse(level.as_str()), Some(level));
        }
        assert_eq!(LogLevel::parse("warn"), None);
    }
}
