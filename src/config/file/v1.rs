//! Version 1 of the configuration file.

use std::{fmt, str::FromStr, time::Duration};

use camino::Utf8Path;
use domain::base::Name;
use serde::{Deserialize, Deserializer};

use crate::config::{
    Config, LogLevel, LogTarget, LoggingConfig, NetworkConfig, SettingSource, SignerConfig,
    ZoneConfig,
};
use crate::net::ServerAddr;

//----------- Spec -------------------------------------------------------------

/// A configuration file.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct Spec {
    /// The key store file.
    pub keystore: Option<Box<Utf8Path>>,

    /// Configuring logging.
    pub logging: LoggingSpec,

    /// Configuring network exchanges.
    pub network: NetworkSpec,

    /// Configuring update signing.
    pub signer: SignerSpec,

    /// Per-zone settings.
    pub zone: Vec<ZoneSpec>,
}

//--- Conversion

impl Spec {
    /// Merge into the internal configuration.
    pub fn merge(self, config: &mut Config) {
        config
            .keystore_path
            .merge_value(self.keystore, SettingSource::File);
        self.logging.merge(&mut config.logging);
        self.network.merge(&mut config.network);
        self.signer.merge(&mut config.signer);
        config.zones = self.zone.into_iter().map(ZoneSpec::build).collect();
    }
}

//----------- LoggingSpec ------------------------------------------------------

/// Configuring logging.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct LoggingSpec {
    /// The minimum severity of messages to log.
    pub level: Option<LogLevelSpec>,

    /// Where logs are written to.
    pub target: Option<LogTargetSpec>,

    /// Targets to log trace messages for.
    pub trace_targets: Option<Vec<Box<str>>>,
}

//--- Conversion

impl LoggingSpec {
    /// Merge into the internal configuration.
    pub fn merge(self, config: &mut LoggingConfig) {
        let source = SettingSource::File;
        config
            .level
            .merge_value(self.level.map(LogLevelSpec::build), source);
        config
            .target
            .merge_value(self.target.map(LogTargetSpec::build), source);
        config.trace_targets.merge_value(
            self.trace_targets.map(|t| t.into_iter().collect()),
            source,
        );
    }
}

//----------- LogLevelSpec -----------------------------------------------------

/// A severity level for logging.
#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogLevelSpec {
    /// A function or variable was interacted with, for debugging.
    Trace,

    /// Something occurred that may be relevant to debugging.
    Debug,

    /// Things are proceeding as expected.
    Info,

    /// Something does not appear to be correct.
    Warning,

    /// Something went wrong (but delsync can recover).
    Error,

    /// Something went wrong and delsync can't function at all.
    Critical,
}

//--- Conversion

impl LogLevelSpec {
    /// Build the internal configuration.
    pub fn build(self) -> LogLevel {
        match self {
            Self::Trace => LogLevel::Trace,
            Self::Debug => LogLevel::Debug,
            Self::Info => LogLevel::Info,
            Self::Warning => LogLevel::Warning,
            Self::Error => LogLevel::Error,
            Self::Critical => LogLevel::Critical,
        }
    }
}

//----------- LogTargetSpec ----------------------------------------------------

/// A logging target, as a string.
#[derive(Clone, Debug)]
pub enum LogTargetSpec {
    /// Append logs to a file.
    File(Box<Utf8Path>),

    /// Write logs to the UNIX syslog.
    Syslog,
}

//--- Deserialization

impl FromStr for LogTargetSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(Self::File("/dev/stdout".into())),
            "stderr" => Ok(Self::File("/dev/stderr".into())),
            "syslog" => Ok(Self::Syslog),
            _ => match s.strip_prefix("file:") {
                Some(path) => Ok(Self::File(<&Utf8Path>::from(path).into())),
                None => Err(format!("invalid log target {s:?}")),
            },
        }
    }
}

impl<'de> Deserialize<'de> for LogTargetSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        from_str(deserializer)
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

//----------- NetworkSpec ------------------------------------------------------

/// Configuring network exchanges.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct NetworkSpec {
    /// The per-exchange timeout, in seconds.
    pub query_timeout: Option<u64>,
}

//--- Conversion

impl NetworkSpec {
    /// Merge into the internal configuration.
    pub fn merge(self, config: &mut NetworkConfig) {
        config.query_timeout.merge_value(
            self.query_timeout.map(Duration::from_secs),
            SettingSource::File,
        );
    }
}

//----------- SignerSpec -------------------------------------------------------

/// Configuring update signing.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct SignerSpec {
    /// The TTL of added records.
    pub update_ttl: Option<u32>,

    /// The SIG(0) validity around the current time, in seconds.
    pub sig_validity: Option<u64>,
}

//--- Conversion

impl SignerSpec {
    /// Merge into the internal configuration.
    pub fn merge(self, config: &mut SignerConfig) {
        let source = SettingSource::File;
        config.update_ttl.merge_value(self.update_ttl, source);
        config
            .sig_validity
            .merge_value(self.sig_validity.map(Duration::from_secs), source);
    }
}

//----------- ZoneSpec ---------------------------------------------------------

/// Settings for a single child zone.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ZoneSpec {
    /// The name of the zone.
    #[serde(deserialize_with = "from_str")]
    pub name: Name<Vec<u8>>,

    /// The parent zone.
    #[serde(default, deserialize_with = "opt_from_str")]
    pub parent: Option<Name<Vec<u8>>>,

    /// The child zone's primary name server.
    #[serde(default, deserialize_with = "opt_from_str")]
    pub child_primary: Option<ServerAddr>,

    /// The parent zone's primary name server.
    #[serde(default, deserialize_with = "opt_from_str")]
    pub parent_primary: Option<ServerAddr>,
}

//--- Conversion

impl ZoneSpec {
    /// Build the internal configuration.
    pub fn build(self) -> ZoneConfig {
        ZoneConfig {
            name: self.name,
            parent: self.parent,
            child_primary: self.child_primary,
            parent_primary: self.parent_primary,
        }
    }
}

//----------- Helpers ----------------------------------------------------------

fn from_str<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

fn opt_from_str<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    from_str(deserializer).map(Some)
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use crate::config::file::{FileError, FileSpec};

    use super::*;

    #[test]
    fn full_file() {
        let spec = FileSpec::parse(
            r#"
            version = "v1"
            keystore = "/srv/delsync/keys.db"

            [logging]
            level = "debug"
            target = "file:/var/log/delsync.log"

            [network]
            query-timeout = 3

            [signer]
            update-ttl = 600
            sig-validity = 120

            [[zone]]
            name = "child.example."
            child-primary = "192.0.2.1"
            parent-primary = "[2001:db8::53]:5353"
            "#,
        )
        .unwrap();

        let mut config = Config::default();
        spec.merge(&mut config);

        assert_eq!(&**config.keystore_path.value(), "/srv/delsync/keys.db");
        assert_eq!(*config.logging.level.value(), LogLevel::Debug);
        assert_eq!(
            *config.network.query_timeout.value(),
            Duration::from_secs(3)
        );
        assert_eq!(*config.signer.update_ttl.value(), 600);
        assert_eq!(*config.signer.sig_validity.value(), Duration::from_secs(120));

        let zone = config
            .zone(&"child.example".parse().unwrap())
            .expect("zone is configured");
        assert_eq!(zone.parent, None);
        assert_eq!(
            zone.child_primary.as_ref().map(|s| s.to_string()),
            Some("192.0.2.1:53".into())
        );
        assert_eq!(
            zone.parent_primary.as_ref().map(|s| s.to_string()),
            Some("[2001:db8::53]:5353".into())
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let res = FileSpec::parse(
            r#"
            version = "v1"
            keystroe = "/tmp/keys.db"
            "#,
        );
        assert!(matches!(res, Err(FileError::Parse(_))));
    }
}
