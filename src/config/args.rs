//! Configuration from command-line arguments.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{
    builder::{EnumValueParser, PathBufValueParser, PossibleValue, TypedValueParser, ValueParser},
    Arg, ArgMatches, Command, ValueEnum, ValueHint,
};

use super::{Config, LogLevel, LogTarget, SettingSource};

//----------- ArgsSpec ---------------------------------------------------------

/// Configuration-related command-line arguments.
#[derive(Clone, Debug)]
pub struct ArgsSpec {
    /// The configuration file to load.
    pub config: Option<Box<Utf8Path>>,

    /// The key store file.
    pub keystore: Option<Box<Utf8Path>>,

    /// The per-exchange timeout.
    pub timeout: Option<Duration>,

    /// The minimum severity of messages to log.
    pub log_level: Option<LogLevel>,

    /// The target of log messages.
    pub log_target: Option<LogTargetSpec>,
}

impl ArgsSpec {
    /// Set up a [`clap::Command`] with config-related arguments.
    pub fn setup(cmd: Command) -> Command {
        cmd.args([
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .value_parser(ValueParser::new(
                    PathBufValueParser::new().try_map(Utf8PathBuf::try_from),
                ))
                .value_hint(ValueHint::FilePath)
                .global(true)
                .help("The configuration file to load"),
            Arg::new("keystore")
                .short('k')
                .long("keystore")
                .value_name("PATH")
                .value_parser(ValueParser::new(
                    PathBufValueParser::new().try_map(Utf8PathBuf::try_from),
                ))
                .value_hint(ValueHint::FilePath)
                .global(true)
                .help("The key store file to use"),
            Arg::new("timeout")
                .long("timeout")
                .value_name("SECONDS")
                .value_parser(clap::value_parser!(u64).range(1..))
                .global(true)
                .help("How long to wait for each DNS exchange"),
            Arg::new("log_level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(EnumValueParser::<LogLevel>::new())
                .global(true)
                .help("The minimum severity of messages to log"),
            Arg::new("log_target")
                .short('l')
                .long("log")
                .value_name("TARGET")
                .value_parser(ValueParser::new(LogTargetSpecParser))
                .global(true)
                .help("Where logs should be written to"),
        ])
    }

    /// Process parsed command-line arguments.
    pub fn process(matches: &ArgMatches) -> Self {
        Self {
            config: matches
                .get_one::<Utf8PathBuf>("config")
                .map(|p| p.as_path().into()),
            keystore: matches
                .get_one::<Utf8PathBuf>("keystore")
                .map(|p| p.as_path().into()),
            timeout: matches
                .get_one::<u64>("timeout")
                .map(|&secs| Duration::from_secs(secs)),
            log_level: matches.get_one::<LogLevel>("log_level").copied(),
            log_target: matches.get_one::<LogTargetSpec>("log_target").cloned(),
        }
    }

    /// Merge this into a [`Config`].
    pub fn merge(self, config: &mut Config) {
        let source = SettingSource::Args;
        config.config_file.merge_value(self.config, source);
        config.keystore_path.merge_value(self.keystore, source);
        config
            .network
            .query_timeout
            .merge_value(self.timeout, source);
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

#[derive(Clone, Debug, Default)]
pub struct LogTargetSpecParser;

impl clap::builder::TypedValueParser for LogTargetSpecParser {
    type Value = LogTargetSpec;

    fn parse_ref(
        &self,
        cmd: &clap::Command,
        arg: Option<&clap::Arg>,
        value: &std::ffi::OsStr,
    ) -> Result<Self::Value, clap::Error> {
        // NOTE: Clap's own value parser types use 'Error::invalid_value()' to
        // produce the appropriate parsing errors, but this is not a publicly
        // visible function.  We delegate to one of those value parsers on
        // error to get the same output.

        let s = match value.to_str() {
            Some(s) => s,
            None => {
                let parser = clap::builder::StringValueParser::default();
                return match parser.parse_ref(cmd, arg, value) {
                    Ok(s) => Err(clap::Error::raw(
                        clap::error::ErrorKind::InvalidUtf8,
                        format!("invalid log target {s:?}"),
                    )),
                    Err(err) => Err(err),
                };
            }
        };

        if s == "stdout" {
            Ok(LogTargetSpec::File("/dev/stdout".into()))
        } else if s == "stderr" {
            Ok(LogTargetSpec::File("/dev/stderr".into()))
        } else if let Some(s) = s.strip_prefix("file:") {
            let path = <&Utf8Path>::from(s);
            Ok(LogTargetSpec::File(path.into()))
        } else if s == "syslog" {
            Ok(LogTargetSpec::Syslog)
        } else {
            let parser = clap::builder::PossibleValuesParser::new([
                "stdout",
                "stderr",
                "file:<PATH>",
                "syslog",
            ]);
            match parser.parse_ref(cmd, arg, value) {
                Err(err) => Err(err),
                Ok(_) => Err(clap::Error::raw(
                    clap::error::ErrorKind::InvalidValue,
                    format!("invalid log target {s:?}"),
                )),
            }
        }
    }

    fn possible_values(
        &self,
    ) -> Option<Box<dyn Iterator<Item = clap::builder::PossibleValue> + '_>> {
        let values = ["stdout", "stderr", "file:<PATH>", "syslog"];
        Some(Box::new(values.into_iter().map(PossibleValue::new)))
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

//------------------------------------------------------------------------------

impl ValueEnum for LogLevel {
    fn value_variants<'a>() -> &'a [Self] {
        &[
            LogLevel::Trace,
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warning,
            LogLevel::Error,
            LogLevel::Critical,
        ]
    }

    fn to_possible_value(&self) -> Option<PossibleValue> {
        Some(PossibleValue::new(self.as_str()))
    }
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_override_env() {
        let cmd = ArgsSpec::setup(Command::new("delsync"));
        let matches = cmd
            .try_get_matches_from(["delsync", "--keystore", "/srv/keys.db", "--timeout", "2"])
            .unwrap();

        let mut config = Config::default();
        config
            .keystore_path
            .merge_value(Some("/tmp/env.db".into()), SettingSource::Env);
        ArgsSpec::process(&matches).merge(&mut config);

        assert_eq!(&**config.keystore_path.value(), "/srv/keys.db");
        assert_eq!(
            *config.network.query_timeout.value(),
            Duration::from_secs(2)
        );
        assert_eq!(config.logging.level.source(), SettingSource::Default);
    }

    #[test]
    fn log_target_values() {
        let cmd = ArgsSpec::setup(Command::new("delsync"));
        let matches = cmd
            .clone()
            .try_get_matches_from(["delsync", "--log", "file:/var/log/delsync.log"])
            .unwrap();
        assert_eq!(
            ArgsSpec::process(&matches).log_target,
            Some(LogTargetSpec::File("/var/log/delsync.log".into()))
        );

        assert!(cmd
            .try_get_matches_from(["delsync", "--log", "nowhere"])
            .is_err());
    }
}
