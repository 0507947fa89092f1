//! Logging from delsync.

use std::io::Write;
use std::sync::RwLock;

use camino::Utf8Path;

use crate::config::{LogLevel, LogTarget, LoggingConfig};

//----------- Logger -----------------------------------------------------------

/// The state of the delsync logger.
pub struct Logger {
    /// The inner state of the logger.
    inner: RwLock<Option<Inner>>,

    /// The fallback logger.
    fallback: std::io::Stderr,
}

impl Logger {
    /// Launch the delsync logger.
    ///
    /// Returns `None` if a [`log`] logger has been set already.
    pub fn launch() -> Option<&'static Logger> {
        let this: &'static Logger = Box::leak(Box::new(Self {
            inner: RwLock::new(None),
            fallback: std::io::stderr(),
        }));

        log::set_logger(this).ok()?;
        log::set_max_level(log::LevelFilter::Warn);

        Some(this)
    }

    /// Prepare a change to the logger.
    pub fn prepare(
        &self,
        config: &LoggingConfig,
    ) -> Result<Option<PreparedChange>, std::io::Error> {
        let Ok(inner) = self.inner.read() else {
            // A panic occurred while the lock was held.  Don't do anything.
            return Ok(None);
        };

        let level: log::LevelFilter = (*config.level.value()).into();
        let trace_targets = config.trace_targets.value();

        let Some(inner) = &*inner else {
            return Ok(Some(PreparedChange {
                primary: Some(PrimaryLogger::new(config.target.value())?),
                level,
                trace_targets: Some(trace_targets.clone()),
            }));
        };

        let primary = if !inner.primary.matches(config.target.value()) {
            Some(PrimaryLogger::new(config.target.value())?)
        } else {
            None
        };

        let trace_targets =
            Some(trace_targets.clone()).filter(|targets| &inner.trace_targets != targets);

        if primary.is_none() && inner.level == level && trace_targets.is_none() {
            return Ok(None);
        }

        Ok(Some(PreparedChange {
            primary,
            level,
            trace_targets,
        }))
    }

    /// Apply a prepared change to the logger.
    pub fn apply(&self, change: PreparedChange) {
        let Ok(mut inner) = self.inner.write() else {
            // A panic occurred while the lock was held.  Don't do anything.
            return;
        };

        let state = match (&mut *inner, change.primary) {
            (Some(state), primary) => {
                if let Some(primary) = primary {
                    state.primary = primary;
                }
                state.level = change.level;
                if let Some(trace_targets) = change.trace_targets {
                    state.trace_targets = trace_targets;
                }
                state
            }
            (slot @ None, Some(primary)) => slot.insert(Inner {
                primary,
                level: change.level,
                trace_targets: change.trace_targets.unwrap_or_default(),
            }),
            // A change without a primary logger can only follow an earlier one.
            (None, None) => return,
        };

        if !state.trace_targets.is_empty() {
            log::set_max_level(log::LevelFilter::Trace);
        } else {
            log::set_max_level(state.level);
        }
    }
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        if let Ok(inner) = self.inner.read() {
            if let Some(inner) = &*inner {
                return inner.enabled(metadata);
            }
        }

        metadata.level() <= log::LevelFilter::Warn
    }

    fn log(&self, record: &log::Record) {
        if let Ok(inner) = self.inner.read() {
            if let Some(inner) = &*inner {
                return inner.log(record);
            }
        }

        let mut logger = &self.fallback;
        let _ = writeln!(&mut logger, "{}", record.args());
    }

    fn flush(&self) {
        if let Ok(inner) = self.inner.read() {
            if let Some(inner) = &*inner {
                return inner.flush();
            }
        }

        let mut logger = &self.fallback;
        let _ = logger.flush();
    }
}

//----------- Inner ------------------------------------------------------------

/// The inner state of a [`Logger`].
struct Inner {
    /// The primary logger.
    primary: PrimaryLogger,

    /// A log level filter.
    level: log::LevelFilter,

    /// A list of log targets to trace.
    trace_targets: foldhash::HashSet<Box<str>>,
}

impl log::Log for Inner {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        if metadata.level() <= self.level {
            return true;
        }

        metadata.level() == log::Level::Trace && self.trace_targets.contains(metadata.target())
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        self.primary.log(record)
    }

    fn flush(&self) {
        self.primary.flush()
    }
}

//----------- PrimaryLogger ----------------------------------------------------

/// A primary logger.
enum PrimaryLogger {
    /// A file logger.
    File {
        /// The actual file.
        file: std::fs::File,

        /// The path to the file.
        path: Box<Utf8Path>,
    },

    /// A syslog logger.
    #[cfg(unix)]
    Syslog(syslog::BasicLogger),
}

impl PrimaryLogger {
    /// Initialize a new [`PrimaryLogger`].
    pub fn new(config: &LogTarget) -> Result<Self, std::io::Error> {
        match config {
            LogTarget::File(path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&**path)?;

                Ok(Self::File {
                    file,
                    path: path.clone(),
                })
            }

            #[cfg(unix)]
            LogTarget::Syslog => {
                let formatter = syslog::Formatter3164 {
                    process: "delsync".into(),
                    ..Default::default()
                };
                let logger = syslog::unix(formatter).map_err(|err| match err {
                    syslog::Error::Initialization(err) => std::io::Error::other(err),
                    syslog::Error::Write(err) => err,
                    syslog::Error::Io(err) => err,
                })?;

                Ok(Self::Syslog(syslog::BasicLogger::new(logger)))
            }

            #[cfg(not(unix))]
            LogTarget::Syslog => Err(std::io::Error::other(
                "syslog is only supported on UNIX systems",
            )),
        }
    }

    /// Whether this matches a configured logging target.
    pub fn matches(&self, config: &LogTarget) -> bool {
        match (self, config) {
            (Self::File { path: l, .. }, LogTarget::File(r)) => l == r,
            #[cfg(unix)]
            (Self::Syslog(_), LogTarget::Syslog) => true,
            _ => false,
        }
    }
}

impl log::Log for PrimaryLogger {
    fn enabled(&self, _metadata: &log::Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &log::Record<'_>) {
        match self {
            PrimaryLogger::File { file, .. } => {
                let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
                let value = format!(
                    "[{now}] {} {}: {}\n",
                    record.level(),
                    record.target(),
                    record.args()
                );
                let mut file: &std::fs::File = file;
                let _ = file.write_all(value.as_bytes());
            }
            #[cfg(unix)]
            PrimaryLogger::Syslog(logger) => logger.log(record),
        }
    }

    fn flush(&self) {
        match self {
            PrimaryLogger::File { file, .. } => {
                let mut file: &std::fs::File = file;
                let _ = file.flush();
            }

            #[cfg(unix)]
            PrimaryLogger::Syslog(logger) => logger.flush(),
        }
    }
}

//------------------------------------------------------------------------------

/// A prepared change to the [`Logger`].
pub struct PreparedChange {
    /// The primary logger, if changed.
    primary: Option<PrimaryLogger>,

    /// The log level filter.
    level: log::LevelFilter,

    /// The trace targets, if changed.
    trace_targets: Option<foldhash::HashSet<Box<str>>>,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warning => log::LevelFilter::Warn,
            LogLevel::Error | LogLevel::Critical => log::LevelFilter::Error,
        }
    }
}
