//! The commands of _delsync_.

pub mod ddns;
pub mod dsync;
pub mod keystore;
pub mod truststore;

use std::{fmt, io, sync::Arc};

use camino::{Utf8Path, Utf8PathBuf};
use domain::base::{Name, Rtype};

use crate::keystore::KeyHandle;
use crate::net::ServerAddr;
use crate::operation::{Operation, ZoneParams};

#[derive(Clone, Debug, clap::Subcommand)]
pub enum Command {
    /// Synchronize delegations and SIG(0) keys with the parent
    #[command(name = "ddns")]
    Ddns(self::ddns::Ddns),

    /// Look up where the parent accepts updates
    #[command(name = "dsync")]
    Dsync(self::dsync::Dsync),

    /// Manage our own keys
    #[command(name = "keystore")]
    Keystore(self::keystore::Keystore),

    /// Manage the keys of others
    #[command(name = "truststore")]
    Truststore(self::truststore::Truststore),
}

impl Command {
    /// The operation this command asks for.
    pub fn operation(self) -> Result<Operation, CommandError> {
        match self {
            Self::Ddns(ddns) => Ok(ddns.operation()),
            Self::Dsync(dsync) => Ok(dsync.operation()),
            Self::Keystore(keystore) => keystore.operation(),
            Self::Truststore(truststore) => truststore.operation(),
        }
    }
}

//----------- ZoneArgs ---------------------------------------------------------

/// Selecting a zone and, optionally, overriding its configuration.
#[derive(Clone, Debug, clap::Args)]
pub struct ZoneArgs {
    /// The child zone
    pub zone: Name<Vec<u8>>,

    /// The parent zone, if not the next label up
    #[arg(long = "parent", value_name = "ZONE")]
    pub parent: Option<Name<Vec<u8>>>,

    /// The primary name server of the child zone
    #[arg(long = "child-primary", value_name = "HOST[:PORT]")]
    pub child_primary: Option<ServerAddr>,

    /// The primary name server of the parent zone
    #[arg(long = "parent-primary", value_name = "HOST[:PORT]")]
    pub parent_primary: Option<ServerAddr>,
}

impl From<ZoneArgs> for ZoneParams {
    fn from(args: ZoneArgs) -> Self {
        Self {
            zone: args.zone,
            parent: args.parent,
            child_primary: args.child_primary,
            parent_primary: args.parent_primary,
        }
    }
}

//----------- KeyArgs ----------------------------------------------------------

/// Selecting a key.
#[derive(Clone, Debug, clap::Args)]
pub struct KeyArgs {
    /// The owner of the key
    pub owner: Name<Vec<u8>>,

    /// The key tag
    pub keyid: u16,
}

impl From<KeyArgs> for KeyHandle {
    fn from(args: KeyArgs) -> Self {
        KeyHandle::new(&args.owner, args.keyid)
    }
}

//----------- Helpers ----------------------------------------------------------

/// Parse a record type by mnemonic or as `TYPEnnn`.
pub fn parse_rtype(s: &str) -> Result<Rtype, String> {
    s.parse()
        .map_err(|_| format!("unknown record type {s:?}"))
}

/// Read a text file named on the command line.
fn read_text(path: &Utf8Path) -> Result<String, CommandError> {
    std::fs::read_to_string(path).map_err(|error| CommandError::Read {
        path: path.into(),
        error: Arc::new(error),
    })
}

/// Read a binary file named on the command line.
fn read_bytes(path: &Utf8Path) -> Result<Vec<u8>, CommandError> {
    std::fs::read(path).map_err(|error| CommandError::Read {
        path: path.into(),
        error: Arc::new(error),
    })
}

/// The `.private` file next to a `.key` file.
fn private_file(public: &Utf8Path) -> Utf8PathBuf {
    public.with_extension("private")
}

//----------- CommandError -----------------------------------------------------

/// An error in preparing a command.
#[derive(Clone, Debug)]
pub enum CommandError {
    /// A file named on the command line could not be read.
    Read {
        path: Box<Utf8Path>,
        error: Arc<io::Error>,
    },
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { path, error } => write!(f, "could not read '{path}': {error}"),
        }
    }
}

impl std::error::Error for CommandError {}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use clap::Parser;

    use crate::cli::args::{Args, OutputFormat};
    use crate::keystore::KeyState;

    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("delsync").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn ddns_sync_with_overrides() {
        let args = parse(&[
            "-o",
            "json",
            "ddns",
            "sync",
            "child.example.",
            "--parent-primary",
            "192.0.2.20:5353",
        ]);
        assert_eq!(args.output, OutputFormat::Json);
        let Operation::DelegationSync(zone) = args.command.operation().unwrap() else {
            panic!("unexpected operation");
        };
        assert_eq!(zone.zone.to_string(), "child.example");
        assert!(zone.parent.is_none() && zone.child_primary.is_none());
        assert_eq!(zone.parent_primary.unwrap().to_string(), "192.0.2.20:5353");
    }

    #[test]
    fn keystore_setstate() {
        let args = parse(&["keystore", "setstate", "Child.Example.", "4711", "active"]);
        let Operation::KeySetState { key, state } = args.command.operation().unwrap() else {
            panic!("unexpected operation");
        };
        assert_eq!(key.to_string(), "child.example. key 4711");
        assert_eq!(state, KeyState::Active);
    }

    #[test]
    fn dsync_defaults() {
        let args = parse(&["dsync", "query", "child.example."]);
        let Operation::DsyncQuery {
            trigger, scheme, ..
        } = args.command.operation().unwrap()
        else {
            panic!("unexpected operation");
        };
        assert_eq!(trigger, Rtype::NS);
        assert_eq!(scheme, crate::dsync::Scheme::Update);

        let args = parse(&[
            "dsync",
            "query",
            "child.example.",
            "--trigger",
            "CDS",
            "--scheme",
            "notify",
        ]);
        let Operation::DsyncQuery {
            trigger, scheme, ..
        } = args.command.operation().unwrap()
        else {
            panic!("unexpected operation");
        };
        assert_eq!(trigger, Rtype::CDS);
        assert_eq!(scheme, crate::dsync::Scheme::Notify);
    }

    #[test]
    fn missing_key_file() {
        let args = parse(&["keystore", "import", "/nonexistent/Kchild.example.+015+00001.key"]);
        assert!(matches!(
            args.command.operation(),
            Err(CommandError::Read { .. })
        ));
    }

    #[test]
    fn private_file_name() {
        assert_eq!(
            private_file(Utf8Path::new("/keys/Kchild.example.+015+00042.key")),
            Utf8PathBuf::from("/keys/Kchild.example.+015+00042.private")
        );
    }
}
