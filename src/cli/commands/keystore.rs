use camino::Utf8PathBuf;
use domain::base::Name;

use crate::keystore::{KeyKind, KeyState};
use crate::operation::Operation;
use crate::sig0::Algorithm;

use super::{private_file, read_text, CommandError, KeyArgs};

#[derive(Clone, Debug, clap::Args)]
pub struct Keystore {
    #[command(subcommand)]
    command: KeystoreCommand,
}

#[derive(Clone, Debug, clap::Subcommand)]
pub enum KeystoreCommand {
    /// Generate a new key pair
    #[command(name = "generate")]
    Generate {
        /// The owner of the key
        owner: Name<Vec<u8>>,

        /// The signature algorithm, by name or number
        #[arg(long = "algorithm", default_value = "ED25519")]
        algorithm: Algorithm,

        /// Generate a DNSSEC key instead of a SIG(0) key
        #[arg(long = "dnssec")]
        dnssec: bool,
    },

    /// Import a key pair from BIND key files
    #[command(name = "import")]
    Import {
        /// The '.key' file
        public: Utf8PathBuf,

        /// The '.private' file, if not next to the '.key' file
        #[arg(long = "private", value_name = "PATH")]
        private: Option<Utf8PathBuf>,
    },

    /// List keys
    #[command(name = "list")]
    List {
        /// Only list keys of this owner
        owner: Option<Name<Vec<u8>>>,
    },

    /// Delete a key for good
    #[command(name = "delete")]
    Delete(KeyArgs),

    /// Change the state of a key
    #[command(name = "setstate")]
    SetState {
        #[command(flatten)]
        key: KeyArgs,

        /// One of "created", "active" or "retired"
        state: KeyState,
    },

    /// Print the public record of a key
    #[command(name = "export")]
    Export(KeyArgs),
}

impl Keystore {
    pub fn operation(self) -> Result<Operation, CommandError> {
        Ok(match self.command {
            KeystoreCommand::Generate {
                owner,
                algorithm,
                dnssec,
            } => Operation::KeyGenerate {
                owner,
                algorithm,
                kind: if dnssec {
                    KeyKind::Dnssec
                } else {
                    KeyKind::Sig0
                },
            },
            KeystoreCommand::Import { public, private } => {
                let private = private.unwrap_or_else(|| private_file(&public));
                Operation::KeyImport {
                    public: read_text(&public)?,
                    private: read_text(&private)?,
                }
            }
            KeystoreCommand::List { owner } => Operation::KeyList { owner },
            KeystoreCommand::Delete(key) => Operation::KeyDelete(key.into()),
            KeystoreCommand::SetState { key, state } => Operation::KeySetState {
                key: key.into(),
                state,
            },
            KeystoreCommand::Export(key) => Operation::KeyExport(key.into()),
        })
    }
}
