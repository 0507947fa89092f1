use camino::Utf8PathBuf;

use crate::operation::Operation;

use super::{read_bytes, read_text, CommandError, KeyArgs};

#[derive(Clone, Debug, clap::Args)]
pub struct Truststore {
    #[command(subcommand)]
    command: TruststoreCommand,
}

#[derive(Clone, Debug, clap::Subcommand)]
pub enum TruststoreCommand {
    /// List the keys of others
    #[command(name = "list")]
    List,

    /// Trust a key
    ///
    /// A key can only be trusted once validated.  Pass a DNS message in wire
    /// format signed with SIG(0) by the key to validate it.
    #[command(name = "trust")]
    Trust {
        #[command(flatten)]
        key: KeyArgs,

        /// A message signed by the key
        #[arg(long = "evidence", value_name = "PATH")]
        evidence: Option<Utf8PathBuf>,
    },

    /// Stop trusting a key
    #[command(name = "untrust")]
    Untrust(KeyArgs),

    /// Add a public KEY or DNSKEY record from a file
    #[command(name = "import")]
    Import {
        /// The file holding the record in zone file format
        public: Utf8PathBuf,

        /// A message signed by the key
        #[arg(long = "evidence", value_name = "PATH")]
        evidence: Option<Utf8PathBuf>,
    },
}

impl Truststore {
    pub fn operation(self) -> Result<Operation, CommandError> {
        Ok(match self.command {
            TruststoreCommand::List => Operation::TrustList,
            TruststoreCommand::Trust { key, evidence } => Operation::Trust {
                key: key.into(),
                evidence: evidence.as_deref().map(read_bytes).transpose()?,
            },
            TruststoreCommand::Untrust(key) => Operation::Untrust(key.into()),
            TruststoreCommand::Import { public, evidence } => Operation::TrustImport {
                public: read_text(&public)?,
                evidence: evidence.as_deref().map(read_bytes).transpose()?,
            },
        })
    }
}
