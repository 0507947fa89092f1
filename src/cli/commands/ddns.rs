use crate::operation::Operation;

use super::ZoneArgs;

#[derive(Clone, Debug, clap::Args)]
pub struct Ddns {
    #[command(subcommand)]
    command: DdnsCommand,
}

#[derive(Clone, Debug, clap::Subcommand)]
pub enum DdnsCommand {
    /// Compare the child's delegation with the parent's
    #[command(name = "status")]
    Status(ZoneArgs),

    /// Send the parent a signed update if the delegation differs
    #[command(name = "sync")]
    Sync(ZoneArgs),

    /// Publish the child's SIG(0) key at the parent
    #[command(name = "upload")]
    Upload {
        #[command(flatten)]
        zone: ZoneArgs,

        /// The key to upload instead of the active signing key
        #[arg(long = "keyid")]
        keyid: Option<u16>,
    },

    /// Replace the child's SIG(0) key at the parent
    #[command(name = "rollover")]
    Rollover {
        #[command(flatten)]
        zone: ZoneArgs,

        /// The key tag of the current key
        #[arg(long = "old")]
        old: u16,

        /// The key tag of the key replacing it
        #[arg(long = "new")]
        new: u16,
    },
}

impl Ddns {
    pub fn operation(self) -> Operation {
        match self.command {
            DdnsCommand::Status(zone) => Operation::DelegationStatus(zone.into()),
            DdnsCommand::Sync(zone) => Operation::DelegationSync(zone.into()),
            DdnsCommand::Upload { zone, keyid } => Operation::KeyUpload {
                zone: zone.into(),
                keyid,
            },
            DdnsCommand::Rollover { zone, old, new } => Operation::KeyRollover {
                zone: zone.into(),
                old,
                new,
            },
        }
    }
}
