use domain::base::Rtype;

use crate::dsync::Scheme;
use crate::operation::Operation;

use super::{parse_rtype, ZoneArgs};

#[derive(Clone, Debug, clap::Args)]
pub struct Dsync {
    #[command(subcommand)]
    command: DsyncCommand,
}

#[derive(Clone, Debug, clap::Subcommand)]
pub enum DsyncCommand {
    /// Show the parent's target for a kind of message
    #[command(name = "query")]
    Query {
        #[command(flatten)]
        zone: ZoneArgs,

        /// The record type the message is about
        #[arg(long = "trigger", value_name = "TYPE", default_value = "NS", value_parser = parse_rtype)]
        trigger: Rtype,

        /// How the message is delivered: "notify" or "update"
        #[arg(long = "scheme", default_value = "update")]
        scheme: Scheme,
    },
}

impl Dsync {
    pub fn operation(self) -> Operation {
        match self.command {
            DsyncCommand::Query {
                zone,
                trigger,
                scheme,
            } => Operation::DsyncQuery {
                zone: zone.into(),
                trigger,
                scheme,
            },
        }
    }
}
