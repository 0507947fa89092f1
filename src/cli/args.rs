use clap::{Parser, ValueEnum};

use crate::operation::{Engine, Response};

use super::commands::{Command, CommandError};
use super::report;

#[derive(Clone, Debug, Parser)]
#[command(version, disable_help_subcommand = true)]
pub struct Args {
    /// How to print the result
    #[arg(
        short = 'o',
        long = "output",
        value_name = "FORMAT",
        default_value = "text",
        global = true
    )]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

impl Args {
    /// Run the command and print its result.
    pub async fn execute(self, engine: &Engine) -> Result<Response, CommandError> {
        let operation = self.command.operation()?;
        let response = engine.run(operation).await;
        report::print(&response, self.output);
        Ok(response)
    }
}

/// The format results are printed in.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human readable text
    #[default]
    Text,

    /// The response envelope as JSON
    Json,
}
