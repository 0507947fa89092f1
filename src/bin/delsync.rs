use std::process::ExitCode;

use clap::{CommandFactory, FromArgMatches};
use delsync::{cli::args::Args, config::Config, log::Logger, operation::Engine};
use log::error;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let logger = Logger::launch();

    let matches = Config::setup_cli(Args::command()).get_matches();
    let args = match Args::from_arg_matches(&matches) {
        Ok(args) => args,
        Err(err) => err.exit(),
    };

    let config = match Config::init(&matches) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("delsync couldn't be configured: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(logger) = logger {
        match logger.prepare(&config.logging) {
            Ok(Some(change)) => logger.apply(change),
            Ok(None) => {}
            Err(err) => {
                eprintln!("delsync couldn't set up logging: {err}");
                return ExitCode::FAILURE;
            }
        }
    }

    let engine = match Engine::launch(config) {
        Ok(engine) => engine,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    match args.execute(&engine).await {
        Ok(response) if !response.error => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}
