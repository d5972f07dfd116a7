use std::process::ExitCode;

use clap::Parser;

use apiwarden::cli::{self, Cli, logging};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();
    logging::init(logging::Verbosity::from_flags(args.verbose, args.quiet), args.no_color);

    match cli::run(args).await {
        Ok(outcome) if outcome.has_failures() => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(target: "apiwarden.cli", error = %err, "run aborted");
            eprintln!("error: {err}");
            ExitCode::from(2)
        }
    }
}
