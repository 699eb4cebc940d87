// harden/src/main.rs
//! Harden entry point.
//!
//! Parses the command line, sets up logging and runs the installation
//! pipeline. Any failure is reported on stderr with a nonzero exit status.

use clap::Parser;
use is_terminal::IsTerminal;
use std::io;
use std::process::ExitCode;

use harden::cli::Cli;
use harden::commands::install::{self, InstallOptions};
use harden::logger;
use harden::ui::output_format;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logger::init_logger(logger::level_for(cli.quiet, cli.debug_level));

    let result = match InstallOptions::from_cli(cli) {
        Ok(opts) => install::run_install(&opts).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(outcome) => {
            install::print_summary(&outcome);
            ExitCode::SUCCESS
        }
        Err(e) => {
            let stderr = io::stderr();
            let supports_color = stderr.is_terminal();
            let _ = output_format::print_error_message(&mut stderr.lock(), &format!("{:#}", e), supports_color);
            ExitCode::FAILURE
        }
    }
}
