// EN: src/bin/scriptwrap.rs

use clap::Parser;
use colored::*;
use scriptwrap::cli::{self, Cli};

/// Sets up logging, runs the request and maps the outcome to the process exit code.
fn main() {
    env_logger::init();

    match cli::run(Cli::parse()) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            // Centralized error handling: configuration and input errors end up here.
            eprintln!("\n{}: {:#}", "Error".red().bold(), e);
            std::process::exit(1);
        }
    }
}
