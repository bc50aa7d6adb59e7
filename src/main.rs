//! pypredef-gen CLI entry point.

use clap::Parser;
use pypredef_gen::cli::{self, Cli, EXIT_ERROR, EXIT_SUCCESS};

fn main() {
    let cli = Cli::parse();

    let exit_code = match cli::run(&cli) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            EXIT_ERROR
        }
    };

    std::process::exit(exit_code);
}
