//! CLI entry point for strata.

mod cli;
mod commands;
mod output;

use clap::Parser;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    output::init(cli.output);

    // Logs go to stderr so JSON output stays parseable.
    if let Err(e) = strata_observability::init_from_env() {
        output::warning(&format!("tracing disabled: {e}"));
    }

    if let Err(e) = commands::handle(cli).await {
        output::error(&e.to_string());
        std::process::exit(1);
    }
}
