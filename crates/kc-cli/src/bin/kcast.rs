use std::process::ExitCode;

use clap::Parser;
use kc_cli::{init_tracing, node_cli::Cli};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);
    match kc_cli::node_cli::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("kcast: {err}");
            ExitCode::FAILURE
        }
    }
}
