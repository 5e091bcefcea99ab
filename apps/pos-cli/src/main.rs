//! `minisuper` binary.

use clap::Parser;
use minisuper_pos::cli::Cli;
use minisuper_pos::{init_tracing, run};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("error: {}", e);
        std::process::exit(e.exit_code());
    }
}
