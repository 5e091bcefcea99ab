//! # Minisuper POS
//!
//! Command line register for the Minisuper offline-first point of sale.
//! Every command works against the Local Store first; `sync` and
//! `daemon` talk to the server.
//!
//! ## Module Organization
//! ```text
//! minisuper_pos/
//! ├── lib.rs          ◄─── You are here (dispatch & tracing setup)
//! ├── cli.rs          ◄─── clap definitions and value parsers
//! ├── context.rs      ◄─── config + Local Store for a command
//! ├── bridge.rs       ◄─── cache worker signals → scheduler triggers
//! ├── commands/
//! │   ├── product.rs      ◄─── catalog CRUD and stock
//! │   ├── sale.rs         ◄─── ring up, cancel, refund, stats
//! │   ├── cash_session.rs ◄─── drawer open/close
//! │   ├── sync.rs         ◄─── sync, status, conflicts, retry, log
//! │   └── daemon.rs       ◄─── scheduler + cache worker until Ctrl+C
//! └── error.rs        ◄─── CliError and exit codes
//! ```

pub mod bridge;
pub mod cli;
pub mod commands;
pub mod context;
pub mod error;

use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use commands::{cash_session, daemon, product, sale, sync};
use context::AppContext;
use error::CliResult;

/// Runs one parsed command line.
pub async fn run(cli: Cli) -> CliResult<()> {
    let ctx = AppContext::open(&cli).await?;
    let result = dispatch(&ctx, cli.command).await;
    ctx.db.close().await;
    result
}

pub async fn dispatch(ctx: &AppContext, command: Command) -> CliResult<()> {
    match command {
        Command::Product(command) => product::run(ctx, command).await,
        Command::Sale(command) => sale::run(ctx, command).await,
        Command::CashSession(command) => cash_session::run(ctx, command).await,
        Command::Sync => sync::sync_now(ctx).await,
        Command::Status => sync::status(ctx).await,
        Command::Conflicts(command) => sync::conflicts(ctx, command).await,
        Command::Retry => sync::retry(ctx).await,
        Command::Log { limit } => sync::log(ctx, limit).await,
        Command::Daemon(args) => daemon::run(ctx, args).await,
    }
}

/// Logs go to stderr so `--json` output stays parseable.
pub fn init_tracing(verbose: bool) {
    let default = if verbose {
        "debug,sqlx=warn"
    } else {
        "warn,minisuper=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
