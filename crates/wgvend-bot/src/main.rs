//! Service entry point: configuration, storage, and the dispatch loop.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use wgvend_bot::config::BotConfig;
use wgvend_bot::console::{self, ConsoleGateway};
use wgvend_bot::dispatch::Dispatcher;
use wgvend_bot::listing::LedgerView;
use wgvend_core::admin::AdminDirectory;
use wgvend_core::gateway::MessagingGateway;
use wgvend_core::ledger::IssuanceLedger;
use wgvend_core::pool::FilePool;
use wgvend_core::workflow::{FastIssue, RequestWorkflow};

#[derive(Debug, Parser)]
#[command(name = "wgvend-bot", about = "WireGuard configuration issuance bot")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "wgvend.toml")]
    config: PathBuf,

    /// Log filter (overridden by RUST_LOG).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = BotConfig::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;
    config.apply_env().context("applying environment overrides")?;
    // The token is unused by the console transport but a platform adapter
    // needs it, so its absence is a startup error either way.
    let _token = config.token().context("resolving bot token")?;
    let owner = config.owner().context("resolving owner ID")?;

    let pool = Arc::new(
        FilePool::open(&config.pool_dir())
            .with_context(|| format!("opening artifact pool at {}", config.pool_dir().display()))?,
    );
    let ledger = Arc::new(
        IssuanceLedger::open(&config.db_path())
            .with_context(|| format!("opening ledger at {}", config.db_path().display()))?,
    );
    let admins = Arc::new(AdminDirectory::new(config.admins_file()));
    admins
        .bootstrap(owner)
        .context("bootstrapping admin directory")?;

    let gateway: Arc<dyn MessagingGateway> =
        Arc::new(ConsoleGateway::new(config.data_dir.join("outbox")));

    let available = pool.available_count().context("scanning artifact pool")?;
    info!(available, owner = owner.0, "service starting");
    if available == 0 {
        warn!("artifact pool is empty at startup");
        if let Err(e) = gateway.send_text(
            owner,
            "WARNING: the available configuration pool is empty!",
        ) {
            warn!("could not warn the owner about the empty pool: {e}");
        }
    }

    let workflow = Arc::new(RequestWorkflow::new(
        Arc::clone(&gateway),
        Arc::clone(&pool),
        Arc::clone(&ledger),
        owner,
        config.pending_policy.to_policy(),
    ));
    let fast = Arc::new(FastIssue::new(
        Arc::clone(&gateway),
        Arc::clone(&pool),
        Arc::clone(&ledger),
        owner,
    ));
    let listing = Arc::new(LedgerView::new(
        Arc::clone(&gateway),
        Arc::clone(&ledger),
        config.page_size,
    ));
    let dispatcher = Dispatcher::new(gateway, workflow, fast, admins, listing, owner);

    let (tx, rx) = mpsc::channel();
    let reader = thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("stdin read failed: {e}");
                    break;
                },
            };
            if let Some(event) = console::parse_line(&line) {
                if tx.send(event).is_err() {
                    break;
                }
            }
        }
        // Dropping the sender ends the dispatch loop.
    });

    dispatcher.run(&rx);
    if reader.join().is_err() {
        warn!("stdin reader thread panicked");
    }
    Ok(())
}
