use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;

use solana_ratchet_exit::common::config::RuntimeConfig;
use solana_ratchet_exit::common::logger::{self, Logger};
use solana_ratchet_exit::universal::coordinator::Coordinator;
use solana_ratchet_exit::universal::executor::{
    DryRunExitExecutor, ExecutionMode, ExitExecutor, JupiterExitExecutor,
};
use solana_ratchet_exit::universal::positions::{CacheWriter, JsonPositionCache, PositionStore};
use solana_ratchet_exit::universal::price_feed::{FeedSubscription, JupiterPriceFeed};
use solana_ratchet_exit::universal::ratchet::ExitStrategy;
use solana_ratchet_exit::universal::webhook;

#[derive(Parser, Debug)]
#[command(name = "solana-ratchet-exit", about = "Copy-trade position tracker with ratcheting exits")]
struct Args {
    /// Exit strategy TOML; overrides EXIT_STRATEGY_PATH.
    #[arg(long)]
    strategy: Option<PathBuf>,

    /// Never send swaps, whatever EXECUTION_MODE says.
    #[arg(long)]
    dry_run: bool,

    /// Webhook port; overrides PORT.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logger::init();
    let logger = Logger::new("Main");
    let args = Args::parse();
    let cfg = RuntimeConfig::from_env()?;

    let strategy = match args.strategy.as_ref().or(cfg.exit_strategy_path.as_ref()) {
        Some(path) => ExitStrategy::from_toml_file(path)?,
        None => ExitStrategy::default(),
    };
    logger.log(format!(
        "Exit strategy: {} rungs, hard exit at {}x",
        strategy.ladder.len(),
        strategy.hard_exit_multiple
    ));

    let mode = if args.dry_run {
        ExecutionMode::DryRun
    } else {
        cfg.execution_mode()
    };
    let executor: Arc<dyn ExitExecutor> = match mode {
        ExecutionMode::Live => {
            let live = JupiterExitExecutor::from_config(&cfg)?;
            logger.log(format!("LIVE execution as {}", live.wallet()));
            Arc::new(live)
        }
        ExecutionMode::DryRun => {
            logger.log("DRY_RUN execution, no swaps will be sent");
            Arc::new(DryRunExitExecutor::new())
        }
    };

    let feed = Arc::new(JupiterPriceFeed::new(cfg.price_poll_interval())?);
    let cache = Arc::new(JsonPositionCache::new(cfg.position_cache_path.clone()));
    let store = Arc::new(
        PositionStore::new(cfg.position_cooldown_secs)
            .with_observer(Arc::new(FeedSubscription::new(feed.clone())))
            .with_observer(Arc::new(CacheWriter::spawn(cache.clone()))),
    );

    // Observers are attached, so restored positions are re-subscribed.
    store.rehydrate(cache.load()?);

    let dex_programs = cfg.dex_programs();
    if dex_programs.is_empty() {
        logger.warn("DEX_PROGRAM_IDS is empty, accepting every transaction");
    }

    let coordinator = Arc::new(
        Coordinator::new(store, strategy, executor)
            .with_feed(feed.clone())
            .with_dex_programs(dex_programs)
            .with_fee_offset(cfg.fee_offset_sol)
            .with_observer_wallet(cfg.observer_wallet.clone()),
    );

    let (tx, rx) = mpsc::channel(1024);
    tokio::spawn(feed.clone().run(tx));
    tokio::spawn(coordinator.clone().run(rx));

    webhook::serve(coordinator, args.port.unwrap_or(cfg.port)).await
}
