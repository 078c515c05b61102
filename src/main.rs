//! Supertrade Engine - autonomous Solana token trading
//!
//! # WARNING
//! - This engine trades with real money. Only use funds you can afford to lose.
//! - Paper trading mode is strongly recommended before going live.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use supertrade::breaker::Component;
use supertrade::config::Config;
use supertrade::context::AppContext;
use supertrade::market::{LastPriceCache, NoMetrics, PriceEvent, PriceSource};
use supertrade::position::PositionBook;
use supertrade::queue::{TradePriority, TradeQueue, TradeRequest};
use supertrade::strategy::{Signal, SignalAction, StrategyEvaluator, StrategyKind};
use supertrade::trading::aggregator::AggregatorClient;
use supertrade::trading::order_manager::{LiveExecutor, OrderManager};
use supertrade::trading::paper::PaperExecutor;
use supertrade::trading::tracker::TransactionTracker;
use supertrade::validator::TradeValidator;
use supertrade::wallet::TradingWallet;

/// Supertrade Engine - autonomous Solana token trading
#[derive(Parser)]
#[command(name = "supertrade")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the trading engine
    Start {
        /// Force paper-trading mode regardless of configuration
        #[arg(long)]
        paper: bool,
    },

    /// Enqueue CRITICAL sells for every open position, then drain
    CloseAll,

    /// Show open positions and pending trades
    Status,

    /// Show current configuration (secrets masked)
    Config,
}

// One event loop runs every component; parallelism comes from overlapping
// I/O waits, not threads
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "supertrade=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(&cli.config).context("Failed to load configuration")?;

    match cli.command {
        Commands::Start { paper } => {
            if paper {
                config.trading.paper_trading_enabled = true;
            }
            start(config).await
        }
        Commands::CloseAll => close_all(config).await,
        Commands::Status => status(config).await,
        Commands::Config => {
            println!("{}", config.masked_display());
            Ok(())
        }
    }
}

/// Everything the running engine is made of
struct Engine {
    ctx: AppContext,
    book: Arc<PositionBook>,
    prices: Arc<LastPriceCache>,
    queue: TradeQueue,
    tracker: Arc<TransactionTracker>,
}

/// Wire the component graph top-down from the shared context
async fn build_engine(config: Config) -> Result<Engine> {
    let ctx = AppContext::init(config).await?;

    let wallet = Arc::new(
        TradingWallet::load(&ctx.config.wallet.keypair_path)
            .context("Failed to load trading wallet")?,
    );

    let book = Arc::new(PositionBook::new());
    book.refresh_from_store(&ctx.store).await?;

    let prices = Arc::new(LastPriceCache::new());
    let validator = Arc::new(TradeValidator::new(
        ctx.config.validation.clone(),
        ctx.config.trading.clone(),
        Arc::new(NoMetrics),
        book.clone(),
    ));

    let aggregator = AggregatorClient::new(ctx.config.aggregator.clone(), ctx.http.clone());
    let live = Arc::new(LiveExecutor::new(
        aggregator,
        ctx.rpc.clone(),
        wallet.clone(),
        ctx.store.clone(),
        ctx.config.trading.clone(),
    ));
    let paper = Arc::new(PaperExecutor::new(
        ctx.store.clone(),
        book.clone(),
        prices.clone() as Arc<dyn PriceSource>,
        ctx.config.trading.clone(),
    ));

    let order_manager = Arc::new(OrderManager::new(
        live,
        paper,
        validator,
        ctx.store.clone(),
        ctx.config.trading.clone(),
        wallet.clone(),
        ctx.rpc.clone(),
        ctx.breakers.component(Component::OrderManager),
        ctx.breakers.global(),
    ));

    let tracker = Arc::new(TransactionTracker::new(
        ctx.rpc.clone(),
        ctx.store.clone(),
        book.clone(),
        ctx.config.trading.clone(),
        ctx.config.tracker.clone(),
        ctx.breakers.component(Component::TransactionTracker),
        wallet.pubkey().to_string(),
    ));

    let queue = TradeQueue::new(
        ctx.breakers.clone(),
        order_manager,
        Duration::from_secs_f64(ctx.config.trading.inter_trade_delay_secs),
    );

    Ok(Engine {
        ctx,
        book,
        prices,
        queue,
        tracker,
    })
}

async fn start(config: Config) -> Result<()> {
    if config.trading.paper_trading_enabled {
        info!("paper trading mode is ENABLED");
    } else {
        warn!("LIVE trading mode - real funds at risk");
    }

    let engine = build_engine(config).await?;
    let cancel = CancellationToken::new();

    // Price events arrive from the external monitor on this channel
    let (price_tx, price_rx) = mpsc::channel::<PriceEvent>(1024);
    // Retained for the scanner integration seam; the engine owns the receiver
    let _price_tx = price_tx;

    let tracker_task = tokio::spawn(engine.tracker.clone().run(cancel.clone()));

    let evaluator = StrategyEvaluator::new(
        engine.ctx.config.strategy.clone(),
        engine
            .ctx
            .breakers
            .component(Component::StrategyEvaluator),
    );
    let strategy_task = tokio::spawn(run_strategy_loop(
        evaluator,
        price_rx,
        engine.tracker.clone(),
        engine.queue.clone(),
        engine.book.clone(),
        engine.prices.clone(),
        engine.ctx.config.strategy.evaluation_interval_secs,
        engine.ctx.config.trading.trade_amount_usd,
        cancel.clone(),
    ));

    info!("engine started; press Ctrl-C to shut down");
    tokio::signal::ctrl_c().await.ok();
    info!("shutdown signal received");

    // Ordered shutdown: stop admissions, flush in-flight work, drain the
    // tracker. Remaining submitted trades are reconciled on the next run.
    engine.queue.close();
    engine.queue.drain().await;
    cancel.cancel();
    let remaining = engine
        .tracker
        .drain(Duration::from_secs(30))
        .await
        .unwrap_or_default();
    if remaining > 0 {
        warn!(remaining, "trades left submitted; next run will reconcile");
    }

    strategy_task.abort();
    tracker_task.abort();
    info!("shutdown complete");
    Ok(())
}

/// Consume price and position events, evaluate, and enqueue trades
#[allow(clippy::too_many_arguments)]
async fn run_strategy_loop(
    mut evaluator: StrategyEvaluator,
    mut price_rx: mpsc::Receiver<PriceEvent>,
    tracker: Arc<TransactionTracker>,
    queue: TradeQueue,
    book: Arc<PositionBook>,
    prices: Arc<LastPriceCache>,
    evaluation_interval_secs: u64,
    trade_amount_usd: f64,
    cancel: CancellationToken,
) {
    let mut position_events = tracker.subscribe();
    let mut ticker =
        tokio::time::interval(Duration::from_secs(evaluation_interval_secs.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = price_rx.recv() => {
                let Some(event) = event else { break };
                prices.record(&event);
                book.update_price(&event.token_mint, event.price_sol).await;

                // First event for a new token elects it as the active context
                if evaluator.active_mint().is_none() {
                    evaluator.set_active_mint(
                        event.token_mint.clone(),
                        "",
                        event.source_tag.clone(),
                        StrategyKind::Default,
                    );
                }

                process_event(&mut evaluator, &event, &queue, &book, trade_amount_usd).await;
            }
            event = position_events.recv() => {
                match event {
                    Ok(event) => evaluator.on_position_event(&event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "position event stream lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = ticker.tick() => {
                // Periodic re-evaluation at the latest price, so a quiet
                // feed still trips exit thresholds
                let Some(mint) = evaluator.active_mint().map(str::to_string) else {
                    continue;
                };
                let Ok(Some(price_sol)) = prices.price_sol(&mint).await else {
                    continue;
                };
                let price_usd = prices.price_usd(&mint).await.ok().flatten();
                let event = PriceEvent {
                    token_mint: mint,
                    price_sol,
                    price_usd,
                    timestamp: chrono::Utc::now(),
                    source_tag: "periodic_evaluation".to_string(),
                };
                process_event(&mut evaluator, &event, &queue, &book, trade_amount_usd).await;
            }
        }
    }
    info!("strategy loop stopped");
}

/// Evaluate one event and enqueue any actionable signal
async fn process_event(
    evaluator: &mut StrategyEvaluator,
    event: &PriceEvent,
    queue: &TradeQueue,
    book: &Arc<PositionBook>,
    trade_amount_usd: f64,
) {
    let signal = evaluator.on_price_event(event);
    if let Some(request) = signal_to_request(&signal, event, book, trade_amount_usd).await {
        if !queue.add_trade(request) {
            warn!(mint = %signal.mint, "trade request rejected by queue");
        }
    }
}

/// Convert an actionable signal into a queue request
async fn signal_to_request(
    signal: &Signal,
    event: &PriceEvent,
    book: &Arc<PositionBook>,
    trade_amount_usd: f64,
) -> Option<TradeRequest> {
    match signal.action {
        SignalAction::Hold => None,
        SignalAction::Buy => {
            // Sizing hint is USD; convert through the event's USD price
            let price_usd = event.price_usd?;
            if price_usd <= 0.0 || signal.price_sol <= 0.0 {
                return None;
            }
            let sol_price_usd = price_usd / signal.price_sol;
            let amount_sol = trade_amount_usd / sol_price_usd;

            let metadata = serde_json::json!({
                "entry_reason": signal.reason,
                "confidence": signal.confidence,
                "suggested_sl_sol": signal.suggested_sl_sol,
                "suggested_tp_sol": signal.suggested_tp_sol,
            });
            Some(
                TradeRequest::new(
                    signal.mint.clone(),
                    amount_sol,
                    true,
                    TradePriority::Medium,
                    "evaluator",
                )
                .with_metadata(metadata),
            )
        }
        SignalAction::Sell => {
            let position = book.get(&signal.mint).await?;
            let priority = if signal.confidence >= 1.0 {
                // Stop-loss exits jump the queue
                TradePriority::High
            } else {
                TradePriority::Medium
            };
            let metadata = serde_json::json!({
                "exit_reason": signal.reason,
                "confidence": signal.confidence,
                "entry_tx_hash": position.entry_tx_hash,
            });
            Some(
                TradeRequest::new(
                    signal.mint.clone(),
                    position.amount,
                    false,
                    priority,
                    position.strategy.clone(),
                )
                .with_metadata(metadata),
            )
        }
    }
}

/// Enqueue CRITICAL sells for every open position and wait for the drain
async fn close_all(config: Config) -> Result<()> {
    let engine = build_engine(config).await?;
    let positions = engine.book.all().await;
    if positions.is_empty() {
        println!("No open positions.");
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let tracker_task = tokio::spawn(engine.tracker.clone().run(cancel.clone()));

    let mut callbacks = Vec::new();
    for position in positions {
        info!(mint = %position.token_mint, amount = position.amount, "closing position");
        let (tx, rx) = oneshot::channel();
        let metadata = serde_json::json!({
            "exit_reason": "operator_close_all",
            "entry_tx_hash": position.entry_tx_hash,
        });
        let request = TradeRequest::new(
            position.token_mint.clone(),
            position.amount,
            false,
            TradePriority::Critical,
            position.strategy.clone(),
        )
        .with_metadata(metadata)
        .with_callback(tx);

        if engine.queue.add_trade(request) {
            callbacks.push((position.token_mint, rx));
        } else {
            error!(mint = %position.token_mint, "close request rejected");
        }
    }

    for (mint, rx) in callbacks {
        match rx.await {
            Ok(true) => println!("{mint}: sell submitted"),
            Ok(false) => println!("{mint}: sell FAILED"),
            Err(_) => println!("{mint}: sell dropped before dispatch"),
        }
    }

    engine.queue.close();
    let remaining = engine.tracker.drain(Duration::from_secs(60)).await?;
    cancel.cancel();
    tracker_task.abort();

    if remaining > 0 {
        warn!(remaining, "unconfirmed trades remain");
    }
    Ok(())
}

async fn status(config: Config) -> Result<()> {
    let ctx = AppContext::init(config).await?;

    let positions = ctx.store.fetch_active_positions().await?;
    println!("Open positions: {}", positions.len());
    for position in &positions {
        println!(
            "  {} amount={} entry={} SOL state={} strategy={}",
            position.token_mint,
            position.amount,
            position.entry_price_sol,
            position.state,
            position.strategy,
        );
    }

    let pending = ctx.store.get_pending_trades().await?;
    println!("Pending trades: {}", pending.len());
    for trade in &pending {
        println!(
            "  #{} {} -> {} hash={}",
            trade.trade_id,
            trade.input_mint,
            trade.output_mint,
            trade.transaction_hash.as_deref().unwrap_or("-"),
        );
    }

    let summary = ctx
        .store
        .daily_summary(chrono::Utc::now().date_naive())
        .await?;
    println!(
        "Today ({}): {} closed, {} wins / {} losses, realized P&L {:+.6} SOL",
        summary.date,
        summary.closed_trades,
        summary.wins,
        summary.losses,
        summary.realized_pnl_sol,
    );
    if summary.wins + summary.losses > 0 {
        let rate = 100.0 * summary.wins as f64 / (summary.wins + summary.losses) as f64;
        println!("  win rate: {rate:.1}%");
    }

    let active = ctx.breakers.active_snapshot();
    println!("Active breakers: {}", active.len());
    for breaker in &active {
        println!(
            "  {} {} failures={}",
            breaker.scope.as_str(),
            breaker.identifier,
            breaker.consecutive_failures,
        );
    }
    Ok(())
}
