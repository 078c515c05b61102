//! Transaction confirmation tracker
//!
//! Drives every submitted trade to a terminal status by polling signature
//! statuses, then applies the confirmation side effects: actual-output
//! parsing, trade row update, trade log entry/exit, position bookkeeping,
//! and a position event for the strategy evaluator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::signature::Signature;
use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::{
    TransactionConfirmationStatus, TransactionStatus, UiTransactionEncoding,
    UiTransactionTokenBalance,
};
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::breaker::CircuitBreaker;
use crate::config::{TrackerConfig, TradingConfig};
use crate::error::{Error, Result};
use crate::position::PositionBook;
use crate::storage::{TradeRow, TradeStatus, TradeStore, TradeUpdate};

use super::PAPER_TRADE_PREFIX;

const MAX_POLL_DELAY: Duration = Duration::from_secs(30);
const POLL_BACKOFF_FACTOR: f64 = 1.5;

/// Confirmed-trade notification consumed by the strategy evaluator
#[derive(Debug, Clone)]
pub struct PositionEvent {
    pub token_mint: String,
    pub kind: PositionEventKind,
    pub trade_id: i64,
    /// Fill price in SOL per token, when derivable
    pub price_sol: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionEventKind {
    BuyConfirmed,
    SellConfirmed,
}

/// Outcome of interpreting one signature status response
#[derive(Debug, Clone, PartialEq)]
enum PollOutcome {
    /// Not yet visible to the RPC; counts against the retry budget
    NotFound,
    /// Seen but below the confirmation threshold
    Propagating,
    Failed(String),
    Confirmed,
}

fn interpret_status(status: Option<&TransactionStatus>) -> PollOutcome {
    let Some(status) = status else {
        return PollOutcome::NotFound;
    };
    if let Some(err) = &status.err {
        return PollOutcome::Failed(format!("{err:?}"));
    }
    match status.confirmation_status {
        Some(TransactionConfirmationStatus::Confirmed)
        | Some(TransactionConfirmationStatus::Finalized) => PollOutcome::Confirmed,
        // Processed only, or no status yet
        _ => PollOutcome::Propagating,
    }
}

/// Owner/mint/amount view of one token balance row in transaction meta
#[derive(Debug, Clone)]
struct TokenBalanceView {
    mint: String,
    owner: Option<String>,
    ui_amount: Option<f64>,
}

impl TokenBalanceView {
    fn from_ui(balance: &UiTransactionTokenBalance) -> Self {
        let owner = match &balance.owner {
            OptionSerializer::Some(owner) => Some(owner.clone()),
            _ => None,
        };
        Self {
            mint: balance.mint.clone(),
            owner,
            ui_amount: balance.ui_token_amount.ui_amount,
        }
    }
}

/// Received amount of `mint` for `owner`: post balance minus pre balance.
/// Returns None when the delta cannot be established.
fn balance_delta(
    pre: &[TokenBalanceView],
    post: &[TokenBalanceView],
    owner: &str,
    mint: &str,
) -> Option<f64> {
    let find = |rows: &[TokenBalanceView]| {
        rows.iter()
            .find(|b| b.mint == mint && b.owner.as_deref() == Some(owner))
            .and_then(|b| b.ui_amount)
    };
    let pre_amount = find(pre).unwrap_or(0.0);
    let post_amount = find(post)?;
    let delta = post_amount - pre_amount;
    (delta > 0.0).then_some(delta)
}

struct RetryState {
    attempts: u32,
    next_check: Instant,
}

/// Tracks submitted trades to a terminal status
pub struct TransactionTracker {
    rpc: Arc<RpcClient>,
    store: TradeStore,
    book: Arc<PositionBook>,
    trading: TradingConfig,
    config: TrackerConfig,
    breaker: Arc<CircuitBreaker>,
    owner_pubkey: String,
    // One poll cycle at a time; handlers for the same trade never interleave
    cycle_lock: Mutex<()>,
    retry_state: Mutex<HashMap<i64, RetryState>>,
    events: broadcast::Sender<PositionEvent>,
}

impl TransactionTracker {
    pub fn new(
        rpc: Arc<RpcClient>,
        store: TradeStore,
        book: Arc<PositionBook>,
        trading: TradingConfig,
        config: TrackerConfig,
        breaker: Arc<CircuitBreaker>,
        owner_pubkey: String,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            rpc,
            store,
            book,
            trading,
            config,
            breaker,
            owner_pubkey,
            cycle_lock: Mutex::new(()),
            retry_state: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Subscribe to confirmed-trade position events
    pub fn subscribe(&self) -> broadcast::Receiver<PositionEvent> {
        self.events.subscribe()
    }

    /// Run the poll loop until cancelled
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            tick_secs = self.config.tick_interval_secs,
            max_retries = self.config.tx_confirm_max_retries,
            "transaction tracker started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(self.config.tick_interval_secs)) => {
                    if let Err(e) = self.check_pending().await {
                        error!("tracker cycle failed: {e}");
                        self.breaker.increment_failures();
                    }
                }
            }
        }
        info!("transaction tracker stopped");
    }

    /// Drain: poll until no submitted trades remain or the timeout elapses.
    /// Used by the shutdown sequence; remaining trades are left as-is for a
    /// follow-up run to reconcile.
    pub async fn drain(&self, timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        loop {
            self.check_pending().await?;
            let remaining = self.store.get_pending_trades().await?.len();
            if remaining == 0 {
                return Ok(0);
            }
            if Instant::now() >= deadline {
                warn!(remaining, "tracker drain timed out");
                return Ok(remaining);
            }
            tokio::time::sleep(Duration::from_secs_f64(self.config.tx_confirm_delay_secs)).await;
        }
    }

    /// One poll cycle over every submitted trade. Distinct signatures are
    /// polled in parallel; the cycle itself is serialized.
    pub async fn check_pending(&self) -> Result<()> {
        let _cycle = self.cycle_lock.lock().await;

        let pending = self.store.get_pending_trades().await?;
        if pending.is_empty() {
            return Ok(());
        }
        debug!("checking {} pending trade(s)", pending.len());

        let results = join_all(pending.iter().map(|trade| self.check_single(trade))).await;
        for (trade, result) in pending.iter().zip(results) {
            if let Err(e) = result {
                warn!(trade_id = trade.trade_id, "status check failed: {e}");
                self.breaker.increment_failures();
            }
        }
        Ok(())
    }

    async fn check_single(&self, trade: &TradeRow) -> Result<()> {
        let Some(hash) = trade.transaction_hash.clone() else {
            warn!(trade_id = trade.trade_id, "submitted trade without hash");
            return Ok(());
        };

        // Paper fills never touch the RPC
        if hash.starts_with(PAPER_TRADE_PREFIX) {
            self.store
                .update_trade_status(
                    trade.trade_id,
                    TradeStatus::PaperCompleted,
                    TradeUpdate::default(),
                )
                .await?;
            return Ok(());
        }

        // Honor the per-signature backoff window
        {
            let state = self.retry_state.lock().await;
            if let Some(retry) = state.get(&trade.trade_id) {
                if Instant::now() < retry.next_check {
                    return Ok(());
                }
            }
        }

        let signature: Signature = hash.parse().map_err(|_| {
            Error::TransactionFailed(format!("invalid signature format: {hash}"))
        })?;

        let response = self
            .rpc
            .get_signature_statuses_with_history(&[signature])
            .await?;
        let status = response.value.first().and_then(|s| s.as_ref());

        match interpret_status(status) {
            PollOutcome::NotFound => self.note_attempt(trade, &hash).await,
            PollOutcome::Propagating => {
                debug!(trade_id = trade.trade_id, "awaiting confirmation");
                Ok(())
            }
            PollOutcome::Failed(err) => {
                error!(trade_id = trade.trade_id, "transaction failed on-chain: {err}");
                self.clear_retry(trade.trade_id).await;
                self.store
                    .update_trade_status(
                        trade.trade_id,
                        TradeStatus::Failed,
                        TradeUpdate {
                            error_message: Some(err),
                            ..Default::default()
                        },
                    )
                    .await?;
                Ok(())
            }
            PollOutcome::Confirmed => {
                self.clear_retry(trade.trade_id).await;
                let actual_output = self.fetch_actual_output(trade, &signature).await;
                self.finalize_confirmed(trade, actual_output).await?;
                self.breaker.reset_failures();
                Ok(())
            }
        }
    }

    /// Count a not-found poll against the retry budget
    async fn note_attempt(&self, trade: &TradeRow, hash: &str) -> Result<()> {
        let attempts = {
            let mut state = self.retry_state.lock().await;
            let retry = state.entry(trade.trade_id).or_insert(RetryState {
                attempts: 0,
                next_check: Instant::now(),
            });
            retry.attempts += 1;
            let delay = Duration::from_secs_f64(
                self.config.tx_confirm_delay_secs
                    * POLL_BACKOFF_FACTOR.powi(retry.attempts as i32),
            )
            .min(MAX_POLL_DELAY);
            retry.next_check = Instant::now() + delay;
            retry.attempts
        };

        if attempts >= self.config.tx_confirm_max_retries {
            warn!(
                trade_id = trade.trade_id,
                attempts, "confirmation retries exhausted"
            );
            self.clear_retry(trade.trade_id).await;
            self.store
                .update_trade_status(
                    trade.trade_id,
                    TradeStatus::Failed,
                    TradeUpdate {
                        error_message: Some(
                            Error::ConfirmationTimeout {
                                signature: hash.to_string(),
                                attempts,
                            }
                            .to_string(),
                        ),
                        ..Default::default()
                    },
                )
                .await?;
        } else {
            debug!(trade_id = trade.trade_id, attempts, "signature not yet found");
        }
        Ok(())
    }

    async fn clear_retry(&self, trade_id: i64) {
        self.retry_state.lock().await.remove(&trade_id);
    }

    /// Best-effort actual output from the transaction's pre/post token
    /// balances. Absence is non-fatal.
    async fn fetch_actual_output(&self, trade: &TradeRow, signature: &Signature) -> Option<f64> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::JsonParsed),
            commitment: Some(CommitmentConfig::confirmed()),
            max_supported_transaction_version: Some(0),
        };
        let tx = match self.rpc.get_transaction_with_config(signature, config).await {
            Ok(tx) => tx,
            Err(e) => {
                debug!(trade_id = trade.trade_id, "could not fetch transaction meta: {e}");
                return None;
            }
        };
        let meta = tx.transaction.meta?;

        let pre: Vec<TokenBalanceView> = match &meta.pre_token_balances {
            OptionSerializer::Some(balances) => {
                balances.iter().map(TokenBalanceView::from_ui).collect()
            }
            _ => Vec::new(),
        };
        let post: Vec<TokenBalanceView> = match &meta.post_token_balances {
            OptionSerializer::Some(balances) => {
                balances.iter().map(TokenBalanceView::from_ui).collect()
            }
            _ => Vec::new(),
        };

        balance_delta(&pre, &post, &self.owner_pubkey, &trade.output_mint)
    }

    /// Apply confirmation side effects. Idempotent: replaying on an
    /// already-confirmed trade is a no-op because the status transition
    /// deduplicates.
    pub(crate) async fn finalize_confirmed(
        &self,
        trade: &TradeRow,
        actual_output: Option<f64>,
    ) -> Result<()> {
        let transitioned = self
            .store
            .update_trade_status(
                trade.trade_id,
                TradeStatus::Confirmed,
                TradeUpdate {
                    actual_output_amount: actual_output,
                    ..Default::default()
                },
            )
            .await?;
        if !transitioned {
            debug!(trade_id = trade.trade_id, "confirmation replay ignored");
            return Ok(());
        }

        let hash = trade.transaction_hash.clone().unwrap_or_default();
        let strategy = trade.strategy.clone();
        info!(trade_id = trade.trade_id, signature = %hash, "trade confirmed");

        let is_buy = self.trading.is_quote_mint(&trade.input_mint)
            && !self.trading.is_quote_mint(&trade.output_mint);
        let is_sell = self.trading.is_quote_mint(&trade.output_mint)
            && !self.trading.is_quote_mint(&trade.input_mint);

        if is_buy {
            let quantity = actual_output.unwrap_or(0.0);
            // Entry price in SOL per token, when the fill quantity is known
            let price_sol = (quantity > 0.0).then(|| trade.input_amount / quantity);

            self.store
                .log_trade_entry(
                    trade.trade_id,
                    &trade.output_mint,
                    price_sol.unwrap_or(0.0),
                    quantity,
                    &hash,
                    strategy.as_deref(),
                )
                .await?;

            if quantity > 0.0 {
                let strategy_name = strategy.as_deref().unwrap_or("unknown");
                self.store
                    .apply_confirmed_buy(
                        &trade.output_mint,
                        quantity,
                        price_sol.unwrap_or(0.0),
                        strategy_name,
                        &hash,
                    )
                    .await?;
                self.book
                    .apply_buy(
                        &trade.output_mint,
                        quantity,
                        price_sol.unwrap_or(0.0),
                        strategy_name,
                        &hash,
                    )
                    .await;
            }

            let _ = self.events.send(PositionEvent {
                token_mint: trade.output_mint.clone(),
                kind: PositionEventKind::BuyConfirmed,
                trade_id: trade.trade_id,
                price_sol,
            });
        } else if is_sell {
            let proceeds_sol = actual_output.unwrap_or(0.0);
            let price_sol =
                (trade.input_amount > 0.0).then(|| proceeds_sol / trade.input_amount);

            self.store
                .log_trade_exit(
                    trade.trade_id,
                    &trade.input_mint,
                    price_sol.unwrap_or(0.0),
                    trade.input_amount,
                    &hash,
                    trade.exit_reason().as_deref(),
                    trade.entry_tx_hash().as_deref(),
                )
                .await?;

            self.store
                .apply_confirmed_sell(&trade.input_mint, trade.input_amount)
                .await?;
            self.book
                .apply_sell(&trade.input_mint, trade.input_amount, price_sol.unwrap_or(0.0))
                .await;

            let _ = self.events.send(PositionEvent {
                token_mint: trade.input_mint.clone(),
                kind: PositionEventKind::SellConfirmed,
                trade_id: trade.trade_id,
                price_sol,
            });
        } else {
            // Neither side is a quote asset; no position bookkeeping
            debug!(
                trade_id = trade.trade_id,
                "confirmed trade is not a quote-asset pair, skipping position update"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerScope;
    use crate::config::WSOL_MINT;
    use crate::storage::NewTrade;

    fn status(
        err: Option<solana_sdk::transaction::TransactionError>,
        confirmation: Option<TransactionConfirmationStatus>,
    ) -> TransactionStatus {
        TransactionStatus {
            slot: 1,
            confirmations: None,
            status: if err.is_some() {
                Err(solana_sdk::transaction::TransactionError::AccountNotFound)
            } else {
                Ok(())
            },
            err,
            confirmation_status: confirmation,
        }
    }

    #[test]
    fn test_interpret_status_variants() {
        assert_eq!(interpret_status(None), PollOutcome::NotFound);
        assert_eq!(
            interpret_status(Some(&status(None, None))),
            PollOutcome::Propagating
        );
        assert_eq!(
            interpret_status(Some(&status(
                None,
                Some(TransactionConfirmationStatus::Processed)
            ))),
            PollOutcome::Propagating
        );
        assert_eq!(
            interpret_status(Some(&status(
                None,
                Some(TransactionConfirmationStatus::Confirmed)
            ))),
            PollOutcome::Confirmed
        );
        assert_eq!(
            interpret_status(Some(&status(
                None,
                Some(TransactionConfirmationStatus::Finalized)
            ))),
            PollOutcome::Confirmed
        );
        assert!(matches!(
            interpret_status(Some(&status(
                Some(solana_sdk::transaction::TransactionError::AccountNotFound),
                Some(TransactionConfirmationStatus::Confirmed)
            ))),
            PollOutcome::Failed(_)
        ));
    }

    #[test]
    fn test_balance_delta() {
        let view = |mint: &str, owner: &str, amount: f64| TokenBalanceView {
            mint: mint.to_string(),
            owner: Some(owner.to_string()),
            ui_amount: Some(amount),
        };

        let pre = vec![view("MintT", "Owner", 100.0)];
        let post = vec![view("MintT", "Owner", 1100.0)];
        assert_eq!(balance_delta(&pre, &post, "Owner", "MintT"), Some(1000.0));

        // No prior balance: the whole post amount was received
        let post_only = vec![view("MintT", "Owner", 500.0)];
        assert_eq!(balance_delta(&[], &post_only, "Owner", "MintT"), Some(500.0));

        // Wrong owner or decreasing balance yields nothing
        assert_eq!(balance_delta(&pre, &post, "Other", "MintT"), None);
        let decreased = vec![view("MintT", "Owner", 50.0)];
        assert_eq!(balance_delta(&pre, &decreased, "Owner", "MintT"), None);
    }

    async fn tracker_harness() -> (Arc<TransactionTracker>, TradeStore, Arc<PositionBook>) {
        let store = TradeStore::connect("sqlite::memory:").await.unwrap();
        let book = Arc::new(PositionBook::new());
        let breaker = Arc::new(CircuitBreaker::new(
            BreakerScope::Component,
            "transaction_tracker",
            20,
            Duration::from_secs(120),
        ));
        let rpc = Arc::new(RpcClient::new("http://127.0.0.1:1".to_string()));
        let tracker = Arc::new(TransactionTracker::new(
            rpc,
            store.clone(),
            book.clone(),
            TradingConfig::default(),
            TrackerConfig::default(),
            breaker,
            "OwnerPubkey".to_string(),
        ));
        (tracker, store, book)
    }

    async fn submitted_trade(
        store: &TradeStore,
        input: &str,
        output: &str,
        amount: f64,
        metadata: serde_json::Value,
    ) -> TradeRow {
        let id = store
            .insert_trade(&NewTrade {
                input_mint: input.to_string(),
                output_mint: output.to_string(),
                input_amount: amount,
                input_decimals: 9,
                strategy: Some("momentum".to_string()),
                metadata,
            })
            .await
            .unwrap();
        store
            .update_trade_status(
                id,
                TradeStatus::Submitted,
                TradeUpdate {
                    transaction_hash: Some(format!("sig_{id}")),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store.get_trade(id).await.unwrap()
    }

    #[tokio::test]
    async fn test_confirmed_buy_side_effects() {
        let (tracker, store, book) = tracker_harness().await;
        let trade =
            submitted_trade(&store, WSOL_MINT, "MintT", 1.0, serde_json::Value::Null).await;
        let mut events = tracker.subscribe();

        tracker
            .finalize_confirmed(&trade, Some(1000.0))
            .await
            .unwrap();

        let row = store.get_trade(trade.trade_id).await.unwrap();
        assert_eq!(row.status(), TradeStatus::Confirmed);
        assert_eq!(row.actual_output_amount, Some(1000.0));

        let position = store.get_position("MintT").await.unwrap().unwrap();
        assert!((position.amount - 1000.0).abs() < 1e-9);
        assert!((position.entry_price_sol - 0.001).abs() < 1e-12);
        assert!(book.has_open("MintT").await);

        let event = events.try_recv().unwrap();
        assert_eq!(event.kind, PositionEventKind::BuyConfirmed);
        assert_eq!(event.token_mint, "MintT");
    }

    #[tokio::test]
    async fn test_confirmation_replay_is_noop() {
        let (tracker, store, _book) = tracker_harness().await;
        let trade =
            submitted_trade(&store, WSOL_MINT, "MintT", 1.0, serde_json::Value::Null).await;
        let mut events = tracker.subscribe();

        tracker
            .finalize_confirmed(&trade, Some(1000.0))
            .await
            .unwrap();
        tracker
            .finalize_confirmed(&trade, Some(2000.0))
            .await
            .unwrap();

        // Exactly one event, original output amount retained
        assert!(events.try_recv().is_ok());
        assert!(events.try_recv().is_err());
        let row = store.get_trade(trade.trade_id).await.unwrap();
        assert_eq!(row.actual_output_amount, Some(1000.0));

        let position = store.get_position("MintT").await.unwrap().unwrap();
        assert!((position.amount - 1000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_confirmed_sell_links_entry_and_reduces_position() {
        let (tracker, store, book) = tracker_harness().await;

        // Seed an open position as if a buy had confirmed earlier
        store
            .apply_confirmed_buy("MintT", 1000.0, 0.001, "momentum", "sig_entry")
            .await
            .unwrap();
        book.apply_buy("MintT", 1000.0, 0.001, "momentum", "sig_entry")
            .await;

        let metadata = serde_json::json!({
            "exit_reason": "take_profit",
            "entry_tx_hash": "sig_entry"
        });
        let trade = submitted_trade(&store, "MintT", WSOL_MINT, 1000.0, metadata).await;
        let mut events = tracker.subscribe();

        tracker.finalize_confirmed(&trade, Some(1.2)).await.unwrap();

        let position = store.get_position("MintT").await.unwrap().unwrap();
        assert_eq!(position.state().as_str(), "closed");
        assert!(!book.has_open("MintT").await);

        let event = events.try_recv().unwrap();
        assert_eq!(event.kind, PositionEventKind::SellConfirmed);

        let (exit_reason, entry_hash): (Option<String>, Option<String>) = sqlx::query_as(
            "SELECT exit_reason, entry_tx_hash FROM trade_log WHERE kind = 'exit' AND token_address = 'MintT'",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(exit_reason.as_deref(), Some("take_profit"));
        assert_eq!(entry_hash.as_deref(), Some("sig_entry"));
    }

    #[tokio::test]
    async fn test_paper_sentinel_short_circuits() {
        let (tracker, store, _book) = tracker_harness().await;
        let id = store
            .insert_trade(&NewTrade {
                input_mint: WSOL_MINT.to_string(),
                output_mint: "MintT".to_string(),
                input_amount: 1.0,
                input_decimals: 9,
                strategy: None,
                metadata: serde_json::Value::Null,
            })
            .await
            .unwrap();
        store
            .update_trade_status(
                id,
                TradeStatus::Submitted,
                TradeUpdate {
                    transaction_hash: Some(format!("{PAPER_TRADE_PREFIX}{id}")),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        tracker.check_pending().await.unwrap();

        let row = store.get_trade(id).await.unwrap();
        assert_eq!(row.status(), TradeStatus::PaperCompleted);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_marks_failed() {
        let (tracker, store, _book) = tracker_harness().await;
        let trade =
            submitted_trade(&store, WSOL_MINT, "MintT", 1.0, serde_json::Value::Null).await;
        let hash = trade.transaction_hash.clone().unwrap();

        for _ in 0..TrackerConfig::default().tx_confirm_max_retries {
            // Bypass the backoff window so every call counts an attempt
            tracker.retry_state.lock().await.entry(trade.trade_id).and_modify(|r| {
                r.next_check = Instant::now();
            });
            tracker.note_attempt(&trade, &hash).await.unwrap();
        }

        let row = store.get_trade(trade.trade_id).await.unwrap();
        assert_eq!(row.status(), TradeStatus::Failed);
        assert!(row.error_message.unwrap().contains("timeout"));
    }
}
