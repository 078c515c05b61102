//! Order manager
//!
//! Turns a trade request into a signed, submitted swap transaction. Live
//! trades run the validation gate and the quote -> build -> sign -> submit
//! pipeline; paper trades go to the simulator. A process-wide pending set
//! guarantees a single execution per trade id.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_sdk::commitment_config::CommitmentLevel;
use solana_sdk::transaction::VersionedTransaction;
use tracing::{error, info, warn};

use crate::breaker::CircuitBreaker;
use crate::config::TradingConfig;
use crate::error::{Error, Result};
use crate::queue::TradeRequest;
use crate::storage::{NewTrade, TradeStatus, TradeStore, TradeUpdate};
use crate::validator::{TradeValidator, ValidationRequest};
use crate::wallet::TradingWallet;

use super::aggregator::AggregatorClient;
use super::{SwapExecutor, SwapRequest};

/// Live swap executor: quote, build, sign, submit
pub struct LiveExecutor {
    aggregator: AggregatorClient,
    rpc: Arc<RpcClient>,
    wallet: Arc<TradingWallet>,
    store: TradeStore,
    trading: TradingConfig,
}

impl LiveExecutor {
    pub fn new(
        aggregator: AggregatorClient,
        rpc: Arc<RpcClient>,
        wallet: Arc<TradingWallet>,
        store: TradeStore,
        trading: TradingConfig,
    ) -> Self {
        Self {
            aggregator,
            rpc,
            wallet,
            store,
            trading,
        }
    }

    fn compute_unit_price(&self) -> Option<u64> {
        if self.trading.compute_unit_price_micro_lamports > 0 {
            Some(self.trading.compute_unit_price_micro_lamports)
        } else {
            None
        }
    }

    /// Decode, sign the fee-payer slot, and submit the aggregator's
    /// versioned transaction
    async fn sign_and_submit(&self, swap_tx_base64: &str) -> Result<String> {
        let tx_bytes = BASE64
            .decode(swap_tx_base64)
            .map_err(|e| Error::TransactionDecode(format!("base64: {e}")))?;
        let mut tx: VersionedTransaction = bincode::deserialize(&tx_bytes)
            .map_err(|e| Error::TransactionDecode(format!("bincode: {e}")))?;

        let message_bytes = tx.message.serialize();
        let signature = self.wallet.sign_message(&message_bytes);

        // The first signature slot is the fee payer's placeholder; replace
        // exactly that slot, never append.
        if tx.signatures.is_empty() {
            return Err(Error::TransactionDecode(
                "transaction has no signature slots".to_string(),
            ));
        }
        tx.signatures[0] = signature;

        let config = RpcSendTransactionConfig {
            skip_preflight: false,
            preflight_commitment: Some(CommitmentLevel::Processed),
            ..Default::default()
        };

        let signature = self
            .rpc
            .send_transaction_with_config(&tx, config)
            .await
            .map_err(|e| Error::TransactionSend(e.to_string()))?;

        Ok(signature.to_string())
    }
}

#[async_trait::async_trait]
impl SwapExecutor for LiveExecutor {
    async fn execute(&self, request: &SwapRequest) -> Result<String> {
        let slippage_bps = request.slippage_bps.unwrap_or(self.trading.slippage_bps());

        let quote = self
            .aggregator
            .get_quote(
                &request.input_mint,
                &request.output_mint,
                request.amount_atomic(),
                slippage_bps,
                self.compute_unit_price(),
            )
            .await?;

        let swap_tx = self
            .aggregator
            .build_swap(
                &quote,
                &self.wallet.pubkey().to_string(),
                request.priority_fee.as_ref(),
                self.compute_unit_price(),
            )
            .await?;

        let signature = self.sign_and_submit(&swap_tx).await?;

        // Submitted state must be durable before the hash is handed back;
        // confirmation is the tracker's job from here.
        self.store
            .update_trade_status(
                request.trade_id,
                TradeStatus::Submitted,
                TradeUpdate {
                    transaction_hash: Some(signature.clone()),
                    ..Default::default()
                },
            )
            .await?;

        info!(
            trade_id = request.trade_id,
            signature = %signature,
            "trade submitted"
        );
        Ok(signature)
    }
}

/// Removes a trade id from the pending set when execution finishes
struct PendingGuard {
    pending: Arc<Mutex<HashSet<i64>>>,
    trade_id: i64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending
            .lock()
            .expect("pending set lock poisoned")
            .remove(&self.trade_id);
    }
}

/// Order manager: mode dispatch, validation, execution, breaker policy
pub struct OrderManager {
    live: Arc<dyn SwapExecutor>,
    paper: Arc<dyn SwapExecutor>,
    validator: Arc<TradeValidator>,
    store: TradeStore,
    trading: TradingConfig,
    wallet: Arc<TradingWallet>,
    rpc: Arc<RpcClient>,
    breaker: Arc<CircuitBreaker>,
    global_breaker: Arc<CircuitBreaker>,
    pending: Arc<Mutex<HashSet<i64>>>,
}

impl OrderManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        live: Arc<dyn SwapExecutor>,
        paper: Arc<dyn SwapExecutor>,
        validator: Arc<TradeValidator>,
        store: TradeStore,
        trading: TradingConfig,
        wallet: Arc<TradingWallet>,
        rpc: Arc<RpcClient>,
        breaker: Arc<CircuitBreaker>,
        global_breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            live,
            paper,
            validator,
            store,
            trading,
            wallet,
            rpc,
            breaker,
            global_breaker,
            pending: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Create a trade row for a queued request and execute it. Returns the
    /// queue's success boolean.
    pub async fn execute_trade_request(&self, request: &TradeRequest) -> bool {
        let quote_mint = self
            .trading
            .quote_mints
            .first()
            .cloned()
            .unwrap_or_default();
        let (input_mint, output_mint) = if request.is_buy {
            (quote_mint, request.token_address.clone())
        } else {
            (request.token_address.clone(), quote_mint)
        };

        let input_decimals = if request.is_buy {
            9
        } else {
            request
                .metadata
                .get("token_decimals")
                .and_then(|v| v.as_u64())
                .unwrap_or(9) as u8
        };

        let new_trade = NewTrade {
            input_mint: input_mint.clone(),
            output_mint: output_mint.clone(),
            input_amount: request.amount,
            input_decimals,
            strategy: Some(request.strategy_id.clone()),
            metadata: request.metadata.clone(),
        };

        let trade_id = match self.store.insert_trade(&new_trade).await {
            Ok(id) => id,
            Err(e) => {
                error!("failed to create trade row: {e}");
                self.global_breaker.increment_failures();
                return false;
            }
        };

        let swap = SwapRequest {
            trade_id,
            input_mint,
            output_mint,
            input_amount: request.amount,
            input_decimals,
            slippage_bps: None,
            priority_fee: None,
        };

        self.execute_swap(&swap).await.is_some()
    }

    /// Execute a swap, returning its transaction hash, or None when the
    /// trade failed or is already in flight. Every failure path leaves the
    /// trade row in a terminal status.
    pub async fn execute_swap(&self, request: &SwapRequest) -> Option<String> {
        // Concurrency guard: at most one execution per trade id
        let _guard = {
            let mut pending = self.pending.lock().expect("pending set lock poisoned");
            if !pending.insert(request.trade_id) {
                warn!(
                    trade_id = request.trade_id,
                    "trade already executing, skipping duplicate"
                );
                return None;
            }
            PendingGuard {
                pending: self.pending.clone(),
                trade_id: request.trade_id,
            }
        };

        if self.breaker.check() {
            warn!(
                trade_id = request.trade_id,
                "order manager breaker active, refusing trade"
            );
            self.fail_trade(request.trade_id, "order manager circuit breaker active")
                .await;
            return None;
        }

        if self.trading.paper_trading_enabled {
            return self.run_executor(&self.paper, request).await;
        }

        // Validation gate (live only); refusals never bump breakers
        let balance = match self.wallet.balance_sol(&self.rpc).await {
            Ok(balance) => balance,
            Err(e) => {
                error!(trade_id = request.trade_id, "balance check failed: {e}");
                self.fail_trade(request.trade_id, &format!("balance check failed: {e}"))
                    .await;
                self.breaker.increment_failures();
                return None;
            }
        };

        let validation = ValidationRequest {
            input_mint: request.input_mint.clone(),
            output_mint: request.output_mint.clone(),
            input_amount: request.input_amount,
            slippage_bps: request.slippage_bps.unwrap_or(self.trading.slippage_bps()),
            wallet_balance_sol: balance,
        };
        if let Err(e) = self.validator.validate(&validation).await {
            warn!(trade_id = request.trade_id, "trade refused: {e}");
            self.fail_trade(request.trade_id, &e.to_string()).await;
            return None;
        }

        self.run_executor(&self.live, request).await
    }

    async fn run_executor(
        &self,
        executor: &Arc<dyn SwapExecutor>,
        request: &SwapRequest,
    ) -> Option<String> {
        match executor.execute(request).await {
            Ok(hash) => {
                self.breaker.reset_failures();
                Some(hash)
            }
            Err(e) => {
                error!(trade_id = request.trade_id, "swap execution failed: {e}");
                self.fail_trade(request.trade_id, &e.to_string()).await;
                if e.is_infrastructure() {
                    self.global_breaker.increment_failures();
                } else {
                    self.breaker.increment_failures();
                }
                None
            }
        }
    }

    async fn fail_trade(&self, trade_id: i64, message: &str) {
        let update = TradeUpdate {
            error_message: Some(message.to_string()),
            ..Default::default()
        };
        if let Err(e) = self
            .store
            .update_trade_status(trade_id, TradeStatus::Failed, update)
            .await
        {
            // A trade already in a terminal state stays as-is
            warn!(trade_id, "could not mark trade failed: {e}");
        }
    }
}

#[async_trait::async_trait]
impl crate::queue::TradeDispatcher for OrderManager {
    async fn dispatch(&self, request: &TradeRequest) -> bool {
        self.execute_trade_request(request).await
    }
}
