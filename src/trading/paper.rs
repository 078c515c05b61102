//! Paper trading executor
//!
//! Fills orders at the price monitor's current SOL price instead of hitting
//! the aggregator. Position rows and the in-memory book are updated exactly
//! as a live confirmation would; the only visible differences are the
//! sentinel hash prefix and the absence of chain side effects.

use std::sync::Arc;

use tracing::info;

use crate::config::TradingConfig;
use crate::error::{Error, Result};
use crate::market::PriceSource;
use crate::position::PositionBook;
use crate::storage::{TradeStatus, TradeStore, TradeUpdate};

use super::{SwapExecutor, SwapRequest, PAPER_TRADE_PREFIX};

/// Simulated swap executor
pub struct PaperExecutor {
    store: TradeStore,
    book: Arc<PositionBook>,
    price: Arc<dyn PriceSource>,
    trading: TradingConfig,
}

impl PaperExecutor {
    pub fn new(
        store: TradeStore,
        book: Arc<PositionBook>,
        price: Arc<dyn PriceSource>,
        trading: TradingConfig,
    ) -> Self {
        Self {
            store,
            book,
            price,
            trading,
        }
    }
}

#[async_trait::async_trait]
impl SwapExecutor for PaperExecutor {
    async fn execute(&self, request: &SwapRequest) -> Result<String> {
        let is_buy = self.trading.is_quote_mint(&request.input_mint)
            && !self.trading.is_quote_mint(&request.output_mint);
        let is_sell = self.trading.is_quote_mint(&request.output_mint)
            && !self.trading.is_quote_mint(&request.input_mint);

        if !is_buy && !is_sell {
            return Err(Error::ValidationRefused(format!(
                "paper trading supports quote-asset pairs only: {} -> {}",
                request.input_mint, request.output_mint
            )));
        }

        let traded_mint = if is_buy {
            &request.output_mint
        } else {
            &request.input_mint
        };

        let price_sol = self
            .price
            .price_sol(traded_mint)
            .await?
            .ok_or_else(|| Error::PriceUnavailable(traded_mint.clone()))?;
        if price_sol <= 0.0 {
            return Err(Error::PriceUnavailable(format!(
                "{traded_mint}: non-positive price {price_sol}"
            )));
        }

        let hash = format!("{PAPER_TRADE_PREFIX}{}", request.trade_id);

        // Output amount mirrors what a perfect fill would return
        let actual_output = if is_buy {
            // Spending SOL; output is the token quantity bought
            request.input_amount / price_sol
        } else {
            // Selling tokens; output is the SOL received
            request.input_amount * price_sol
        };

        if is_buy {
            let strategy = self
                .store
                .get_trade(request.trade_id)
                .await?
                .strategy
                .unwrap_or_else(|| "paper".to_string());
            self.store
                .apply_confirmed_buy(traded_mint, actual_output, price_sol, &strategy, &hash)
                .await?;
            self.book
                .apply_buy(traded_mint, actual_output, price_sol, &strategy, &hash)
                .await;
        } else {
            self.store
                .apply_confirmed_sell(traded_mint, request.input_amount)
                .await?;
            self.book
                .apply_sell(traded_mint, request.input_amount, price_sol)
                .await;
        }

        self.store
            .update_trade_status(
                request.trade_id,
                TradeStatus::PaperCompleted,
                TradeUpdate {
                    transaction_hash: Some(hash.clone()),
                    actual_output_amount: Some(actual_output),
                    ..Default::default()
                },
            )
            .await?;

        info!(
            trade_id = request.trade_id,
            mint = %traded_mint,
            is_buy,
            price_sol,
            actual_output,
            "paper trade completed"
        );
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WSOL_MINT;
    use crate::storage::NewTrade;
    use async_trait::async_trait;

    struct FixedPrice(f64);

    #[async_trait]
    impl PriceSource for FixedPrice {
        async fn price_sol(&self, _mint: &str) -> Result<Option<f64>> {
            Ok(Some(self.0))
        }

        async fn price_usd(&self, _mint: &str) -> Result<Option<f64>> {
            Ok(None)
        }
    }

    async fn setup(price_sol: f64) -> (PaperExecutor, TradeStore, Arc<PositionBook>) {
        let store = TradeStore::connect("sqlite::memory:").await.unwrap();
        let book = Arc::new(PositionBook::new());
        let executor = PaperExecutor::new(
            store.clone(),
            book.clone(),
            Arc::new(FixedPrice(price_sol)),
            TradingConfig::default(),
        );
        (executor, store, book)
    }

    async fn insert(store: &TradeStore, input: &str, output: &str, amount: f64) -> i64 {
        store
            .insert_trade(&NewTrade {
                input_mint: input.to_string(),
                output_mint: output.to_string(),
                input_amount: amount,
                input_decimals: 9,
                strategy: Some("momentum".to_string()),
                metadata: serde_json::Value::Null,
            })
            .await
            .unwrap()
    }

    fn swap(trade_id: i64, input: &str, output: &str, amount: f64) -> SwapRequest {
        SwapRequest {
            trade_id,
            input_mint: input.to_string(),
            output_mint: output.to_string(),
            input_amount: amount,
            input_decimals: 9,
            slippage_bps: None,
            priority_fee: None,
        }
    }

    #[tokio::test]
    async fn test_paper_buy_fills_at_monitor_price() {
        let (executor, store, book) = setup(0.0001).await;
        let trade_id = insert(&store, WSOL_MINT, "MintT", 1.0).await;

        let hash = executor
            .execute(&swap(trade_id, WSOL_MINT, "MintT", 1.0))
            .await
            .unwrap();
        assert_eq!(hash, format!("PAPER_TRADE_SUCCESS_{trade_id}"));

        let row = store.get_trade(trade_id).await.unwrap();
        assert_eq!(row.status(), TradeStatus::PaperCompleted);
        assert!((row.actual_output_amount.unwrap() - 10_000.0).abs() < 1e-6);

        let position = book.get("MintT").await.unwrap();
        assert!((position.amount - 10_000.0).abs() < 1e-6);

        let stored = store.get_position("MintT").await.unwrap().unwrap();
        assert!((stored.amount - 10_000.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_paper_sell_closes_position() {
        let (executor, store, book) = setup(0.0001).await;

        let buy_id = insert(&store, WSOL_MINT, "MintT", 1.0).await;
        executor
            .execute(&swap(buy_id, WSOL_MINT, "MintT", 1.0))
            .await
            .unwrap();

        let sell_id = insert(&store, "MintT", WSOL_MINT, 10_000.0).await;
        let hash = executor
            .execute(&swap(sell_id, "MintT", WSOL_MINT, 10_000.0))
            .await
            .unwrap();
        assert!(hash.starts_with(PAPER_TRADE_PREFIX));

        assert!(!book.has_open("MintT").await);
        let row = store.get_trade(sell_id).await.unwrap();
        // Output of a sell is the SOL received
        assert!((row.actual_output_amount.unwrap() - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_non_quote_pair_rejected() {
        let (executor, store, _) = setup(0.0001).await;
        let trade_id = insert(&store, "MintA", "MintB", 1.0).await;

        let err = executor
            .execute(&swap(trade_id, "MintA", "MintB", 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ValidationRefused(_)));
    }

    #[tokio::test]
    async fn test_missing_price_fails() {
        let store = TradeStore::connect("sqlite::memory:").await.unwrap();
        struct NoPrice;
        #[async_trait]
        impl PriceSource for NoPrice {
            async fn price_sol(&self, _mint: &str) -> Result<Option<f64>> {
                Ok(None)
            }
            async fn price_usd(&self, _mint: &str) -> Result<Option<f64>> {
                Ok(None)
            }
        }
        let executor = PaperExecutor::new(
            store.clone(),
            Arc::new(PositionBook::new()),
            Arc::new(NoPrice),
            TradingConfig::default(),
        );
        let trade_id = insert(&store, WSOL_MINT, "MintT", 1.0).await;

        let err = executor
            .execute(&swap(trade_id, WSOL_MINT, "MintT", 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PriceUnavailable(_)));
    }
}
