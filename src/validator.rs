//! Pre-trade validation gate
//!
//! Inspects balance, liquidity, holder count, spread, and position rules
//! before a live trade is allowed to quote. A refusal fails the trade but
//! never bumps a circuit breaker.

use std::sync::Arc;

use tracing::debug;

use crate::config::{TradingConfig, ValidationConfig};
use crate::error::{Error, Result};
use crate::market::TokenMetricsSource;
use crate::position::PositionBook;

/// Inputs to a validation decision
#[derive(Debug, Clone)]
pub struct ValidationRequest {
    pub input_mint: String,
    pub output_mint: String,
    /// Input amount in UI units
    pub input_amount: f64,
    pub slippage_bps: u32,
    /// Current wallet SOL balance
    pub wallet_balance_sol: f64,
}

/// Pre-trade validator
pub struct TradeValidator {
    config: ValidationConfig,
    trading: TradingConfig,
    metrics: Arc<dyn TokenMetricsSource>,
    book: Arc<PositionBook>,
}

impl TradeValidator {
    pub fn new(
        config: ValidationConfig,
        trading: TradingConfig,
        metrics: Arc<dyn TokenMetricsSource>,
        book: Arc<PositionBook>,
    ) -> Self {
        Self {
            config,
            trading,
            metrics,
            book,
        }
    }

    /// Validate a trade. Ok(()) means the trade may proceed to quoting.
    pub async fn validate(&self, req: &ValidationRequest) -> Result<()> {
        let is_buy = self.trading.is_quote_mint(&req.input_mint)
            && !self.trading.is_quote_mint(&req.output_mint);
        let is_sell = self.trading.is_quote_mint(&req.output_mint)
            && !self.trading.is_quote_mint(&req.input_mint);

        if !is_buy && !is_sell {
            return Err(Error::ValidationRefused(format!(
                "not a quote-asset pair: {} -> {}",
                req.input_mint, req.output_mint
            )));
        }

        let traded_mint = if is_buy {
            &req.output_mint
        } else {
            &req.input_mint
        };

        // Position rules: one open position per mint, no sells without one
        if is_buy && self.book.has_open(traded_mint).await {
            return Err(Error::PositionAlreadyOpen(traded_mint.clone()));
        }
        if is_sell && !self.book.has_open(traded_mint).await {
            return Err(Error::PositionNotFound(traded_mint.clone()));
        }

        // Balance floor: a buy spends SOL and must leave the fee reserve
        if is_buy {
            let required = req.input_amount + self.config.min_sol_reserve;
            if req.wallet_balance_sol < required {
                return Err(Error::ValidationRefused(format!(
                    "insufficient balance: {:.4} SOL available, {:.4} SOL required",
                    req.wallet_balance_sol, required
                )));
            }
        }

        // Slippage bound
        let max_bps = (self.trading.max_slippage_pct * 100.0) as u32;
        if req.slippage_bps > max_bps {
            return Err(Error::ValidationRefused(format!(
                "slippage {}bps exceeds bound {}bps",
                req.slippage_bps, max_bps
            )));
        }

        // Liquidity / holders / spread from the scanner
        if let Some(metrics) = self.metrics.metrics(traded_mint).await? {
            if metrics.liquidity_usd < self.config.min_liquidity {
                return Err(Error::ValidationRefused(format!(
                    "liquidity ${:.0} below floor ${:.0}",
                    metrics.liquidity_usd, self.config.min_liquidity
                )));
            }
            if self.config.max_liquidity > 0.0 && metrics.liquidity_usd > self.config.max_liquidity
            {
                return Err(Error::ValidationRefused(format!(
                    "liquidity ${:.0} above ceiling ${:.0}",
                    metrics.liquidity_usd, self.config.max_liquidity
                )));
            }
            if metrics.holder_count < self.config.min_holders {
                return Err(Error::ValidationRefused(format!(
                    "holder count {} below floor {}",
                    metrics.holder_count, self.config.min_holders
                )));
            }
            if metrics.spread_pct > self.config.max_spread {
                return Err(Error::ValidationRefused(format!(
                    "spread {:.2}% above limit {:.2}%",
                    metrics.spread_pct, self.config.max_spread
                )));
            }
        }

        debug!(mint = %traded_mint, is_buy, "trade passed validation");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WSOL_MINT;
    use crate::market::TokenMetrics;
    use async_trait::async_trait;

    struct FixedMetrics(Option<TokenMetrics>);

    #[async_trait]
    impl TokenMetricsSource for FixedMetrics {
        async fn metrics(&self, _mint: &str) -> crate::error::Result<Option<TokenMetrics>> {
            Ok(self.0.clone())
        }
    }

    fn validator(metrics: Option<TokenMetrics>, book: Arc<PositionBook>) -> TradeValidator {
        TradeValidator::new(
            ValidationConfig::default(),
            TradingConfig::default(),
            Arc::new(FixedMetrics(metrics)),
            book,
        )
    }

    fn healthy_metrics() -> TokenMetrics {
        TokenMetrics {
            liquidity_usd: 100_000.0,
            holder_count: 500,
            spread_pct: 1.0,
        }
    }

    fn buy_request() -> ValidationRequest {
        ValidationRequest {
            input_mint: WSOL_MINT.to_string(),
            output_mint: "MintX".to_string(),
            input_amount: 1.0,
            slippage_bps: 50,
            wallet_balance_sol: 2.0,
        }
    }

    #[tokio::test]
    async fn test_healthy_buy_passes() {
        let v = validator(Some(healthy_metrics()), Arc::new(PositionBook::new()));
        assert!(v.validate(&buy_request()).await.is_ok());
    }

    #[tokio::test]
    async fn test_insufficient_balance_refused() {
        let v = validator(Some(healthy_metrics()), Arc::new(PositionBook::new()));
        let mut req = buy_request();
        req.wallet_balance_sol = 0.5;
        let err = v.validate(&req).await.unwrap_err();
        assert!(err.is_validation_refusal());
    }

    #[tokio::test]
    async fn test_liquidity_floor_refused() {
        let v = validator(
            Some(TokenMetrics {
                liquidity_usd: 10.0,
                ..healthy_metrics()
            }),
            Arc::new(PositionBook::new()),
        );
        let err = v.validate(&buy_request()).await.unwrap_err();
        assert!(matches!(err, Error::ValidationRefused(_)));
    }

    #[tokio::test]
    async fn test_duplicate_buy_refused() {
        let book = Arc::new(PositionBook::new());
        book.apply_buy("MintX", 1000.0, 0.0001, "momentum", "sig")
            .await;
        let v = validator(Some(healthy_metrics()), book);
        let err = v.validate(&buy_request()).await.unwrap_err();
        assert!(matches!(err, Error::PositionAlreadyOpen(_)));
    }

    #[tokio::test]
    async fn test_sell_without_position_refused() {
        let v = validator(Some(healthy_metrics()), Arc::new(PositionBook::new()));
        let req = ValidationRequest {
            input_mint: "MintX".to_string(),
            output_mint: WSOL_MINT.to_string(),
            input_amount: 1000.0,
            slippage_bps: 50,
            wallet_balance_sol: 2.0,
        };
        let err = v.validate(&req).await.unwrap_err();
        assert!(matches!(err, Error::PositionNotFound(_)));
    }

    #[tokio::test]
    async fn test_sell_with_position_passes() {
        let book = Arc::new(PositionBook::new());
        book.apply_buy("MintX", 1000.0, 0.0001, "momentum", "sig")
            .await;
        let v = validator(Some(healthy_metrics()), book);
        let req = ValidationRequest {
            input_mint: "MintX".to_string(),
            output_mint: WSOL_MINT.to_string(),
            input_amount: 1000.0,
            slippage_bps: 50,
            wallet_balance_sol: 2.0,
        };
        assert!(v.validate(&req).await.is_ok());
    }
}
