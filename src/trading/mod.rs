//! Trade execution
//!
//! Order management, the aggregator client, paper simulation, and the
//! transaction confirmation tracker.

pub mod aggregator;
pub mod order_manager;
pub mod paper;
pub mod tracker;

use async_trait::async_trait;

use crate::error::Result;
use aggregator::PriorityFee;

/// Sentinel prefix marking simulated fills; such hashes never reach the RPC
pub const PAPER_TRADE_PREFIX: &str = "PAPER_TRADE_SUCCESS_";

/// A fully-resolved swap to execute
#[derive(Debug, Clone)]
pub struct SwapRequest {
    pub trade_id: i64,
    pub input_mint: String,
    pub output_mint: String,
    /// Input amount in UI units of the input mint
    pub input_amount: f64,
    pub input_decimals: u8,
    pub slippage_bps: Option<u32>,
    pub priority_fee: Option<PriorityFee>,
}

impl SwapRequest {
    /// Input amount in atomic units
    pub fn amount_atomic(&self) -> u64 {
        (self.input_amount * 10f64.powi(self.input_decimals as i32)) as u64
    }
}

/// The "execute an order" contract. Paper and live trading are two
/// implementations; the only visible difference is the hash prefix and the
/// absence of chain side effects.
#[async_trait]
pub trait SwapExecutor: Send + Sync {
    /// Execute the swap and return its transaction hash. The trade row must
    /// reach `submitted` (live) or `paper_completed` (paper) before this
    /// returns.
    async fn execute(&self, request: &SwapRequest) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_atomic_conversion() {
        let request = SwapRequest {
            trade_id: 1,
            input_mint: "SOL".to_string(),
            output_mint: "TOKEN".to_string(),
            input_amount: 1.5,
            input_decimals: 9,
            slippage_bps: None,
            priority_fee: None,
        };
        assert_eq!(request.amount_atomic(), 1_500_000_000);
    }
}
