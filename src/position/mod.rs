//! In-memory position book
//!
//! Fast-read cache over the persistent position store. Strategies read it on
//! every price event; the transaction tracker refreshes it on confirmations.
//! Persistent truth lives in the store, including realized P&L, which is
//! derived from the trade log rather than accumulated here.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::Result;
use crate::storage::{PositionRow, PositionState, TradeStore};

/// A cached open position
#[derive(Debug, Clone)]
pub struct Position {
    /// Token mint address
    pub token_mint: String,
    /// Amount of tokens held
    pub amount: f64,
    /// Entry price in SOL per token
    pub entry_price_sol: f64,
    /// Entry timestamp
    pub entry_timestamp: DateTime<Utc>,
    /// Strategy that opened the position
    pub strategy: String,
    /// Entry transaction signature
    pub entry_tx_hash: Option<String>,
    /// Latest observed price in SOL (updated by price events)
    pub current_price_sol: f64,
}

impl Position {
    fn from_row(row: &PositionRow) -> Self {
        Self {
            token_mint: row.token_mint.clone(),
            amount: row.amount,
            entry_price_sol: row.entry_price_sol,
            entry_timestamp: row.entry_timestamp,
            strategy: row.strategy.clone(),
            entry_tx_hash: row.entry_tx_hash.clone(),
            current_price_sol: row.entry_price_sol,
        }
    }

    /// Current value in SOL
    pub fn current_value_sol(&self) -> f64 {
        self.amount * self.current_price_sol
    }

    /// Unrealized P&L in SOL
    pub fn unrealized_pnl_sol(&self) -> f64 {
        (self.current_price_sol - self.entry_price_sol) * self.amount
    }

    /// Unrealized P&L percentage relative to entry
    pub fn unrealized_pnl_pct(&self) -> f64 {
        if self.entry_price_sol == 0.0 {
            return 0.0;
        }
        ((self.current_price_sol - self.entry_price_sol) / self.entry_price_sol) * 100.0
    }
}

/// Mutex-guarded position cache shared across components
pub struct PositionBook {
    positions: Arc<RwLock<HashMap<String, Position>>>,
}

impl Default for PositionBook {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionBook {
    pub fn new() -> Self {
        Self {
            positions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Replace the cache with the store's active positions
    pub async fn refresh_from_store(&self, store: &TradeStore) -> Result<()> {
        let rows = store.fetch_active_positions().await?;
        let mut positions = self.positions.write().await;
        positions.clear();
        for row in &rows {
            if row.state() != PositionState::Closed {
                positions.insert(row.token_mint.clone(), Position::from_row(row));
            }
        }
        info!("position book loaded with {} open position(s)", positions.len());
        Ok(())
    }

    /// Record a confirmed buy
    pub async fn apply_buy(
        &self,
        token_mint: &str,
        amount: f64,
        entry_price_sol: f64,
        strategy: &str,
        entry_tx_hash: &str,
    ) {
        let mut positions = self.positions.write().await;
        match positions.get_mut(token_mint) {
            Some(existing) => {
                existing.amount += amount;
            }
            None => {
                positions.insert(
                    token_mint.to_string(),
                    Position {
                        token_mint: token_mint.to_string(),
                        amount,
                        entry_price_sol,
                        entry_timestamp: Utc::now(),
                        strategy: strategy.to_string(),
                        entry_tx_hash: Some(entry_tx_hash.to_string()),
                        current_price_sol: entry_price_sol,
                    },
                );
            }
        }
        debug!(mint = token_mint, amount, "position book buy applied");
    }

    /// Record a confirmed sell; returns realized P&L in SOL if the sell
    /// closed out against a known entry
    pub async fn apply_sell(
        &self,
        token_mint: &str,
        amount_sold: f64,
        exit_price_sol: f64,
    ) -> Option<f64> {
        let mut positions = self.positions.write().await;
        let position = positions.get_mut(token_mint)?;

        let sold = amount_sold.min(position.amount);
        let pnl = (exit_price_sol - position.entry_price_sol) * sold;
        position.amount -= sold;

        if position.amount <= f64::EPSILON * sold.max(1.0) {
            positions.remove(token_mint);
            info!(mint = token_mint, pnl_sol = pnl, "position closed in book");
        } else {
            info!(
                mint = token_mint,
                remaining = position.amount,
                pnl_sol = pnl,
                "position reduced in book"
            );
        }
        Some(pnl)
    }

    /// Update the cached price for a mint
    pub async fn update_price(&self, token_mint: &str, price_sol: f64) {
        let mut positions = self.positions.write().await;
        if let Some(position) = positions.get_mut(token_mint) {
            position.current_price_sol = price_sol;
        }
    }

    pub async fn get(&self, token_mint: &str) -> Option<Position> {
        self.positions.read().await.get(token_mint).cloned()
    }

    pub async fn has_open(&self, token_mint: &str) -> bool {
        self.positions.read().await.contains_key(token_mint)
    }

    pub async fn all(&self) -> Vec<Position> {
        self.positions.read().await.values().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.positions.read().await.len()
    }

    /// Total unrealized P&L across open positions, in SOL
    pub async fn total_unrealized_pnl_sol(&self) -> f64 {
        self.positions
            .read()
            .await
            .values()
            .map(Position::unrealized_pnl_sol)
            .sum()
    }
}
