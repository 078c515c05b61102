//! Persistent trade and position store
//!
//! SQLite via sqlx. Three tables: `trades` (one row per swap attempt),
//! `positions` (at most one open row per mint), `trade_log` (entry/exit
//! journal linking exits back to their entry transaction).

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Lifecycle status of a trade row. Transitions form a DAG:
/// pending -> submitted -> {confirmed, failed}; paper_completed is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeStatus {
    Pending,
    Submitted,
    Confirmed,
    Failed,
    PaperCompleted,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "pending",
            TradeStatus::Submitted => "submitted",
            TradeStatus::Confirmed => "confirmed",
            TradeStatus::Failed => "failed",
            TradeStatus::PaperCompleted => "paper_completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TradeStatus::Pending),
            "submitted" => Some(TradeStatus::Submitted),
            "confirmed" => Some(TradeStatus::Confirmed),
            "failed" => Some(TradeStatus::Failed),
            "paper_completed" => Some(TradeStatus::PaperCompleted),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TradeStatus::Confirmed | TradeStatus::Failed | TradeStatus::PaperCompleted
        )
    }

    fn can_transition_to(&self, next: TradeStatus) -> bool {
        matches!(
            (self, next),
            (TradeStatus::Pending, TradeStatus::Submitted)
                | (TradeStatus::Pending, TradeStatus::Failed)
                | (TradeStatus::Pending, TradeStatus::PaperCompleted)
                | (TradeStatus::Submitted, TradeStatus::Confirmed)
                | (TradeStatus::Submitted, TradeStatus::Failed)
                | (TradeStatus::Submitted, TradeStatus::PaperCompleted)
        )
    }
}

/// Position lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    Open,
    Closing,
    Closed,
}

impl PositionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionState::Open => "open",
            PositionState::Closing => "closing",
            PositionState::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(PositionState::Open),
            "closing" => Some(PositionState::Closing),
            "closed" => Some(PositionState::Closed),
            _ => None,
        }
    }
}

/// A trade row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TradeRow {
    pub trade_id: i64,
    pub input_mint: String,
    pub output_mint: String,
    pub input_amount: f64,
    pub input_decimals: i64,
    pub status: String,
    pub transaction_hash: Option<String>,
    pub actual_output_amount: Option<f64>,
    pub error_message: Option<String>,
    pub strategy: Option<String>,
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl TradeRow {
    pub fn status(&self) -> TradeStatus {
        TradeStatus::parse(&self.status).unwrap_or(TradeStatus::Failed)
    }

    pub fn metadata_json(&self) -> serde_json::Value {
        self.metadata
            .as_deref()
            .and_then(|m| serde_json::from_str(m).ok())
            .unwrap_or(serde_json::Value::Null)
    }

    /// Entry transaction hash carried in metadata on exit trades
    pub fn entry_tx_hash(&self) -> Option<String> {
        self.metadata_json()
            .get("entry_tx_hash")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    pub fn exit_reason(&self) -> Option<String> {
        self.metadata_json()
            .get("exit_reason")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

/// A position row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PositionRow {
    pub token_mint: String,
    pub amount: f64,
    pub entry_price_sol: f64,
    pub entry_timestamp: DateTime<Utc>,
    pub strategy: String,
    pub state: String,
    pub entry_tx_hash: Option<String>,
}

impl PositionRow {
    pub fn state(&self) -> PositionState {
        PositionState::parse(&self.state).unwrap_or(PositionState::Closed)
    }
}

/// Fields for a new trade row
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub input_mint: String,
    pub output_mint: String,
    pub input_amount: f64,
    pub input_decimals: u8,
    pub strategy: Option<String>,
    pub metadata: serde_json::Value,
}

/// Optional fields applied alongside a status transition
#[derive(Debug, Clone, Default)]
pub struct TradeUpdate {
    pub transaction_hash: Option<String>,
    pub error_message: Option<String>,
    pub actual_output_amount: Option<f64>,
}

/// Realized trading results for one UTC day, derived from the trade log.
/// Each exit row is joined back to its entry through `entry_tx_hash`;
/// unlinked exits count as closed trades with no P&L contribution.
#[derive(Debug, Clone, Default)]
pub struct DailySummary {
    pub date: String,
    pub closed_trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub realized_pnl_sol: f64,
}

/// Store over a shared SQLite pool
#[derive(Clone)]
pub struct TradeStore {
    pool: SqlitePool,
}

impl TradeStore {
    /// Connect and create the schema if missing
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                trade_id INTEGER PRIMARY KEY AUTOINCREMENT,
                input_mint TEXT NOT NULL,
                output_mint TEXT NOT NULL,
                input_amount REAL NOT NULL,
                input_decimals INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                transaction_hash TEXT,
                actual_output_amount REAL,
                error_message TEXT,
                strategy TEXT,
                metadata TEXT,
                created_at TEXT NOT NULL,
                confirmed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                token_mint TEXT PRIMARY KEY,
                amount REAL NOT NULL,
                entry_price_sol REAL NOT NULL,
                entry_timestamp TEXT NOT NULL,
                strategy TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'open',
                entry_tx_hash TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trade_ref_id INTEGER NOT NULL,
                token_address TEXT NOT NULL,
                kind TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                price_sol REAL NOT NULL,
                quantity REAL NOT NULL,
                tx_hash TEXT NOT NULL,
                strategy TEXT,
                exit_reason TEXT,
                entry_tx_hash TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("trade store schema ready");
        Ok(())
    }

    /// Insert a new pending trade, returning its dense integer id
    pub async fn insert_trade(&self, trade: &NewTrade) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO trades
                (input_mint, output_mint, input_amount, input_decimals, status, strategy, metadata, created_at)
            VALUES (?, ?, ?, ?, 'pending', ?, ?, ?)
            "#,
        )
        .bind(&trade.input_mint)
        .bind(&trade.output_mint)
        .bind(trade.input_amount)
        .bind(trade.input_decimals as i64)
        .bind(&trade.strategy)
        .bind(trade.metadata.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_trade(&self, trade_id: i64) -> Result<TradeRow> {
        sqlx::query_as::<_, TradeRow>("SELECT * FROM trades WHERE trade_id = ?")
            .bind(trade_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::TradeNotFound(trade_id))
    }

    /// Transition a trade's status, applying optional fields. Returns true if
    /// a transition happened; re-applying the current status is a no-op, any
    /// other illegal transition is an error.
    pub async fn update_trade_status(
        &self,
        trade_id: i64,
        status: TradeStatus,
        update: TradeUpdate,
    ) -> Result<bool> {
        let current = self.get_trade(trade_id).await?;
        let from = current.status();
        if from == status {
            debug!(trade_id, status = status.as_str(), "status already applied");
            return Ok(false);
        }
        if !from.can_transition_to(status) {
            return Err(Error::InvalidStatusTransition {
                from: from.as_str().to_string(),
                to: status.as_str().to_string(),
            });
        }

        let confirmed_at = if matches!(status, TradeStatus::Confirmed | TradeStatus::PaperCompleted)
        {
            Some(Utc::now())
        } else {
            None
        };

        sqlx::query(
            r#"
            UPDATE trades SET
                status = ?,
                transaction_hash = COALESCE(?, transaction_hash),
                error_message = COALESCE(?, error_message),
                actual_output_amount = COALESCE(?, actual_output_amount),
                confirmed_at = COALESCE(?, confirmed_at)
            WHERE trade_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(&update.transaction_hash)
        .bind(&update.error_message)
        .bind(update.actual_output_amount)
        .bind(confirmed_at)
        .bind(trade_id)
        .execute(&self.pool)
        .await?;

        debug!(
            trade_id,
            from = from.as_str(),
            to = status.as_str(),
            "trade status transition"
        );
        Ok(true)
    }

    /// Trades awaiting confirmation (submitted with a hash)
    pub async fn get_pending_trades(&self) -> Result<Vec<TradeRow>> {
        Ok(sqlx::query_as::<_, TradeRow>(
            "SELECT * FROM trades WHERE status = 'submitted' AND transaction_hash IS NOT NULL ORDER BY trade_id",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    /// Open and closing positions
    pub async fn fetch_active_positions(&self) -> Result<Vec<PositionRow>> {
        Ok(sqlx::query_as::<_, PositionRow>(
            "SELECT * FROM positions WHERE state IN ('open', 'closing') ORDER BY token_mint",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn get_position(&self, token_mint: &str) -> Result<Option<PositionRow>> {
        Ok(
            sqlx::query_as::<_, PositionRow>("SELECT * FROM positions WHERE token_mint = ?")
                .bind(token_mint)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn set_position_state(&self, token_mint: &str, state: PositionState) -> Result<()> {
        sqlx::query("UPDATE positions SET state = ? WHERE token_mint = ?")
            .bind(state.as_str())
            .bind(token_mint)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Journal a confirmed entry
    pub async fn log_trade_entry(
        &self,
        trade_ref_id: i64,
        token_address: &str,
        price_sol: f64,
        quantity: f64,
        tx_hash: &str,
        strategy: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trade_log
                (trade_ref_id, token_address, kind, timestamp, price_sol, quantity, tx_hash, strategy)
            VALUES (?, ?, 'entry', ?, ?, ?, ?, ?)
            "#,
        )
        .bind(trade_ref_id)
        .bind(token_address)
        .bind(Utc::now())
        .bind(price_sol)
        .bind(quantity)
        .bind(tx_hash)
        .bind(strategy)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Journal a confirmed exit, referencing the prior entry hash
    #[allow(clippy::too_many_arguments)]
    pub async fn log_trade_exit(
        &self,
        trade_ref_id: i64,
        token_address: &str,
        price_sol: f64,
        quantity: f64,
        tx_hash: &str,
        exit_reason: Option<&str>,
        entry_tx_hash: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trade_log
                (trade_ref_id, token_address, kind, timestamp, price_sol, quantity, tx_hash, exit_reason, entry_tx_hash)
            VALUES (?, ?, 'exit', ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(trade_ref_id)
        .bind(token_address)
        .bind(Utc::now())
        .bind(price_sol)
        .bind(quantity)
        .bind(tx_hash)
        .bind(exit_reason)
        .bind(entry_tx_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Realized results for one UTC day, computed from the trade log. The
    /// day boundary lives in the query, so there is no counter to reset.
    pub async fn daily_summary(&self, day: chrono::NaiveDate) -> Result<DailySummary> {
        let start = chrono::NaiveDateTime::new(day, chrono::NaiveTime::MIN).and_utc();
        let end = start + chrono::Duration::days(1);

        let exits: Vec<(f64, f64, Option<f64>)> = sqlx::query_as(
            r#"
            SELECT x.price_sol, x.quantity, e.price_sol
            FROM trade_log x
            LEFT JOIN trade_log e
                ON e.kind = 'entry' AND e.tx_hash = x.entry_tx_hash
            WHERE x.kind = 'exit' AND x.timestamp >= ? AND x.timestamp < ?
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let mut summary = DailySummary {
            date: day.format("%Y-%m-%d").to_string(),
            ..Default::default()
        };
        for (exit_price_sol, quantity, entry_price_sol) in exits {
            summary.closed_trades += 1;
            let Some(entry_price_sol) = entry_price_sol else {
                continue;
            };
            let pnl_sol = (exit_price_sol - entry_price_sol) * quantity;
            summary.realized_pnl_sol += pnl_sol;
            if pnl_sol >= 0.0 {
                summary.wins += 1;
            } else {
                summary.losses += 1;
            }
        }
        Ok(summary)
    }

    /// Apply a confirmed BUY: upsert the position for the output mint.
    /// An existing open position accumulates amount and keeps its entry price.
    pub async fn apply_confirmed_buy(
        &self,
        token_mint: &str,
        amount: f64,
        entry_price_sol: f64,
        strategy: &str,
        entry_tx_hash: &str,
    ) -> Result<()> {
        match self.get_position(token_mint).await? {
            Some(existing) if existing.state() != PositionState::Closed => {
                sqlx::query("UPDATE positions SET amount = amount + ?, state = 'open' WHERE token_mint = ?")
                    .bind(amount)
                    .bind(token_mint)
                    .execute(&self.pool)
                    .await?;
            }
            _ => {
                sqlx::query(
                    r#"
                    INSERT INTO positions
                        (token_mint, amount, entry_price_sol, entry_timestamp, strategy, state, entry_tx_hash)
                    VALUES (?, ?, ?, ?, ?, 'open', ?)
                    ON CONFLICT(token_mint) DO UPDATE SET
                        amount = excluded.amount,
                        entry_price_sol = excluded.entry_price_sol,
                        entry_timestamp = excluded.entry_timestamp,
                        strategy = excluded.strategy,
                        state = 'open',
                        entry_tx_hash = excluded.entry_tx_hash
                    "#,
                )
                .bind(token_mint)
                .bind(amount)
                .bind(entry_price_sol)
                .bind(Utc::now())
                .bind(strategy)
                .bind(entry_tx_hash)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    /// Apply a confirmed SELL: reduce the position for the input mint. A sell
    /// that overshoots the recorded amount collapses the position to closed.
    pub async fn apply_confirmed_sell(&self, token_mint: &str, amount_sold: f64) -> Result<()> {
        let Some(position) = self.get_position(token_mint).await? else {
            warn!(mint = token_mint, "confirmed sell for unknown position");
            return Ok(());
        };

        let remaining = position.amount - amount_sold;
        if remaining <= f64::EPSILON * position.amount.max(1.0) {
            sqlx::query("UPDATE positions SET amount = 0, state = 'closed' WHERE token_mint = ?")
                .bind(token_mint)
                .execute(&self.pool)
                .await?;
            info!(mint = token_mint, "position closed");
        } else {
            sqlx::query("UPDATE positions SET amount = ?, state = 'open' WHERE token_mint = ?")
                .bind(remaining)
                .bind(token_mint)
                .execute(&self.pool)
                .await?;
            info!(mint = token_mint, remaining, "position reduced");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> TradeStore {
        TradeStore::connect("sqlite::memory:").await.unwrap()
    }

    fn new_trade(input: &str, output: &str) -> NewTrade {
        NewTrade {
            input_mint: input.to_string(),
            output_mint: output.to_string(),
            input_amount: 1.0,
            input_decimals: 9,
            strategy: Some("momentum".to_string()),
            metadata: serde_json::json!({"entry_reason": "test"}),
        }
    }

    #[tokio::test]
    async fn test_trade_lifecycle_happy_path() {
        let store = memory_store().await;
        let id = store.insert_trade(&new_trade("SOL", "TOKEN")).await.unwrap();

        let row = store.get_trade(id).await.unwrap();
        assert_eq!(row.status(), TradeStatus::Pending);

        let transitioned = store
            .update_trade_status(
                id,
                TradeStatus::Submitted,
                TradeUpdate {
                    transaction_hash: Some("sig123".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(transitioned);

        let transitioned = store
            .update_trade_status(
                id,
                TradeStatus::Confirmed,
                TradeUpdate {
                    actual_output_amount: Some(1000.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(transitioned);

        let row = store.get_trade(id).await.unwrap();
        assert_eq!(row.status(), TradeStatus::Confirmed);
        assert_eq!(row.actual_output_amount, Some(1000.0));
        assert!(row.confirmed_at.is_some());
    }

    #[tokio::test]
    async fn test_status_transition_idempotent_and_guarded() {
        let store = memory_store().await;
        let id = store.insert_trade(&new_trade("SOL", "TOKEN")).await.unwrap();

        store
            .update_trade_status(id, TradeStatus::Submitted, TradeUpdate::default())
            .await
            .unwrap();
        store
            .update_trade_status(id, TradeStatus::Confirmed, TradeUpdate::default())
            .await
            .unwrap();

        // Re-applying the terminal status is a no-op
        let transitioned = store
            .update_trade_status(id, TradeStatus::Confirmed, TradeUpdate::default())
            .await
            .unwrap();
        assert!(!transitioned);

        // Moving backwards is rejected
        let err = store
            .update_trade_status(id, TradeStatus::Submitted, TradeUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStatusTransition { .. }));
    }

    #[tokio::test]
    async fn test_pending_trades_filter() {
        let store = memory_store().await;
        let a = store.insert_trade(&new_trade("SOL", "A")).await.unwrap();
        let b = store.insert_trade(&new_trade("SOL", "B")).await.unwrap();

        store
            .update_trade_status(
                a,
                TradeStatus::Submitted,
                TradeUpdate {
                    transaction_hash: Some("sigA".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .update_trade_status(
                b,
                TradeStatus::Failed,
                TradeUpdate {
                    error_message: Some("quote failed".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let pending = store.get_pending_trades().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].trade_id, a);
    }

    #[tokio::test]
    async fn test_position_reduce_and_close() {
        let store = memory_store().await;
        store
            .apply_confirmed_buy("MintX", 1000.0, 0.0001, "momentum", "sig_entry")
            .await
            .unwrap();

        let pos = store.get_position("MintX").await.unwrap().unwrap();
        assert_eq!(pos.state(), PositionState::Open);
        assert_eq!(pos.amount, 1000.0);

        store.apply_confirmed_sell("MintX", 400.0).await.unwrap();
        let pos = store.get_position("MintX").await.unwrap().unwrap();
        assert_eq!(pos.state(), PositionState::Open);
        assert!((pos.amount - 600.0).abs() < 1e-9);

        // Overshoot collapses to closed
        store.apply_confirmed_sell("MintX", 9999.0).await.unwrap();
        let pos = store.get_position("MintX").await.unwrap().unwrap();
        assert_eq!(pos.state(), PositionState::Closed);
        assert_eq!(pos.amount, 0.0);

        let active = store.fetch_active_positions().await.unwrap();
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn test_trade_log_entry_exit_linkage() {
        let store = memory_store().await;
        store
            .log_trade_entry(1, "MintX", 0.0001, 1000.0, "sig_entry", Some("momentum"))
            .await
            .unwrap();
        store
            .log_trade_exit(
                2,
                "MintX",
                0.00012,
                1000.0,
                "sig_exit",
                Some("take_profit"),
                Some("sig_entry"),
            )
            .await
            .unwrap();

        let rows: Vec<(String, Option<String>)> = sqlx::query_as(
            "SELECT kind, entry_tx_hash FROM trade_log WHERE token_address = 'MintX' ORDER BY id",
        )
        .fetch_all(store.pool())
        .await
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, "entry");
        assert_eq!(rows[1].1.as_deref(), Some("sig_entry"));
    }

    #[tokio::test]
    async fn test_daily_summary_links_exits_to_entries() {
        let store = memory_store().await;

        // Winner: entry at 0.0001, exit at 0.00012 on 1000 tokens -> +0.02
        store
            .log_trade_entry(1, "MintA", 0.0001, 1000.0, "sig_a_entry", Some("momentum"))
            .await
            .unwrap();
        store
            .log_trade_exit(2, "MintA", 0.00012, 1000.0, "sig_a_exit", Some("take_profit"), Some("sig_a_entry"))
            .await
            .unwrap();

        // Loser: entry at 0.0002, exit at 0.00018 on 500 tokens -> -0.01
        store
            .log_trade_entry(3, "MintB", 0.0002, 500.0, "sig_b_entry", Some("momentum"))
            .await
            .unwrap();
        store
            .log_trade_exit(4, "MintB", 0.00018, 500.0, "sig_b_exit", Some("stop_loss"), Some("sig_b_entry"))
            .await
            .unwrap();

        // Orphan exit with no recorded entry: counted, no P&L
        store
            .log_trade_exit(5, "MintC", 0.001, 10.0, "sig_c_exit", None, None)
            .await
            .unwrap();

        let summary = store
            .daily_summary(Utc::now().date_naive())
            .await
            .unwrap();
        assert_eq!(summary.closed_trades, 3);
        assert_eq!(summary.wins, 1);
        assert_eq!(summary.losses, 1);
        assert!((summary.realized_pnl_sol - 0.01).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_daily_summary_empty_day() {
        let store = memory_store().await;
        store
            .log_trade_entry(1, "MintA", 0.0001, 1000.0, "sig_entry", None)
            .await
            .unwrap();

        // Entries alone realize nothing; a past day has no rows at all
        let today = store.daily_summary(Utc::now().date_naive()).await.unwrap();
        assert_eq!(today.closed_trades, 0);
        assert_eq!(today.realized_pnl_sol, 0.0);

        let yesterday = store
            .daily_summary(Utc::now().date_naive() - chrono::Duration::days(1))
            .await
            .unwrap();
        assert_eq!(yesterday.closed_trades, 0);
    }

    #[tokio::test]
    async fn test_metadata_round_trip() {
        let store = memory_store().await;
        let mut trade = new_trade("TOKEN", "SOL");
        trade.metadata = serde_json::json!({
            "exit_reason": "trailing_stop_loss",
            "entry_tx_hash": "sig_entry"
        });
        let id = store.insert_trade(&trade).await.unwrap();

        let row = store.get_trade(id).await.unwrap();
        assert_eq!(row.exit_reason().as_deref(), Some("trailing_stop_loss"));
        assert_eq!(row.entry_tx_hash().as_deref(), Some("sig_entry"));
    }
}
