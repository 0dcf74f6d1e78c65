//! Database persistence for full agent state management.
//!
//! Stores everything needed to resume after restart:
//! - Agent configuration and state
//! - Evaluation cycles and their allocation summaries
//! - Decisions with execution status for the external signer
//! - Our signal positions
//! - Daily fee history for growth calculations

use anyhow::{Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

/// Database connection pool with full state management.
pub struct Database {
    pool: SqlitePool,
}

/// Agent state stored in database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AgentState {
    pub id: i64,
    pub budget: f64,
    pub grt_price: f64,
    pub total_cycles: i64,
    pub is_running: bool,
    pub last_cycle_at: Option<String>,
    pub started_at: String,
    pub updated_at: String,
}

/// Stored evaluation cycle summary.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredCycle {
    pub id: String,
    pub grt_price: f64,
    pub budget: f64,
    pub allocated: f64,
    pub unspent: f64,
    pub opportunity_count: i64,
    pub decision_count: i64,
    pub created_at: String,
}

/// Stored decision record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredDecision {
    pub id: String,
    pub cycle_id: String,
    pub subgraph_id: String,
    pub action: String,
    pub amount: f64,
    pub confidence: f64,
    pub priority: i64,
    pub reason: String,
    pub status: String,
    pub created_at: String,
    pub executed_at: Option<String>,
}

/// Stored position record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredPosition {
    pub subgraph_id: String,
    pub signal_amount: f64,
    pub entry_price: f64,
    pub accrued_fees: f64,
    pub opened_at: String,
    pub updated_at: String,
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        // Agent state table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agent_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                budget REAL NOT NULL DEFAULT 0,
                grt_price REAL NOT NULL DEFAULT 0,
                total_cycles INTEGER NOT NULL DEFAULT 0,
                is_running INTEGER NOT NULL DEFAULT 0,
                last_cycle_at TEXT,
                started_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Evaluation cycles
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cycles (
                id TEXT PRIMARY KEY,
                grt_price REAL NOT NULL,
                budget REAL NOT NULL,
                allocated REAL NOT NULL DEFAULT 0,
                unspent REAL NOT NULL DEFAULT 0,
                opportunity_count INTEGER NOT NULL DEFAULT 0,
                decision_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Decision log
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS decisions (
                id TEXT PRIMARY KEY,
                cycle_id TEXT NOT NULL,
                subgraph_id TEXT NOT NULL,
                action TEXT NOT NULL,
                amount REAL NOT NULL,
                confidence REAL NOT NULL DEFAULT 0,
                priority INTEGER NOT NULL DEFAULT 2,
                reason TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                executed_at TEXT,
                FOREIGN KEY (cycle_id) REFERENCES cycles(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Our signal positions
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                subgraph_id TEXT PRIMARY KEY,
                signal_amount REAL NOT NULL,
                entry_price REAL NOT NULL,
                accrued_fees REAL NOT NULL DEFAULT 0,
                opened_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                closed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Daily fee history per deployment
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS fee_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subgraph_id TEXT NOT NULL,
                day INTEGER NOT NULL,
                daily_fees REAL NOT NULL DEFAULT 0,
                total_signal REAL NOT NULL DEFAULT 0,
                recorded_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(subgraph_id, day)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Indexes
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_decisions_status ON decisions(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_decisions_cycle ON decisions(cycle_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_fee_history_subgraph ON fee_history(subgraph_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Agent State ====================

    /// Initialize or update agent state at startup.
    pub async fn init_agent_state(&self, budget: f64) -> Result<AgentState> {
        sqlx::query(
            r#"
            INSERT INTO agent_state (id, budget, is_running, started_at, updated_at)
            VALUES (1, ?, 1, datetime('now'), datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                budget = excluded.budget,
                is_running = 1,
                updated_at = datetime('now')
            "#,
        )
        .bind(budget)
        .execute(&self.pool)
        .await?;

        self.get_agent_state().await
    }

    /// Get current agent state.
    pub async fn get_agent_state(&self) -> Result<AgentState> {
        sqlx::query_as::<_, AgentState>("SELECT * FROM agent_state WHERE id = 1")
            .fetch_one(&self.pool)
            .await
            .context("Agent state not initialized")
    }

    /// Update agent state after a cycle.
    pub async fn update_agent_state(&self, grt_price: f64, total_cycles: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE agent_state SET
                grt_price = ?,
                total_cycles = ?,
                last_cycle_at = datetime('now'),
                updated_at = datetime('now')
            WHERE id = 1
            "#,
        )
        .bind(grt_price)
        .bind(total_cycles)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Mark agent as stopped.
    pub async fn mark_agent_stopped(&self) -> Result<()> {
        sqlx::query("UPDATE agent_state SET is_running = 0, updated_at = datetime('now') WHERE id = 1")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ==================== Cycles ====================

    /// Save an evaluation cycle summary.
    pub async fn save_cycle(
        &self,
        id: &str,
        grt_price: f64,
        budget: f64,
        allocated: f64,
        unspent: f64,
        opportunity_count: i64,
        decision_count: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cycles (id, grt_price, budget, allocated, unspent, opportunity_count, decision_count)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(grt_price)
        .bind(budget)
        .bind(allocated)
        .bind(unspent)
        .bind(opportunity_count)
        .bind(decision_count)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get recent cycles, newest first.
    pub async fn get_recent_cycles(&self, limit: i64) -> Result<Vec<StoredCycle>> {
        sqlx::query_as::<_, StoredCycle>(
            "SELECT * FROM cycles ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch cycles")
    }

    // ==================== Decisions ====================

    /// Save a new decision.
    pub async fn save_decision(
        &self,
        id: &str,
        cycle_id: &str,
        subgraph_id: &str,
        action: &str,
        amount: f64,
        confidence: f64,
        priority: i64,
        reason: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO decisions (id, cycle_id, subgraph_id, action, amount, confidence, priority, reason, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'pending')
            "#,
        )
        .bind(id)
        .bind(cycle_id)
        .bind(subgraph_id)
        .bind(action)
        .bind(amount)
        .bind(confidence)
        .bind(priority)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get pending decisions in execution order.
    pub async fn get_pending_decisions(&self) -> Result<Vec<StoredDecision>> {
        sqlx::query_as::<_, StoredDecision>(
            "SELECT * FROM decisions WHERE status = 'pending' ORDER BY priority, created_at",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch pending decisions")
    }

    /// Update decision execution status.
    pub async fn update_decision_status(
        &self,
        id: &str,
        status: &str,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE decisions SET
                status = ?,
                reason = CASE WHEN ? IS NULL THEN reason ELSE reason || ' | ' || ? END,
                executed_at = CASE WHEN ? = 'executed' THEN datetime('now') ELSE executed_at END
            WHERE id = ?
            "#,
        )
        .bind(status)
        .bind(error)
        .bind(error)
        .bind(status)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get decision statistics: (total, executed, failed).
    pub async fn get_decision_stats(&self) -> Result<(i64, i64, i64)> {
        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM decisions")
            .fetch_one(&self.pool)
            .await?;

        let (executed,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM decisions WHERE status = 'executed'")
                .fetch_one(&self.pool)
                .await?;

        let (failed,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM decisions WHERE status = 'failed'")
                .fetch_one(&self.pool)
                .await?;

        Ok((total, executed, failed))
    }

    // ==================== Positions ====================

    /// Save or grow a position.
    pub async fn save_position(
        &self,
        subgraph_id: &str,
        signal_amount: f64,
        entry_price: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (subgraph_id, signal_amount, entry_price)
            VALUES (?, ?, ?)
            ON CONFLICT(subgraph_id) DO UPDATE SET
                entry_price = (positions.entry_price * positions.signal_amount
                              + excluded.entry_price * excluded.signal_amount)
                             / (positions.signal_amount + excluded.signal_amount),
                signal_amount = positions.signal_amount + excluded.signal_amount,
                closed_at = NULL,
                updated_at = datetime('now')
            "#,
        )
        .bind(subgraph_id)
        .bind(signal_amount)
        .bind(entry_price)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get all open positions.
    pub async fn get_open_positions(&self) -> Result<Vec<StoredPosition>> {
        sqlx::query_as::<_, StoredPosition>(
            "SELECT subgraph_id, signal_amount, entry_price, accrued_fees, opened_at, updated_at
             FROM positions WHERE closed_at IS NULL AND signal_amount > 0.000001",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch positions")
    }

    /// Close a position.
    pub async fn close_position(&self, subgraph_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE positions SET closed_at = datetime('now'), updated_at = datetime('now') WHERE subgraph_id = ?",
        )
        .bind(subgraph_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Total signal across open positions, in GRT.
    pub async fn get_total_signal(&self) -> Result<f64> {
        let (total,): (f64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(signal_amount), 0) FROM positions WHERE closed_at IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    // ==================== Fee History ====================

    /// Record one day of fee data for a deployment.
    pub async fn record_fee_point(
        &self,
        subgraph_id: &str,
        day: i64,
        daily_fees: f64,
        total_signal: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO fee_history (subgraph_id, day, daily_fees, total_signal)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(subgraph_id)
        .bind(day)
        .bind(daily_fees)
        .bind(total_signal)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get a deployment's fee series, oldest first.
    pub async fn get_fee_series(&self, subgraph_id: &str, limit: i64) -> Result<Vec<(f64, f64)>> {
        let rows: Vec<(f64, f64)> = sqlx::query_as(
            r#"
            SELECT daily_fees, total_signal FROM (
                SELECT day, daily_fees, total_signal FROM fee_history
                WHERE subgraph_id = ? ORDER BY day DESC LIMIT ?
            ) ORDER BY day ASC
            "#,
        )
        .bind(subgraph_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Get the connection pool (for advanced queries).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Named shared-cache memory databases: a plain `sqlite::memory:` gives
    // every pooled connection its own empty database.
    #[tokio::test]
    async fn test_decision_roundtrip() {
        let db = Database::new("sqlite:file:test_decisions?mode=memory&cache=shared")
            .await
            .unwrap();

        db.save_cycle("cycle-1", 0.12, 10_000.0, 9_500.0, 500.0, 20, 3)
            .await
            .unwrap();
        db.save_decision(
            "dec-1", "cycle-1", "Qm123", "add", 2_500.0, 0.8, 2, "test",
        )
        .await
        .unwrap();

        let pending = db.get_pending_decisions().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].subgraph_id, "Qm123");
        assert_eq!(pending[0].action, "add");

        db.update_decision_status("dec-1", "executed", None)
            .await
            .unwrap();
        assert!(db.get_pending_decisions().await.unwrap().is_empty());

        let (total, executed, failed) = db.get_decision_stats().await.unwrap();
        assert_eq!((total, executed, failed), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_position_averaging() {
        let db = Database::new("sqlite:file:test_positions?mode=memory&cache=shared")
            .await
            .unwrap();

        db.save_position("Qm123", 1000.0, 0.10).await.unwrap();
        db.save_position("Qm123", 1000.0, 0.20).await.unwrap();

        let positions = db.get_open_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].signal_amount, 2000.0);
        assert!((positions[0].entry_price - 0.15).abs() < 1e-9);

        db.close_position("Qm123").await.unwrap();
        assert!(db.get_open_positions().await.unwrap().is_empty());
    }
}
