//! Agent runner: the periodic evaluation loop.
//!
//! Each cycle:
//! - Fetch the network snapshot, daily series, and GRT price
//! - Score deployments into opportunities
//! - Allocate the GRT budget across them
//! - Generate add/remove/hold decisions
//! - Persist the plan and decisions for the execution layer

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use statrs::statistics::Statistics;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::{DailySeries, DeploymentSnapshot, GraphClient};
use crate::db::Database;
use crate::metrics::MetricsCalculator;
use crate::models::{CurationPosition, Decision, Opportunity, SignalAction};
use crate::optimizer::{
    AllocationPlan, AllocatorConfig, BudgetAllocator, DecisionPolicy, EvaluatedOpportunity,
    PolicyConfig, ReturnModel,
};

/// Curator share of query fees, fixed by the protocol.
pub const CURATOR_SHARE_RATE: Decimal = dec!(0.10);

/// Posted query pricing: $4 per 100k queries.
const EARNINGS_PER_100K_QUERIES: Decimal = dec!(4);

/// Rough queries served per GRT of daily fees, used to estimate volume.
const EST_QUERIES_PER_FEE_GRT: f64 = 25_000.0;

/// Deployments quieter than this are not worth curating.
const MIN_WEEKLY_QUERIES: u64 = 1_000;

/// Days of daily data fetched per deployment.
const SERIES_DAYS: usize = 30;

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// GRT budget available for signaling
    pub budget: Decimal,

    /// Seconds between evaluation cycles
    pub poll_interval_secs: u64,

    /// Whether to log intended transactions instead of queueing them
    pub dry_run: bool,

    /// Curator wallet whose on-chain signal seeds current stakes;
    /// falls back to locally persisted positions when unset
    pub wallet: Option<String>,

    /// How many top deployments to evaluate per cycle
    pub top_deployments: usize,

    /// Allocator parameters
    pub allocator_config: AllocatorConfig,

    /// Decision policy parameters
    pub policy_config: PolicyConfig,

    /// Database URL
    pub database_url: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            budget: dec!(10000),
            poll_interval_secs: 300,
            dry_run: true,
            wallet: None,
            top_deployments: 50,
            allocator_config: AllocatorConfig::default(),
            policy_config: PolicyConfig::default(),
            database_url: "sqlite:curator.db?mode=rwc".to_string(),
        }
    }
}

/// Main agent runner.
pub struct Agent {
    config: AgentConfig,
    db: Database,
    graph: GraphClient,
    model: ReturnModel,
    allocator: BudgetAllocator,
    policy: DecisionPolicy,

    total_cycles: i64,
    shutdown: Arc<AtomicBool>,
}

impl Agent {
    /// Create a new agent instance.
    pub async fn new(config: AgentConfig) -> Result<Self> {
        let db = Database::new(&config.database_url).await?;
        let graph = GraphClient::from_env()?;
        let model = ReturnModel::default();
        let allocator = BudgetAllocator::new(config.allocator_config.clone(), model);
        let policy = DecisionPolicy::new(config.policy_config.clone());

        Ok(Self {
            config,
            db,
            graph,
            model,
            allocator,
            policy,
            total_cycles: 0,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Get shutdown signal for external control.
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Initialize agent state from database or fresh start.
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing agent...");

        let budget = self.config.budget.to_f64().unwrap_or(0.0);
        let state = self.db.init_agent_state(budget).await?;
        self.total_cycles = state.total_cycles;

        if state.total_cycles > 0 {
            info!(
                total_cycles = state.total_cycles,
                "Resuming from previous session"
            );
        }

        let positions = self.db.get_open_positions().await?;
        info!(
            budget = %self.config.budget,
            positions = positions.len(),
            "Agent initialized"
        );

        Ok(())
    }

    /// Main run loop.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            dry_run = self.config.dry_run,
            poll_interval = self.config.poll_interval_secs,
            "Starting agent run loop"
        );

        let mut poll_interval = interval(Duration::from_secs(self.config.poll_interval_secs));

        // Register shutdown handler
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        while !self.shutdown.load(Ordering::SeqCst) {
            poll_interval.tick().await;

            if let Err(e) = self.tick().await {
                error!(error = %e, "Error in agent cycle");
                // Keep running; the next cycle fetches fresh data
            }
        }

        self.shutdown_agent().await?;

        Ok(())
    }

    /// Single evaluation cycle.
    async fn tick(&mut self) -> Result<()> {
        debug!("Agent cycle");

        let cycle_id = Uuid::new_v4().to_string();
        let (evaluated, unit_price) = self.scan().await?;

        let opportunities: Vec<Opportunity> = evaluated
            .iter()
            .map(|e| e.opportunity.clone())
            .collect();

        let plan = self
            .allocator
            .allocate(&opportunities, self.config.budget, unit_price)?;

        info!(
            deployments = opportunities.len(),
            allocated = %plan.allocated(),
            unspent = %plan.unspent,
            state = ?plan.state,
            "Allocation complete"
        );

        let positions = self.load_positions(unit_price).await?;
        let decisions = self
            .policy
            .generate_decisions(&evaluated, &positions, plan.allocated());

        self.persist_cycle(&cycle_id, unit_price, &plan, opportunities.len(), &decisions)
            .await?;

        self.total_cycles += 1;
        self.db
            .update_agent_state(unit_price.to_f64().unwrap_or(0.0), self.total_cycles)
            .await?;

        Ok(())
    }

    /// Fetch and score the current opportunity set.
    pub async fn scan(&self) -> Result<(Vec<EvaluatedOpportunity>, Decimal)> {
        let unit_price = self.graph.get_grt_price().await?;
        let snapshot = self
            .graph
            .get_deployments(self.config.top_deployments)
            .await?;

        let ids: Vec<String> = snapshot.iter().map(|d| d.id.clone()).collect();
        let series = self.graph.get_daily_series(&ids, SERIES_DAYS).await?;
        self.record_history(&series).await?;

        let stakes = self.fetch_stakes().await?;

        Ok((
            self.evaluate(&snapshot, &series, &stakes, unit_price),
            unit_price,
        ))
    }

    /// One-shot allocation of the configured budget.
    pub async fn plan(&self) -> Result<(AllocationPlan, Vec<EvaluatedOpportunity>, Decimal)> {
        let (evaluated, unit_price) = self.scan().await?;
        let opportunities: Vec<Opportunity> = evaluated
            .iter()
            .map(|e| e.opportunity.clone())
            .collect();

        let plan = self
            .allocator
            .allocate(&opportunities, self.config.budget, unit_price)?;

        Ok((plan, evaluated, unit_price))
    }

    /// Load held positions, revalued at the current price.
    pub async fn load_positions(&self, unit_price: Decimal) -> Result<Vec<CurationPosition>> {
        let stored = self.db.get_open_positions().await?;

        Ok(stored
            .iter()
            .map(|p| {
                let signal_amount = Decimal::try_from(p.signal_amount).unwrap_or(Decimal::ZERO);
                let entry_price = Decimal::try_from(p.entry_price).unwrap_or(Decimal::ZERO);
                CurationPosition {
                    subgraph_id: p.subgraph_id.clone(),
                    signal_amount,
                    entry_price,
                    current_price: unit_price,
                    initial_value: signal_amount * entry_price,
                    current_value: signal_amount * unit_price,
                    accrued_fees: Decimal::try_from(p.accrued_fees).unwrap_or(Decimal::ZERO),
                    opened_at: chrono::DateTime::parse_from_rfc3339(&p.opened_at)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    last_updated: Utc::now(),
                }
            })
            .collect())
    }

    /// Current stake per deployment: on-chain signal when a wallet is
    /// configured, locally persisted positions otherwise.
    async fn fetch_stakes(&self) -> Result<HashMap<String, Decimal>> {
        if let Some(wallet) = &self.config.wallet {
            return self.graph.get_curator_signals(wallet).await;
        }

        let positions = self.db.get_open_positions().await?;
        Ok(positions
            .into_iter()
            .map(|p| {
                let amount = Decimal::try_from(p.signal_amount).unwrap_or(Decimal::ZERO);
                (p.subgraph_id, amount)
            })
            .collect())
    }

    /// Score the snapshot into evaluated opportunities.
    fn evaluate(
        &self,
        snapshot: &[DeploymentSnapshot],
        series: &HashMap<String, DailySeries>,
        stakes: &HashMap<String, Decimal>,
        unit_price: Decimal,
    ) -> Vec<EvaluatedOpportunity> {
        let network = network_fee_series(series);
        let total_pool: Decimal = snapshot.iter().map(|d| d.pool_total).sum();
        let empty = DailySeries::default();

        let mut evaluated = Vec::new();

        for deployment in snapshot {
            let s = series.get(&deployment.id).unwrap_or(&empty);
            let avg_daily_fees = if s.daily_fees.is_empty() {
                0.0
            } else {
                s.daily_fees.clone().mean()
            };

            let stake = stakes.get(&deployment.id).copied().unwrap_or(Decimal::ZERO);
            let Some(opportunity) = build_opportunity(deployment, avg_daily_fees, stake) else {
                continue;
            };

            if opportunity.weekly_queries < MIN_WEEKLY_QUERIES {
                debug!(
                    deployment = %deployment.id,
                    weekly_queries = opportunity.weekly_queries,
                    "Query volume too low, skipping"
                );
                continue;
            }

            // Only keep deployments still attractive after placing one floor
            // increment on them.
            let potential = self.model.evaluate_with_addition(
                &opportunity,
                self.allocator.config().min_allocation,
                unit_price,
            );
            if potential.return_rate <= 0.0 {
                debug!(deployment = %deployment.id, "No positive diluted return, skipping");
                continue;
            }

            let signal_share = if total_pool.is_zero() {
                0.0
            } else {
                (deployment.pool_total / total_pool).to_f64().unwrap_or(0.0)
            };

            // Align the network series with this deployment's tail.
            let aligned = &network[network.len().saturating_sub(s.daily_fees.len())..];
            let metrics = MetricsCalculator::calculate(
                &deployment.id,
                &s.daily_fees,
                &s.daily_signal,
                aligned,
                signal_share,
                deployment.curator_count,
            );

            let estimate = self.model.evaluate(
                opportunity.current_stake,
                opportunity.pool_total,
                opportunity.period_revenue,
                opportunity.revenue_share_rate,
                unit_price,
                opportunity.is_new_position(),
            );

            evaluated.push(EvaluatedOpportunity {
                opportunity,
                estimate,
                metrics,
            });
        }

        evaluated
    }

    /// Persist the cycle summary and its decisions; in dry-run mode the
    /// signal transactions are logged instead of queued.
    async fn persist_cycle(
        &self,
        cycle_id: &str,
        unit_price: Decimal,
        plan: &AllocationPlan,
        opportunity_count: usize,
        decisions: &[Decision],
    ) -> Result<()> {
        let price_f64 = unit_price.to_f64().unwrap_or(0.0);

        self.db
            .save_cycle(
                cycle_id,
                price_f64,
                plan.total_budget.to_f64().unwrap_or(0.0),
                plan.allocated().to_f64().unwrap_or(0.0),
                plan.unspent.to_f64().unwrap_or(0.0),
                opportunity_count as i64,
                decisions.len() as i64,
            )
            .await?;

        for decision in decisions {
            let decision_id = Uuid::new_v4().to_string();
            let amount = decision.amount.to_f64().unwrap_or(0.0);

            self.db
                .save_decision(
                    &decision_id,
                    cycle_id,
                    &decision.subgraph_id,
                    decision.action.as_str(),
                    amount,
                    decision.confidence,
                    decision.priority as i64,
                    &decision.reason,
                )
                .await?;

            match decision.action {
                SignalAction::Hold => {
                    debug!(deployment = %decision.subgraph_id, "Holding position");
                    self.db
                        .update_decision_status(&decision_id, "executed", None)
                        .await?;
                }
                SignalAction::Add if self.config.dry_run => {
                    info!(
                        deployment = %decision.subgraph_id,
                        amount = %decision.amount,
                        confidence = decision.confidence,
                        "[DRY RUN] Would mint signal"
                    );
                    self.db
                        .update_decision_status(&decision_id, "simulated", None)
                        .await?;
                    self.db
                        .save_position(&decision.subgraph_id, amount, price_f64)
                        .await?;
                }
                SignalAction::Remove if self.config.dry_run => {
                    info!(
                        deployment = %decision.subgraph_id,
                        amount = %decision.amount,
                        reason = %decision.reason,
                        "[DRY RUN] Would burn signal"
                    );
                    self.db
                        .update_decision_status(&decision_id, "simulated", None)
                        .await?;
                    self.db.close_position(&decision.subgraph_id).await?;
                }
                _ => {
                    // Left pending for the external transaction signer.
                    info!(
                        deployment = %decision.subgraph_id,
                        action = decision.action.as_str(),
                        amount = %decision.amount,
                        "Decision queued for execution"
                    );
                }
            }
        }

        Ok(())
    }

    /// Record the latest daily datapoints for growth calculations.
    async fn record_history(&self, series: &HashMap<String, DailySeries>) -> Result<()> {
        let day = Utc::now().timestamp() / 86_400;

        for (id, s) in series {
            if let (Some(fees), Some(signal)) = (s.daily_fees.last(), s.daily_signal.last()) {
                self.db.record_fee_point(id, day, *fees, *signal).await?;
            }
        }

        Ok(())
    }

    /// Graceful shutdown.
    async fn shutdown_agent(&self) -> Result<()> {
        info!("Shutting down agent...");
        self.db.mark_agent_stopped().await?;
        info!("Agent shutdown complete");
        Ok(())
    }

    /// Get current stats.
    pub async fn get_stats(&self) -> AgentStats {
        let (total, executed, failed) = self.db.get_decision_stats().await.unwrap_or((0, 0, 0));
        let positions = self
            .db
            .get_open_positions()
            .await
            .map(|p| p.len())
            .unwrap_or(0);
        let grt_price = self
            .db
            .get_agent_state()
            .await
            .map(|s| s.grt_price)
            .unwrap_or(0.0);

        AgentStats {
            budget: self.config.budget,
            grt_price,
            total_cycles: self.total_cycles,
            open_positions: positions,
            total_decisions: total,
            executed_decisions: executed,
            failed_decisions: failed,
            is_running: !self.shutdown.load(Ordering::SeqCst),
            dry_run: self.config.dry_run,
        }
    }
}

/// Build a validated opportunity from a deployment row.
///
/// Query volume is estimated from average daily fees; revenue follows the
/// posted $4-per-100k-queries rate, annualized. Rows the core rejects are
/// skipped with a warning.
pub fn build_opportunity(
    deployment: &DeploymentSnapshot,
    avg_daily_fees_grt: f64,
    stake: Decimal,
) -> Option<Opportunity> {
    let weekly_queries = (avg_daily_fees_grt * EST_QUERIES_PER_FEE_GRT * 7.0).round() as u64;
    let annual_queries = weekly_queries * 52;
    let period_revenue =
        Decimal::from(annual_queries) / dec!(100000) * EARNINGS_PER_100K_QUERIES;

    match Opportunity::new(
        deployment.id.clone(),
        stake,
        deployment.pool_total,
        period_revenue,
        CURATOR_SHARE_RATE,
        weekly_queries,
    ) {
        Ok(opportunity) => Some(opportunity),
        Err(e) => {
            warn!(
                deployment = %deployment.id,
                error = %e,
                "Skipping malformed deployment row"
            );
            None
        }
    }
}

/// Aggregate fee series across all deployments, aligned at the latest day.
fn network_fee_series(series: &HashMap<String, DailySeries>) -> Vec<f64> {
    let max_len = series
        .values()
        .map(|s| s.daily_fees.len())
        .max()
        .unwrap_or(0);

    let mut network = vec![0.0; max_len];
    for s in series.values() {
        let offset = max_len - s.daily_fees.len();
        for (i, value) in s.daily_fees.iter().enumerate() {
            network[offset + i] += value;
        }
    }
    network
}

/// Agent statistics.
#[derive(Debug, Clone)]
pub struct AgentStats {
    pub budget: Decimal,
    pub grt_price: f64,
    pub total_cycles: i64,
    pub open_positions: usize,
    pub total_decisions: i64,
    pub executed_decisions: i64,
    pub failed_decisions: i64,
    pub is_running: bool,
    pub dry_run: bool,
}

impl std::fmt::Display for AgentStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Agent Statistics ===")?;
        writeln!(f, "Budget:          {} GRT", self.budget)?;
        writeln!(f, "GRT Price:       ${:.4}", self.grt_price)?;
        writeln!(f, "Cycles Run:      {}", self.total_cycles)?;
        writeln!(f, "Open Positions:  {}", self.open_positions)?;
        writeln!(
            f,
            "Decisions:       {} (Executed: {}, Failed: {})",
            self.total_decisions, self.executed_decisions, self.failed_decisions
        )?;
        writeln!(
            f,
            "Status:          {} {}",
            if self.is_running { "Running" } else { "Stopped" },
            if self.dry_run { "(Dry Run)" } else { "" }
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: &str, pool: Decimal) -> DeploymentSnapshot {
        DeploymentSnapshot {
            id: id.to_string(),
            pool_total: pool,
            total_query_fees: dec!(1000),
            curator_count: 3,
        }
    }

    #[test]
    fn test_build_opportunity_revenue_derivation() {
        let deployment = snapshot("Qm123", dec!(5000));

        // 2 GRT/day of fees -> 350k weekly queries -> 18.2M annual
        let opp = build_opportunity(&deployment, 2.0, dec!(100)).unwrap();

        assert_eq!(opp.weekly_queries, 350_000);
        // 18.2M / 100k * $4 = $728/yr
        assert_eq!(opp.period_revenue, dec!(728));
        assert_eq!(opp.revenue_share_rate, CURATOR_SHARE_RATE);
    }

    #[test]
    fn test_build_opportunity_rejects_stake_over_pool() {
        let deployment = snapshot("Qm123", dec!(50));
        assert!(build_opportunity(&deployment, 1.0, dec!(100)).is_none());
    }

    #[test]
    fn test_network_series_alignment() {
        let mut series = HashMap::new();
        series.insert(
            "a".to_string(),
            DailySeries {
                daily_fees: vec![1.0, 2.0, 3.0],
                daily_signal: vec![],
            },
        );
        series.insert(
            "b".to_string(),
            DailySeries {
                daily_fees: vec![10.0],
                daily_signal: vec![],
            },
        );

        // "b" only has the latest day: it contributes to the last slot
        let network = network_fee_series(&series);
        assert_eq!(network, vec![1.0, 2.0, 13.0]);
    }
}
