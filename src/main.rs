//! GRT Curation Signal Optimizer
//!
//! Scores subgraph deployments by diluted query-fee return, allocates a
//! GRT budget across them under concentration limits, and emits
//! prioritized signal decisions for an execution layer.

mod agent;
mod api;
mod db;
mod metrics;
mod models;
mod optimizer;

use std::collections::BTreeMap;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::agent::{Agent, AgentConfig};
use crate::db::Database;
use crate::models::{CurationPosition, SignalAction};
use crate::optimizer::{
    compute_trades, position_weights, AllocatorConfig, PolicyConfig, ReturnModel,
};

/// Curation agent CLI.
#[derive(Parser)]
#[command(name = "curator")]
#[command(about = "Optimize GRT curation signal across subgraph deployments", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:./curator.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank current curation opportunities by return rate
    Opportunities {
        /// Number of top deployments to evaluate
        #[arg(short, long, default_value = "20")]
        top: usize,
    },

    /// Compute an allocation plan for a GRT budget
    Plan {
        /// GRT budget to allocate
        #[arg(short, long)]
        budget: f64,

        /// Number of top deployments to evaluate
        #[arg(short, long, default_value = "50")]
        top: usize,

        /// Minimum GRT per retained position
        #[arg(long, default_value = "100")]
        min_allocation: f64,

        /// Maximum fraction of the budget per deployment
        #[arg(long, default_value = "0.25")]
        max_concentration: f64,
    },

    /// Compute trades toward target weights from a JSON file
    Rebalance {
        /// Path to a JSON file mapping deployment id to target weight
        #[arg(short, long)]
        targets: String,

        /// Minimum trade size in GRT
        #[arg(long, default_value = "100")]
        min_trade: f64,

        /// Maximum number of trades to emit
        #[arg(long, default_value = "10")]
        max_trades: usize,
    },

    /// Start the curation agent
    Run {
        /// GRT budget available for signaling
        #[arg(short, long)]
        budget: f64,

        /// Polling interval in seconds
        #[arg(short, long, default_value = "300")]
        interval: u64,

        /// Curator wallet address for on-chain stake lookups
        #[arg(short, long)]
        wallet: Option<String>,

        /// Dry run (log transactions instead of queueing them)
        #[arg(long)]
        dry_run: bool,
    },

    /// Show current configuration
    Config,

    /// Show agent status and statistics
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Opportunities { top } => {
            let config = AgentConfig {
                top_deployments: top,
                database_url: cli.database.clone(),
                ..AgentConfig::default()
            };
            let agent = Agent::new(config).await?;

            info!(top, "Scanning curation opportunities");
            let (mut evaluated, price) = agent.scan().await?;
            evaluated.sort_by(|a, b| b.estimate.return_rate.total_cmp(&a.estimate.return_rate));

            println!("\nGRT price: ${:.4}", price);
            println!(
                "\n{:<48} {:>14} {:>10} {:>11} {:>8} {:>8} {:>6}",
                "DEPLOYMENT", "POOL (GRT)", "WEEKLY Q", "FEES/YR ($)", "OWNED", "APR", "RISK"
            );
            println!("{}", "-".repeat(112));

            for ev in &evaluated {
                println!(
                    "{:<48} {:>14.0} {:>10} {:>11.0} {:>7.2}% {:>7.1}% {:>6.1}",
                    truncate(&ev.opportunity.id, 46),
                    ev.opportunity.pool_total,
                    ev.opportunity.weekly_queries,
                    ev.opportunity.distributable(),
                    ev.opportunity.owned_fraction() * Decimal::from(100),
                    ev.estimate.return_rate * 100.0,
                    ev.metrics.risk_score()
                );
            }
        }

        Commands::Plan {
            budget,
            top,
            min_allocation,
            max_concentration,
        } => {
            let config = AgentConfig {
                budget: Decimal::try_from(budget)?,
                top_deployments: top,
                database_url: cli.database.clone(),
                allocator_config: AllocatorConfig {
                    min_allocation: Decimal::try_from(min_allocation)?,
                    max_concentration: Decimal::try_from(max_concentration)?,
                    ..AllocatorConfig::default()
                },
                ..AgentConfig::default()
            };
            let agent = Agent::new(config).await?;

            info!(budget, "Computing allocation plan");
            let (plan, evaluated, price) = agent.plan().await?;

            let model = ReturnModel::default();
            println!("\n=== Allocation Plan ===");
            println!("Budget:    {} GRT", plan.total_budget);
            println!("Allocated: {} GRT", plan.allocated());
            println!("Unspent:   {} GRT", plan.unspent);
            println!("State:     {:?}", plan.state);

            if plan.is_empty() {
                println!("\nNo deployment could absorb an allocation under the current limits.");
                return Ok(());
            }

            println!("\n{:<48} {:>12} {:>10}", "DEPLOYMENT", "SIGNAL", "APR AFTER");
            println!("{}", "-".repeat(74));

            for (id, amount) in &plan.assignments {
                let rate_after = evaluated
                    .iter()
                    .find(|ev| &ev.opportunity.id == id)
                    .map(|ev| {
                        model
                            .evaluate_with_addition(&ev.opportunity, *amount, price)
                            .return_rate
                    })
                    .unwrap_or(0.0);

                println!(
                    "{:<48} {:>12.2} {:>9.1}%",
                    truncate(id, 46),
                    amount,
                    rate_after * 100.0
                );
            }
        }

        Commands::Rebalance {
            targets,
            min_trade,
            max_trades,
        } => {
            let raw = std::fs::read_to_string(&targets)?;
            let target_weights: BTreeMap<String, Decimal> = serde_json::from_str(&raw)?;

            let db = Database::new(&cli.database).await?;
            let stored = db.get_open_positions().await?;
            if stored.is_empty() {
                println!("No open positions to rebalance.");
                return Ok(());
            }

            let positions: Vec<CurationPosition> = stored
                .iter()
                .map(|p| {
                    CurationPosition::new(
                        p.subgraph_id.clone(),
                        Decimal::try_from(p.signal_amount).unwrap_or_default(),
                        Decimal::try_from(p.entry_price).unwrap_or_default(),
                    )
                })
                .collect();

            let current_weights = position_weights(&positions);
            let total_value: Decimal = positions.iter().map(|p| p.signal_amount).sum();

            let trades = compute_trades(
                &target_weights,
                &current_weights,
                total_value,
                Decimal::try_from(min_trade)?,
                max_trades,
            );

            if trades.is_empty() {
                println!("Portfolio already within tolerance of target weights.");
                return Ok(());
            }

            println!("\n{:<48} {:>14}", "DEPLOYMENT", "DELTA (GRT)");
            println!("{}", "-".repeat(64));
            for trade in &trades {
                println!(
                    "{:<48} {:>+14.2}",
                    truncate(&trade.subgraph_id, 46),
                    trade.amount
                );
            }
        }

        Commands::Run {
            budget,
            interval,
            wallet,
            dry_run,
        } => {
            info!(
                budget = budget,
                interval = interval,
                dry_run = dry_run,
                "Starting curation agent"
            );

            let config = AgentConfig {
                budget: Decimal::try_from(budget)?,
                poll_interval_secs: interval,
                dry_run,
                wallet,
                database_url: cli.database.clone(),
                ..AgentConfig::default()
            };

            let mut agent = Agent::new(config).await?;
            agent.initialize().await?;

            println!("\n=== GRT Curation Agent ===");
            println!("Budget: {} GRT", budget);
            println!("Polling interval: {}s", interval);
            println!(
                "Mode: {}",
                if dry_run {
                    "DRY RUN (no real transactions)"
                } else {
                    "LIVE (decisions queued for signer)"
                }
            );
            println!("\nPress Ctrl+C to stop.\n");

            if let Err(e) = agent.run().await {
                tracing::error!(error = %e, "Agent error");
            }

            let stats = agent.get_stats().await;
            println!("\n{}", stats);
        }

        Commands::Config => {
            let allocator = AllocatorConfig::default();
            let policy = PolicyConfig::default();
            let agent = AgentConfig::default();

            println!("\n=== Allocator Configuration ===\n");
            println!("Min Allocation:       {} GRT", allocator.min_allocation);
            println!(
                "Max Concentration:    {}%",
                allocator.max_concentration * Decimal::from(100)
            );
            println!(
                "Step Size:            {}",
                allocator
                    .step_size
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "min allocation".to_string())
            );
            println!("Max Iterations:       {}", allocator.max_iterations);

            println!("\n=== Decision Policy ===\n");
            println!(
                "Min Return Rate:      {:.1}%",
                policy.min_return_rate * 100.0
            );
            println!("Max Risk Score:       {:.1}", policy.max_risk_score);
            println!("Min Position Size:    {} GRT", policy.min_position_size);
            println!("Max Position Size:    {} GRT", policy.max_position_size);
            println!("Target Positions:     {}", policy.target_position_count);
            println!("Ranking Mode:         {:?}", policy.ranking);

            println!("\n=== Agent Defaults ===\n");
            println!("Budget:               {} GRT", agent.budget);
            println!("Poll Interval:        {}s", agent.poll_interval_secs);
            println!("Top Deployments:      {}", agent.top_deployments);
            println!(
                "Curator Share:        {}%",
                crate::agent::CURATOR_SHARE_RATE * Decimal::from(100)
            );
        }

        Commands::Status => {
            let db = Database::new(&cli.database).await?;

            let state = match db.get_agent_state().await {
                Ok(state) => state,
                Err(_) => {
                    println!("No agent session found. Run 'curator run' to start the agent.");
                    return Ok(());
                }
            };

            let (total, executed, failed) = db.get_decision_stats().await.unwrap_or((0, 0, 0));
            let positions = db.get_open_positions().await?;
            let pending = db.get_pending_decisions().await?;
            let total_signal = db.get_total_signal().await.unwrap_or(0.0);
            let cycles = db.get_recent_cycles(5).await?;
            let price = Decimal::try_from(state.grt_price).unwrap_or_default();

            println!("\n=== Agent Status ===");
            println!(
                "Running:          {}",
                if state.is_running { "Yes" } else { "No" }
            );
            println!("Started:          {}", state.started_at);
            println!(
                "Last Cycle:       {}",
                state.last_cycle_at.unwrap_or_else(|| "Never".to_string())
            );
            println!("Budget:           {} GRT", state.budget);
            println!("GRT Price:        ${:.4}", state.grt_price);
            println!("Total Cycles:     {}", state.total_cycles);
            println!("Total Signal:     {:.2} GRT", total_signal);

            println!("\n=== Decisions ===");
            println!("Total:            {}", total);
            println!("Executed:         {}", executed);
            println!("Failed:           {}", failed);
            println!("Pending:          {}", pending.len());
            for decision in pending.iter().take(10) {
                let action = SignalAction::from_str(&decision.action)
                    .map(|a| a.as_str())
                    .unwrap_or("?");
                println!(
                    "  [{}] {} {:.2} GRT on {}",
                    decision.priority,
                    action,
                    decision.amount,
                    truncate(&decision.subgraph_id, 30)
                );
            }

            println!("\n=== Open Positions ({}) ===", positions.len());
            for pos in &positions {
                let mut position = CurationPosition::new(
                    pos.subgraph_id.clone(),
                    Decimal::try_from(pos.signal_amount).unwrap_or_default(),
                    Decimal::try_from(pos.entry_price).unwrap_or_default(),
                );
                position.accrued_fees = Decimal::try_from(pos.accrued_fees).unwrap_or_default();
                position.update_price(price);

                let fee_series = db.get_fee_series(&pos.subgraph_id, 7).await?;
                let avg_fees = if fee_series.is_empty() {
                    0.0
                } else {
                    fee_series.iter().map(|(fees, _)| fees).sum::<f64>()
                        / fee_series.len() as f64
                };

                println!(
                    "  {} {:.2} GRT @ ${:.4} | ROI {:.1}% | {:.2} GRT/day fees",
                    truncate(&pos.subgraph_id, 30),
                    pos.signal_amount,
                    pos.entry_price,
                    position.roi() * Decimal::from(100),
                    avg_fees
                );
            }

            if !cycles.is_empty() {
                println!("\n=== Recent Cycles ===");
                for cycle in &cycles {
                    println!(
                        "  {} | allocated {:.0}/{:.0} GRT | {} decisions",
                        cycle.created_at, cycle.allocated, cycle.budget, cycle.decision_count
                    );
                }
            }
        }
    }

    Ok(())
}

/// Truncate a string with ellipsis if too long.
fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len - 3])
    }
}
