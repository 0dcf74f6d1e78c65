//! Data models for opportunities, positions, deployment metrics, and decisions.

mod decision;
mod metrics;
mod opportunity;
mod position;

pub use decision::{Decision, RebalanceTrade, SignalAction};
pub use metrics::DeploymentMetrics;
pub use opportunity::Opportunity;
pub use position::CurationPosition;
