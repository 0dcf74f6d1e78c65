//! Decision and rebalance trade value types emitted each cycle.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What to do with a deployment's signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalAction {
    /// Mint signal (open or grow a position)
    Add,
    /// Burn signal (close a position)
    Remove,
    /// Leave the position unchanged
    Hold,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Hold => "hold",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "add" => Some(Self::Add),
            "remove" => Some(Self::Remove),
            "hold" => Some(Self::Hold),
            _ => None,
        }
    }
}

/// One signal decision for a deployment.
///
/// Generated once per cycle and handed to the execution layer; lower
/// priority values execute first (removals before additions).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Deployment IPFS hash
    pub subgraph_id: String,

    /// Action to take
    pub action: SignalAction,

    /// GRT amount to mint or burn (0 for holds)
    pub amount: Decimal,

    /// Confidence in the decision, 0 to 1
    pub confidence: f64,

    /// Execution ordering: 1 = removals, 2 = additions, 3 = holds
    pub priority: u8,

    /// Human-readable justification
    pub reason: String,
}

/// A signed capital move toward a target weight vector.
///
/// Positive amounts mint signal, negative amounts burn it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceTrade {
    /// Deployment IPFS hash
    pub subgraph_id: String,

    /// Signed GRT delta
    pub amount: Decimal,
}
