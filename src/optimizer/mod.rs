//! Opportunity scoring and capital allocation.
//!
//! The modules here are pure: no I/O, no shared state, deterministic for
//! identical inputs. Callers fetch data, construct the inputs, and execute
//! the resulting plans and decisions.

mod allocator;
mod policy;
mod rebalancer;
mod returns;

use rust_decimal::Decimal;

pub use allocator::{AllocationPlan, AllocatorConfig, AllocatorState, BudgetAllocator};
pub use policy::{DecisionPolicy, EvaluatedOpportunity, PolicyConfig, RankingMode};
pub use rebalancer::{compute_trades, position_weights};
pub use returns::{ReturnEstimate, ReturnModel, DEFAULT_ENTRY_COST};

/// Invalid-input errors raised by the optimizer core.
///
/// These are never coerced or retried internally; the caller corrects the
/// inputs and calls again.
#[derive(Clone, Debug, PartialEq)]
pub enum OptimizerError {
    /// An opportunity id is empty.
    EmptyId,
    /// A quantity that must be non-negative was negative.
    NegativeQuantity { field: &'static str },
    /// An opportunity's stake exceeds its pool total.
    StakeExceedsPool { id: String },
    /// The revenue share rate is outside [0, 1].
    ShareOutOfRange { share: Decimal },
    /// Two opportunities share the same id.
    DuplicateId { id: String },
    /// The budget cannot fund even one position at the allocation floor.
    BudgetBelowMinimum {
        budget: Decimal,
        min_allocation: Decimal,
    },
}

impl std::fmt::Display for OptimizerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyId => write!(f, "opportunity id must not be empty"),
            Self::NegativeQuantity { field } => {
                write!(f, "{field} must be non-negative")
            }
            Self::StakeExceedsPool { id } => {
                write!(f, "stake exceeds pool total for deployment '{id}'")
            }
            Self::ShareOutOfRange { share } => {
                write!(f, "revenue share rate {share} outside [0, 1]")
            }
            Self::DuplicateId { id } => {
                write!(f, "duplicate opportunity id '{id}'")
            }
            Self::BudgetBelowMinimum {
                budget,
                min_allocation,
            } => {
                write!(
                    f,
                    "budget {budget} GRT below the {min_allocation} GRT allocation floor"
                )
            }
        }
    }
}

impl std::error::Error for OptimizerError {}
