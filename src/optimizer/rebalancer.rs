//! Portfolio rebalancer: minimal capital moves toward a target weight vector.

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;

use crate::models::{CurationPosition, RebalanceTrade};

/// Compute the trades needed to move `current_weights` toward
/// `target_weights` over a portfolio worth `total_value` GRT.
///
/// Deltas below `min_trade_size` are suppressed as noise. Trades are
/// ordered by descending magnitude (largest moves first, ties keeping
/// id order) and truncated to `max_trades`.
pub fn compute_trades(
    target_weights: &BTreeMap<String, Decimal>,
    current_weights: &BTreeMap<String, Decimal>,
    total_value: Decimal,
    min_trade_size: Decimal,
    max_trades: usize,
) -> Vec<RebalanceTrade> {
    let ids: BTreeSet<&String> = target_weights.keys().chain(current_weights.keys()).collect();

    let mut trades: Vec<RebalanceTrade> = ids
        .into_iter()
        .filter_map(|id| {
            let target = target_weights.get(id).copied().unwrap_or(Decimal::ZERO);
            let current = current_weights.get(id).copied().unwrap_or(Decimal::ZERO);
            let amount = total_value * (target - current);

            if amount.abs() >= min_trade_size {
                Some(RebalanceTrade {
                    subgraph_id: id.clone(),
                    amount,
                })
            } else {
                None
            }
        })
        .collect();

    // Stable sort: equal magnitudes keep id order.
    trades.sort_by(|a, b| b.amount.abs().cmp(&a.amount.abs()));
    trades.truncate(max_trades);
    trades
}

/// Current portfolio weights by share of total signal.
pub fn position_weights(positions: &[CurationPosition]) -> BTreeMap<String, Decimal> {
    let total: Decimal = positions.iter().map(|p| p.signal_amount).sum();
    if total.is_zero() {
        return positions
            .iter()
            .map(|p| (p.subgraph_id.clone(), Decimal::ZERO))
            .collect();
    }

    positions
        .iter()
        .map(|p| (p.subgraph_id.clone(), p.signal_amount / total))
        .collect()
}
