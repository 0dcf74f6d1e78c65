//! Decision policy: turns scored opportunities and held positions into
//! prioritized add/remove/hold decisions.

use std::collections::HashSet;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use super::returns::ReturnEstimate;
use crate::models::{CurationPosition, Decision, DeploymentMetrics, Opportunity, SignalAction};

/// How new candidates are ranked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankingMode {
    /// Rank purely by return rate
    ReturnRate,
    /// Discount return by correlation with the rest of the network,
    /// favoring diversifying positions
    RiskAdjusted,
}

/// Policy thresholds and sizing limits.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Minimum acceptable annualized return rate (fraction)
    pub min_return_rate: f64,

    /// Maximum acceptable risk score (0-100)
    pub max_risk_score: f64,

    /// Minimum position size in GRT
    pub min_position_size: Decimal,

    /// Maximum position size in GRT
    pub max_position_size: Decimal,

    /// Target number of concurrent positions
    pub target_position_count: usize,

    /// Candidate ranking mode
    pub ranking: RankingMode,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            min_return_rate: 0.10,         // 10% APR floor
            max_risk_score: 70.0,          // Reject the riskiest tail
            min_position_size: dec!(1000), // 1k GRT
            max_position_size: dec!(100000), // 100k GRT
            target_position_count: 10,
            ranking: RankingMode::ReturnRate,
        }
    }
}

/// An opportunity bundled with its return estimate and deployment metrics.
#[derive(Debug, Clone)]
pub struct EvaluatedOpportunity {
    pub opportunity: Opportunity,
    pub estimate: ReturnEstimate,
    pub metrics: DeploymentMetrics,
}

/// Stateless per-cycle decision generator.
pub struct DecisionPolicy {
    config: PolicyConfig,
}

impl DecisionPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Generate decisions for one cycle.
    ///
    /// Held positions violating the return or risk threshold produce
    /// `Remove` decisions (priority 1); healthy positions produce explicit
    /// `Hold` decisions (priority 3). Unheld candidates meeting both
    /// thresholds produce `Add` decisions (priority 2) up to the target
    /// position count, sized by relative rank weight of `available_budget`
    /// and clamped to the position size limits. The result is sorted by
    /// priority, removals first.
    pub fn generate_decisions(
        &self,
        evaluated: &[EvaluatedOpportunity],
        positions: &[CurationPosition],
        available_budget: Decimal,
    ) -> Vec<Decision> {
        let mut decisions = Vec::new();

        let held: HashSet<&str> = positions.iter().map(|p| p.subgraph_id.as_str()).collect();

        // Re-evaluate existing positions against the thresholds.
        for position in positions {
            let Some(ev) = evaluated
                .iter()
                .find(|e| e.opportunity.id == position.subgraph_id)
            else {
                debug!(
                    deployment = %position.subgraph_id,
                    "Held deployment missing from snapshot, skipping"
                );
                continue;
            };

            let rate = ev.estimate.return_rate;
            let risk = ev.metrics.risk_score();

            if rate < self.config.min_return_rate {
                decisions.push(Decision {
                    subgraph_id: position.subgraph_id.clone(),
                    action: SignalAction::Remove,
                    amount: position.signal_amount,
                    confidence: ev.metrics.confidence(),
                    priority: 1,
                    reason: format!(
                        "Return rate {:.1}% below minimum {:.1}%",
                        rate * 100.0,
                        self.config.min_return_rate * 100.0
                    ),
                });
            } else if risk > self.config.max_risk_score {
                decisions.push(Decision {
                    subgraph_id: position.subgraph_id.clone(),
                    action: SignalAction::Remove,
                    amount: position.signal_amount,
                    confidence: ev.metrics.confidence(),
                    priority: 1,
                    reason: format!(
                        "Risk score {:.1} above maximum {:.1}",
                        risk, self.config.max_risk_score
                    ),
                });
            } else {
                decisions.push(Decision {
                    subgraph_id: position.subgraph_id.clone(),
                    action: SignalAction::Hold,
                    amount: Decimal::ZERO,
                    confidence: 1.0,
                    priority: 3,
                    reason: "Meets return and risk criteria".to_string(),
                });
            }
        }

        // Rank unheld candidates for new positions.
        let open_slots = self
            .config
            .target_position_count
            .saturating_sub(positions.len());

        if open_slots > 0 && available_budget >= self.config.min_position_size {
            let mut candidates: Vec<&EvaluatedOpportunity> = evaluated
                .iter()
                .filter(|e| !held.contains(e.opportunity.id.as_str()))
                .filter(|e| {
                    e.estimate.return_rate >= self.config.min_return_rate
                        && e.metrics.risk_score() <= self.config.max_risk_score
                })
                .collect();

            candidates.sort_by(|a, b| self.rank(b).total_cmp(&self.rank(a)));
            candidates.truncate(open_slots);

            let total_rank: f64 = candidates.iter().map(|e| self.rank(e)).sum();

            for ev in &candidates {
                let weight = if total_rank > 0.0 {
                    self.rank(ev) / total_rank
                } else {
                    1.0 / candidates.len() as f64
                };

                let raw_amount =
                    available_budget * Decimal::try_from(weight).unwrap_or(Decimal::ZERO);
                let amount = raw_amount
                    .max(self.config.min_position_size)
                    .min(self.config.max_position_size);

                decisions.push(Decision {
                    subgraph_id: ev.opportunity.id.clone(),
                    action: SignalAction::Add,
                    amount,
                    confidence: ev.metrics.confidence(),
                    priority: 2,
                    reason: format!(
                        "New opportunity at {:.1}% return, risk {:.1}",
                        ev.estimate.return_rate * 100.0,
                        ev.metrics.risk_score()
                    ),
                });
            }
        }

        decisions.sort_by_key(|d| d.priority);
        decisions
    }

    /// Ranking weight for a candidate under the configured mode.
    fn rank(&self, ev: &EvaluatedOpportunity) -> f64 {
        match self.config.ranking {
            RankingMode::ReturnRate => ev.estimate.return_rate,
            RankingMode::RiskAdjusted => {
                ev.estimate.return_rate * (1.0 - ev.metrics.network_correlation).max(0.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn evaluated(id: &str, return_rate: f64) -> EvaluatedOpportunity {
        let opportunity =
            Opportunity::new(id, dec!(0), dec!(1000), dec!(5000), dec!(0.10), 10_000).unwrap();
        let mut metrics = DeploymentMetrics::new(id.to_string());
        // Healthy defaults: growing fees, decent correlation, low volatility
        metrics.fee_growth_rate = 0.2;
        metrics.signal_growth_rate = 0.1;
        metrics.network_correlation = 0.6;
        metrics.fee_volatility = 0.2;

        EvaluatedOpportunity {
            opportunity,
            estimate: ReturnEstimate {
                distributable: dec!(500),
                estimated_return: dec!(0),
                return_rate,
            },
            metrics,
        }
    }

    fn position(id: &str, signal: Decimal) -> CurationPosition {
        CurationPosition::new(id.to_string(), signal, dec!(0.10))
    }

    #[test]
    fn test_low_return_triggers_removal() {
        let policy = DecisionPolicy::new(PolicyConfig::default());
        let evaluated = vec![evaluated("a", 0.05)];
        let positions = vec![position("a", dec!(5000))];

        let decisions = policy.generate_decisions(&evaluated, &positions, Decimal::ZERO);

        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].action, SignalAction::Remove);
        assert_eq!(decisions[0].priority, 1);
        assert_eq!(decisions[0].amount, dec!(5000));
        assert!(decisions[0].reason.contains("below minimum"));
    }

    #[test]
    fn test_high_risk_triggers_removal() {
        let policy = DecisionPolicy::new(PolicyConfig::default());
        let mut ev = evaluated("a", 0.50);
        ev.metrics.fee_volatility = 5.0;
        ev.metrics.fee_growth_rate = -0.8;
        ev.metrics.signal_growth_rate = -0.5;
        ev.metrics.network_correlation = 0.0;
        assert!(ev.metrics.risk_score() > 70.0);

        let positions = vec![position("a", dec!(5000))];
        let decisions = policy.generate_decisions(&[ev], &positions, Decimal::ZERO);

        assert_eq!(decisions[0].action, SignalAction::Remove);
        assert!(decisions[0].reason.contains("Risk score"));
    }

    #[test]
    fn test_healthy_position_holds() {
        let policy = DecisionPolicy::new(PolicyConfig::default());
        let evaluated = vec![evaluated("a", 0.50)];
        let positions = vec![position("a", dec!(5000))];

        let decisions = policy.generate_decisions(&evaluated, &positions, Decimal::ZERO);

        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].action, SignalAction::Hold);
        assert_eq!(decisions[0].priority, 3);
        assert_eq!(decisions[0].confidence, 1.0);
    }

    #[test]
    fn test_adds_sized_by_rank_weight() {
        let policy = DecisionPolicy::new(PolicyConfig {
            target_position_count: 2,
            ..PolicyConfig::default()
        });
        let evaluated = vec![
            evaluated("a", 0.75),
            evaluated("b", 0.25),
            evaluated("c", 0.05), // Below the return floor, excluded
        ];

        let decisions = policy.generate_decisions(&evaluated, &[], dec!(10000));

        assert_eq!(decisions.len(), 2);
        assert!(decisions.iter().all(|d| d.action == SignalAction::Add));
        let a = decisions.iter().find(|d| d.subgraph_id == "a").unwrap();
        let b = decisions.iter().find(|d| d.subgraph_id == "b").unwrap();
        // 0.75/1.00 and 0.25/1.00 of the 10k budget
        assert_eq!(a.amount, dec!(7500));
        assert_eq!(b.amount, dec!(2500));
    }

    #[test]
    fn test_add_sizes_clamped() {
        let policy = DecisionPolicy::new(PolicyConfig {
            target_position_count: 1,
            max_position_size: dec!(5000),
            ..PolicyConfig::default()
        });
        let evaluated = vec![evaluated("a", 0.30)];

        let decisions = policy.generate_decisions(&evaluated, &[], dec!(50000));

        assert_eq!(decisions[0].amount, dec!(5000));
    }

    #[test]
    fn test_removals_sort_before_adds() {
        let policy = DecisionPolicy::new(PolicyConfig::default());
        let evaluated = vec![evaluated("a", 0.05), evaluated("b", 0.30)];
        let positions = vec![position("a", dec!(5000))];

        let decisions = policy.generate_decisions(&evaluated, &positions, dec!(10000));

        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[0].action, SignalAction::Remove);
        assert_eq!(decisions[1].action, SignalAction::Add);
    }

    #[test]
    fn test_no_adds_past_target_count() {
        let policy = DecisionPolicy::new(PolicyConfig {
            target_position_count: 1,
            ..PolicyConfig::default()
        });
        let evaluated = vec![evaluated("a", 0.50), evaluated("b", 0.30)];
        let positions = vec![position("a", dec!(5000))];

        let decisions = policy.generate_decisions(&evaluated, &positions, dec!(10000));

        // One hold, no adds: the target count is already met
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].action, SignalAction::Hold);
    }

    #[test]
    fn test_risk_adjusted_ranking_prefers_decorrelated() {
        let policy = DecisionPolicy::new(PolicyConfig {
            target_position_count: 1,
            ranking: RankingMode::RiskAdjusted,
            ..PolicyConfig::default()
        });

        let mut hot = evaluated("hot", 0.40);
        hot.metrics.network_correlation = 0.9;
        let mut diversifier = evaluated("div", 0.30);
        diversifier.metrics.network_correlation = 0.1;

        // 0.40 * 0.1 = 0.04 vs 0.30 * 0.9 = 0.27
        let decisions = policy.generate_decisions(&[hot, diversifier], &[], dec!(10000));

        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].subgraph_id, "div");
    }
}
