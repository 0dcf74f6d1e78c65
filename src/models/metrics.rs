//! Per-deployment performance metrics: fee growth, volatility, correlation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Performance metrics for a subgraph deployment.
///
/// Derived from daily fee and signal series by the metrics calculator;
/// consumed by the decision policy as risk and confidence inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentMetrics {
    /// Deployment IPFS hash
    pub subgraph_id: String,

    /// When these metrics were calculated
    pub calculated_at: DateTime<Utc>,

    /// Average daily query fees over the window, in GRT
    pub avg_daily_fees: f64,

    /// Relative fee growth over the window (-1.0 .. inf)
    pub fee_growth_rate: f64,

    /// Relative signal growth over the window
    pub signal_growth_rate: f64,

    /// Fee volatility as a coefficient of variation
    pub fee_volatility: f64,

    /// Correlation of this deployment's fee series with the network-wide series
    pub network_correlation: f64,

    /// Fraction of total network signal on this deployment
    pub signal_share: f64,

    /// Number of curators signaling on the deployment
    pub curator_count: u32,
}

impl DeploymentMetrics {
    /// Create empty metrics for a deployment.
    pub fn new(subgraph_id: String) -> Self {
        Self {
            subgraph_id,
            calculated_at: Utc::now(),
            avg_daily_fees: 0.0,
            fee_growth_rate: 0.0,
            signal_growth_rate: 0.0,
            fee_volatility: 0.0,
            network_correlation: 0.0,
            signal_share: 0.0,
            curator_count: 0,
        }
    }

    /// Risk score from 0 (lowest risk) to 100 (highest risk).
    ///
    /// Broad support (correlation, signal share, curator presence) reduces
    /// risk; volatility and shrinking fees or signal raise it.
    pub fn risk_score(&self) -> f64 {
        let positive = [
            self.network_correlation,
            self.signal_share,
            (self.curator_count as f64 / 10.0).min(1.0),
        ];
        let negative = [
            self.fee_volatility,
            -self.fee_growth_rate,
            -self.signal_growth_rate,
        ];

        let raw = (negative.iter().sum::<f64>() - positive.iter().sum::<f64>())
            / (positive.len() + negative.len()) as f64;

        // Normalize to 0-100
        ((raw + 1.0) * 50.0).clamp(0.0, 100.0)
    }

    /// Confidence score from 0 to 1 for decisions about this deployment.
    ///
    /// Weighted sum of boolean indicators:
    /// - fees growing: 0.3
    /// - signal growing: 0.2
    /// - correlated with network activity: 0.3
    /// - fees stable: 0.2
    pub fn confidence(&self) -> f64 {
        let indicators = [
            (self.fee_growth_rate > 0.0, 0.3),
            (self.signal_growth_rate > 0.0, 0.2),
            (self.network_correlation > 0.5, 0.3),
            (self.fee_volatility < 0.5, 0.2),
        ];

        indicators
            .iter()
            .filter(|(flag, _)| *flag)
            .map(|(_, weight)| weight)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_weights() {
        let mut m = DeploymentMetrics::new("Qm123".to_string());
        // Fresh metrics: only the low-volatility indicator fires
        assert!((m.confidence() - 0.2).abs() < 1e-9);

        m.fee_growth_rate = 0.1;
        m.signal_growth_rate = 0.05;
        m.network_correlation = 0.8;
        assert!((m.confidence() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_risk_score_bounds() {
        let mut m = DeploymentMetrics::new("Qm123".to_string());
        m.fee_volatility = 5.0;
        m.fee_growth_rate = -1.0;
        m.signal_growth_rate = -1.0;
        assert_eq!(m.risk_score(), 100.0);

        m.fee_volatility = 0.0;
        m.fee_growth_rate = 1.0;
        m.signal_growth_rate = 1.0;
        m.network_correlation = 1.0;
        m.signal_share = 1.0;
        m.curator_count = 20;
        // (-2 - 3) / 6 = -0.8333 -> 8.33 after normalization
        assert!(m.risk_score() < 10.0);
    }

    #[test]
    fn test_risk_score_neutral() {
        let m = DeploymentMetrics::new("Qm123".to_string());
        // All-zero metrics sit at the midpoint
        assert_eq!(m.risk_score(), 50.0);
    }
}
