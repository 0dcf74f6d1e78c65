//! Calculator for deployment performance metrics from daily series.

use chrono::Utc;
use statrs::statistics::Statistics;

use crate::models::DeploymentMetrics;

/// Computes `DeploymentMetrics` from daily fee and signal series.
pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Calculate metrics for one deployment.
    ///
    /// `daily_fees` and `daily_signal` are ordered oldest-first in GRT;
    /// `network_daily_fees` is the aggregate fee series across all tracked
    /// deployments over the same days. Series shorter than two points
    /// yield neutral metrics.
    pub fn calculate(
        subgraph_id: &str,
        daily_fees: &[f64],
        daily_signal: &[f64],
        network_daily_fees: &[f64],
        signal_share: f64,
        curator_count: u32,
    ) -> DeploymentMetrics {
        let mut metrics = DeploymentMetrics::new(subgraph_id.to_string());
        metrics.signal_share = signal_share;
        metrics.curator_count = curator_count;

        if daily_fees.is_empty() {
            return metrics;
        }

        metrics.avg_daily_fees = daily_fees.to_vec().mean();

        if daily_fees.len() < 2 {
            return metrics;
        }

        metrics.fee_growth_rate = Self::growth_rate(daily_fees);
        metrics.signal_growth_rate = Self::growth_rate(daily_signal);
        metrics.fee_volatility = Self::volatility(daily_fees);
        metrics.network_correlation = Self::correlation(daily_fees, network_daily_fees);

        metrics.calculated_at = Utc::now();
        metrics
    }

    /// Relative change from the first to the last point of a series.
    fn growth_rate(series: &[f64]) -> f64 {
        match (series.first(), series.last()) {
            (Some(&first), Some(&last)) if first > 0.0 => (last - first) / first,
            _ => 0.0,
        }
    }

    /// Coefficient of variation: standard deviation over mean.
    fn volatility(series: &[f64]) -> f64 {
        let mean = series.to_vec().mean();
        if mean <= 0.0 {
            return 0.0;
        }
        series.to_vec().std_dev() / mean
    }

    /// Pearson correlation between two equally sampled series.
    fn correlation(a: &[f64], b: &[f64]) -> f64 {
        let n = a.len().min(b.len());
        if n < 2 {
            return 0.0;
        }
        let a = &a[..n];
        let b = &b[..n];

        let std_a = a.to_vec().std_dev();
        let std_b = b.to_vec().std_dev();
        if std_a <= 0.0 || std_b <= 0.0 {
            return 0.0;
        }

        let cov = a.to_vec().covariance(b.to_vec());
        (cov / (std_a * std_b)).clamp(-1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_growth_and_volatility() {
        let fees = vec![100.0, 110.0, 120.0, 130.0];
        let signal = vec![1000.0, 1000.0, 900.0, 800.0];
        let network = vec![200.0, 220.0, 240.0, 260.0];

        let m = MetricsCalculator::calculate("Qm123", &fees, &signal, &network, 0.05, 4);

        assert!((m.avg_daily_fees - 115.0).abs() < 1e-9);
        assert!((m.fee_growth_rate - 0.3).abs() < 1e-9);
        assert!((m.signal_growth_rate + 0.2).abs() < 1e-9);
        assert!(m.fee_volatility > 0.0);
        // Fees move in lockstep with the network series
        assert!((m.network_correlation - 1.0).abs() < 1e-9);
        assert_eq!(m.signal_share, 0.05);
        assert_eq!(m.curator_count, 4);
    }

    #[test]
    fn test_short_series_neutral() {
        let m = MetricsCalculator::calculate("Qm123", &[42.0], &[100.0], &[42.0], 0.0, 0);

        assert_eq!(m.avg_daily_fees, 42.0);
        assert_eq!(m.fee_growth_rate, 0.0);
        assert_eq!(m.fee_volatility, 0.0);
        assert_eq!(m.network_correlation, 0.0);
    }

    #[test]
    fn test_anticorrelated_series() {
        let fees = vec![100.0, 80.0, 60.0, 40.0];
        let network = vec![10.0, 20.0, 30.0, 40.0];

        let m = MetricsCalculator::calculate("Qm123", &fees, &[1.0, 1.0, 1.0, 1.0], &network, 0.0, 1);

        assert!((m.network_correlation + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_flat_series_has_zero_correlation() {
        let fees = vec![50.0, 50.0, 50.0];
        let network = vec![10.0, 20.0, 30.0];

        let m = MetricsCalculator::calculate("Qm123", &fees, &[1.0, 1.0, 1.0], &network, 0.0, 1);

        assert_eq!(m.network_correlation, 0.0);
        assert_eq!(m.fee_volatility, 0.0);
    }
}
