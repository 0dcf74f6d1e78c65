//! Position model representing our minted signal on a deployment.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A held curation position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurationPosition {
    /// Deployment IPFS hash
    pub subgraph_id: String,

    /// Signal held, in GRT
    pub signal_amount: Decimal,

    /// GRT/USD price at entry
    pub entry_price: Decimal,

    /// Latest GRT/USD price
    #[serde(default)]
    pub current_price: Decimal,

    /// Cost basis in USD
    pub initial_value: Decimal,

    /// Current value of the signal in USD
    #[serde(default)]
    pub current_value: Decimal,

    /// Query fees accrued to this position, in GRT
    #[serde(default)]
    pub accrued_fees: Decimal,

    /// When the position was opened
    pub opened_at: DateTime<Utc>,

    /// Last time this position was revalued
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

impl CurationPosition {
    /// Create a new position from an initial mint.
    pub fn new(subgraph_id: String, signal_amount: Decimal, entry_price: Decimal) -> Self {
        let initial_value = signal_amount * entry_price;
        Self {
            subgraph_id,
            signal_amount,
            entry_price,
            current_price: entry_price,
            initial_value,
            current_value: initial_value,
            accrued_fees: Decimal::ZERO,
            opened_at: Utc::now(),
            last_updated: Utc::now(),
        }
    }

    /// Revalue the position at the current GRT/USD price.
    pub fn update_price(&mut self, current_price: Decimal) {
        self.current_price = current_price;
        self.current_value = self.signal_amount * current_price;
        self.last_updated = Utc::now();
    }

    /// Return on investment as a fraction, fee income included.
    pub fn roi(&self) -> Decimal {
        if self.initial_value.is_zero() {
            return Decimal::ZERO;
        }
        let fee_value = self.accrued_fees * self.current_price;
        (self.current_value + fee_value - self.initial_value) / self.initial_value
    }

    /// Check if this position is closed (signal fully burned).
    pub fn is_closed(&self) -> bool {
        self.signal_amount < Decimal::new(1, 6) // Less than 0.000001 GRT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_roi_with_fees() {
        let mut pos = CurationPosition::new("Qm123".to_string(), dec!(1000), dec!(0.10));
        assert_eq!(pos.initial_value, dec!(100));
        assert_eq!(pos.roi(), Decimal::ZERO);

        pos.accrued_fees = dec!(50);
        pos.update_price(dec!(0.12));

        // Value: 1000 * 0.12 = 120, fees: 50 * 0.12 = 6, basis 100
        assert_eq!(pos.roi(), dec!(0.26));
    }

    #[test]
    fn test_roi_zero_basis() {
        let pos = CurationPosition::new("Qm123".to_string(), dec!(0), dec!(0.10));
        assert_eq!(pos.roi(), Decimal::ZERO);
        assert!(pos.is_closed());
    }
}
