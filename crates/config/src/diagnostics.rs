#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Diagnostics {
    /// Sample size used when the caller does not ask for one.
    pub default_sample_size: u64,

    /// Largest sample a caller may request.
    pub max_sample_size: u64,

    /// Size of a single write/read call.
    pub chunk_size: usize,

    /// Bytes that must stay free on the target on top of the sample.
    pub space_margin: u64,

    /// File name prefix of the temporary test payload.
    pub file_prefix: String,

    pub thresholds: Thresholds,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            default_sample_size: 64 * MIB,
            max_sample_size: 1024 * MIB,
            chunk_size: MIB as usize,
            space_margin: MIB,
            file_prefix: ".usbwatch-speedtest".into(),
            thresholds: Thresholds::default(),
        }
    }
}

/// Efficiency cut-offs. A ratio below `poor` rates poor, below `fair` rates
/// fair, below `good` rates good, anything else excellent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Thresholds {
    pub poor: f64,
    pub fair: f64,
    pub good: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            poor: 0.3,
            fair: 0.6,
            good: 0.85,
        }
    }
}

impl Thresholds {
    /// Clamp every cut-off into `0.0..=1.0` and force them into ascending
    /// order.
    pub fn clamp(self) -> Self {
        let poor = self.poor.clamp(0.0, 1.0);
        let fair = self.fair.clamp(poor, 1.0);
        let good = self.good.clamp(fair, 1.0);
        Self { poor, fair, good }
    }

    pub fn is_ordered(&self) -> bool {
        0.0 < self.poor && self.poor <= self.fair && self.fair <= self.good && self.good <= 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_thresholds_are_ordered() {
        assert!(Thresholds::default().is_ordered());
    }

    proptest! {
        #[test]
        fn clamp_orders_and_bounds(a in -5.0f64..5.0, b in -5.0f64..5.0, c in -5.0f64..5.0) {
            let t = Thresholds { poor: a, fair: b, good: c }.clamp();
            prop_assert!((0.0..=1.0).contains(&t.poor));
            prop_assert!((0.0..=1.0).contains(&t.fair));
            prop_assert!((0.0..=1.0).contains(&t.good));
            prop_assert!(t.poor <= t.fair && t.fair <= t.good);
        }
    }
}
