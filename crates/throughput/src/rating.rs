#![forbid(unsafe_code)]

use crate::link::LinkSpeed;
use crate::tester::Measurement;
use config::Thresholds;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Cable/link quality derived from the efficiency ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl Rating {
    pub fn from_efficiency(efficiency: f64, thresholds: &Thresholds) -> Self {
        if efficiency < thresholds.poor {
            Self::Poor
        } else if efficiency < thresholds.fair {
            Self::Fair
        } else if efficiency < thresholds.good {
            Self::Good
        } else {
            Self::Excellent
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Poor => "poor",
            Self::Fair => "fair",
            Self::Good => "good",
            Self::Excellent => "excellent",
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Absolute speed bucket, independent of what the link could carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedClass {
    VerySlow,
    /// USB 1.1 territory.
    Slow,
    /// USB 2.0.
    Moderate,
    /// USB 2.0 high-speed.
    Good,
    /// USB 3.0.
    VeryGood,
    /// USB 3.0 and above.
    Excellent,
}

impl SpeedClass {
    pub fn from_mbps(mbps: f64) -> Self {
        if mbps >= 400.0 {
            Self::Excellent
        } else if mbps >= 200.0 {
            Self::VeryGood
        } else if mbps >= 60.0 {
            Self::Good
        } else if mbps >= 10.0 {
            Self::Moderate
        } else if mbps >= 1.0 {
            Self::Slow
        } else {
            Self::VerySlow
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    /// The device moved data faster than its link allows, so the reported
    /// link speed is wrong.
    ExceedsTheoretical { observed: f64, theoretical: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub link: Option<LinkSpeed>,
    /// Ceiling in MB/s.
    pub theoretical: Option<f64>,
    /// Always within `0.0..=1.0`.
    pub efficiency: Option<f64>,
    pub rating: Option<Rating>,
    pub speed_class: SpeedClass,
    pub anomaly: Option<Anomaly>,
}

/// Rate a measurement against the link it ran on. The faster of the two
/// directions is compared with the ceiling.
pub fn assess(
    measurement: &Measurement,
    link: Option<LinkSpeed>,
    thresholds: &Thresholds,
) -> Assessment {
    let observed = measurement.observed_speed();
    let speed_class = SpeedClass::from_mbps(observed);

    let Some(link) = link else {
        return Assessment {
            link: None,
            theoretical: None,
            efficiency: None,
            rating: None,
            speed_class,
            anomaly: None,
        };
    };

    let theoretical = link.theoretical_mbps();
    let anomaly = (observed > theoretical).then(|| {
        warn!(
            observed,
            theoretical,
            %link,
            "measured speed exceeds the link ceiling"
        );
        Anomaly::ExceedsTheoretical {
            observed,
            theoretical,
        }
    });
    let efficiency = (observed.min(theoretical) / theoretical).clamp(0.0, 1.0);

    Assessment {
        link: Some(link),
        theoretical: Some(theoretical),
        efficiency: Some(efficiency),
        rating: Some(Rating::from_efficiency(efficiency, thresholds)),
        speed_class,
        anomaly,
    }
}
