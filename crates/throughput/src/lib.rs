//! Throughput diagnostics for USB storage: a bounded write/read benchmark
//! and a rating of the measured speed against the device's link.

#![forbid(unsafe_code)]

mod error;
pub mod link;
pub mod payload;
mod rating;
pub mod space;
mod tester;

pub use error::{Error, Phase};
pub use link::{LinkSpeed, MB, UsbVersion, effective_link};
pub use rating::{Anomaly, Assessment, Rating, SpeedClass, assess};
pub use space::SpaceProbe;
pub use tester::{Measurement, Progress, SpeedTester};
