pub mod analysis;
pub mod bocpd;
pub mod change_point;
pub mod cli;
pub mod config;
pub mod data;
pub mod defaults;
pub mod error;
pub mod extrema;
pub mod gas;
pub mod hybrid;
pub mod layers;
pub mod reporting;
pub mod segmentation;
pub mod series;
pub mod stats;
pub mod volatility;

// Shared by unit tests, integration tests and benchmarks
#[doc(hidden)]
#[cfg(any(test, doctest, feature = "test-helpers"))]
pub mod test_helpers;
