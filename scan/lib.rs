#![deny(dead_code)]
#![deny(unused_imports)]

pub mod config;
pub mod direction;
pub mod driver;
pub mod estimator;
pub mod io;
pub mod progress;
pub mod scoring;
mod search;
pub mod subgroup;
pub mod table;
pub mod types;

pub use config::ScanConfig;
pub use direction::ScanDirection;
pub use driver::{BiasScanner, ScanInputs};
pub use estimator::{ConstantEstimator, Estimator};
pub use scoring::ScoringFunction;
pub use subgroup::Subgroup;
pub use table::FeatureTable;
pub use types::{ScanError, ScanResult, SubgroupSummary};
