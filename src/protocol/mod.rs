pub mod controller;
pub mod optimizer;
pub mod performance;

pub use controller::{ControlledRun, RateAdjustment};
pub use optimizer::{ProtocolResult, RateEvaluation};
pub use performance::PerformanceReport;
