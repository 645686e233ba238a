pub mod engine;
pub mod walk;

pub use engine::{ScanControl, ScanEngine, ScanState, ScanStatus, Throttle};
