pub mod analysis;
pub mod config;
pub mod control;
pub mod error;
pub mod hasher;
pub mod matcher;
pub mod platform;
pub mod queue;
pub mod scanner;
pub mod service;
pub mod storage;

pub use config::AppConfig;
pub use control::ControlToken;
pub use error::{Error, ErrorStatus, Result};
pub use hasher::{HashEngine, HashRunStatus, HashState};
pub use queue::{CopyRequest, OperationsQueue, QueueState, QueueStatus};
pub use scanner::{ScanControl, ScanEngine, ScanState, ScanStatus, Throttle};
pub use service::{Page, Service};
pub use storage::Database;
