pub mod engine;
pub mod owner;
pub mod planner;
pub mod transfer;

pub use engine::{OperationsQueue, QueueState, QueueStatus};
pub use owner::QueueOwner;
pub use planner::{BatchReport, CopyRequest};
