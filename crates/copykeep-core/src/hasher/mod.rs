pub mod engine;
pub mod fingerprint;

pub use engine::{hash_one, HashEngine, HashOutcome, HashRunStatus, HashState};
pub use fingerprint::{fingerprint, full_hash, quick_sig, Fingerprints};
