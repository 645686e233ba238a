use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

/// Lock a status mutex, recovering the data if a worker panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cooperative pause/cancel token shared between a controller and a long-running task.
///
/// Clone is cheap and shares state. The task observes requests only at its own
/// checkpoints (per scanned file, per hashed file, per copied chunk).
#[derive(Debug, Clone, Default)]
pub struct ControlToken {
    paused: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
}

impl ControlToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Block while paused, polling every `poll`. Returns `Error::Cancelled` once a
    /// cancel is requested, including while parked.
    pub fn checkpoint(&self, poll: Duration) -> Result<()> {
        loop {
            if self.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if !self.is_paused() {
                return Ok(());
            }
            thread::sleep(poll);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_checkpoint_passes_when_idle() {
        let token = ControlToken::new();
        assert!(token.checkpoint(Duration::from_millis(1)).is_ok());
    }

    #[test]
    fn test_cancel_releases_paused_checkpoint() {
        let token = ControlToken::new();
        token.pause();
        let remote = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            remote.cancel();
        });
        let started = Instant::now();
        let result = token.checkpoint(Duration::from_millis(5));
        handle.join().unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_resume_clears_pause() {
        let token = ControlToken::new();
        token.pause();
        assert!(token.is_paused());
        token.resume();
        assert!(!token.is_paused());
        assert!(token.checkpoint(Duration::from_millis(1)).is_ok());
    }
}
