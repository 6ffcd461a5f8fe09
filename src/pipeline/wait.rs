//! Waiting for the storage sync.
use std::{
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};

use tracing::debug;

use crate::{config::SyncConfig, external::Storage};

/// Shared flag that interrupts waits.
#[derive(Clone, Default, Debug)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, cvar) = &*self.inner;
        let mut cancelled = match flag.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *cancelled = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        match self.inner.0.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Sleep up to `timeout`; returns `true` if cancelled.
    pub fn sleep(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = match flag.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match cvar.wait_timeout_while(guard, timeout, |cancelled| !*cancelled) {
            Ok((guard, _)) => *guard,
            Err(poisoned) => *poisoned.into_inner().0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Every key was reported visible before the deadline.
    Acknowledged,
    Elapsed,
    Cancelled,
}

/// Bounded wait for pushed keys to become visible.
#[derive(Clone, Copy, Debug)]
pub struct SyncWait {
    pub delay: Duration,
    pub poll_interval: Duration,
}

impl From<&SyncConfig> for SyncWait {
    fn from(config: &SyncConfig) -> Self {
        SyncWait {
            delay: config.delay,
            poll_interval: config.poll_interval,
        }
    }
}

impl SyncWait {
    /// Wait at most `delay`. With a storage and keys to look
    /// for, the storage is probed after every poll interval
    /// and the wait ends once all keys are acknowledged.
    pub fn wait(&self, storage: Option<&dyn Storage>, keys: &[String], cancel: &CancelToken) -> WaitOutcome {
        let deadline = Instant::now() + self.delay;
        let probe = storage.filter(|_| !keys.is_empty());
        let step = match probe {
            Some(_) if self.poll_interval > Duration::ZERO => self.poll_interval,
            _ => self.delay,
        };

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return WaitOutcome::Elapsed;
            }
            if cancel.sleep(step.min(remaining)) {
                return WaitOutcome::Cancelled;
            }
            if let Some(storage) = probe {
                let acked = keys.iter().all(|k| match storage.acknowledged(k) {
                    Ok(ack) => ack,
                    Err(e) => {
                        debug!(key = %k, error = %e, "acknowledgement probe failed");
                        false
                    }
                });
                if acked {
                    return WaitOutcome::Acknowledged;
                }
            }
        }
    }
}
