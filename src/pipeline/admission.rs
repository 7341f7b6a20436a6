//! Admission gate: a counting semaphore over decoded frames.
//!
//! A worker must hold a `Permit` before it decodes. The permit travels
//! inside the `PixelBuffer` and is returned when the buffer is dropped, so
//! a detector call abandoned on timeout keeps counting against the limit
//! until it actually lets go of the pixels. Waits for a permit can be bounded,
//! so a backend that never returns fills the gate without stalling the run.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::cancel::CancelToken;

// Waiters re-check cancellation at this interval.
const CANCEL_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct GateState {
    in_use: usize,
    peak: usize,
}

/// Why `acquire` returned without a permit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmissionDenied {
    Cancelled,
    TimedOut,
}

#[derive(Debug)]
pub struct AdmissionGate {
    capacity: usize,
    state: Mutex<GateState>,
    released: Condvar,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity: capacity.max(1),
            state: Mutex::new(GateState::default()),
            released: Condvar::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently held.
    pub fn in_use(&self) -> usize {
        self.lock().in_use
    }

    /// Highest number of permits held at once.
    pub fn peak(&self) -> usize {
        self.lock().peak
    }

    /// Block until a permit is free, `cancel` fires, or `wait` elapses.
    /// `None` waits without limit.
    pub fn acquire(
        self: &Arc<Self>,
        cancel: &CancelToken,
        wait: Option<Duration>,
    ) -> Result<Permit, AdmissionDenied> {
        let deadline = wait.map(|wait| Instant::now() + wait);
        let mut state = self.lock();
        loop {
            if cancel.is_cancelled() {
                return Err(AdmissionDenied::Cancelled);
            }
            if state.in_use < self.capacity {
                state.in_use += 1;
                state.peak = state.peak.max(state.in_use);
                return Ok(Permit {
                    gate: Arc::clone(self),
                });
            }
            let poll = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(AdmissionDenied::TimedOut);
                    }
                    (deadline - now).min(CANCEL_POLL)
                }
                None => CANCEL_POLL,
            };
            state = self
                .released
                .wait_timeout(state, poll)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Take a permit only if one is free right now.
    pub fn try_acquire(self: &Arc<Self>) -> Option<Permit> {
        let mut state = self.lock();
        if state.in_use >= self.capacity {
            return None;
        }
        state.in_use += 1;
        state.peak = state.peak.max(state.in_use);
        Some(Permit {
            gate: Arc::clone(self),
        })
    }

    fn release(&self) {
        let mut state = self.lock();
        state.in_use = state.in_use.saturating_sub(1);
        drop(state);
        self.released.notify_one();
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        // Counter updates cannot leave the state torn; recover from poison.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One unit of admission. Released on drop.
#[derive(Debug)]
pub struct Permit {
    gate: Arc<AdmissionGate>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.gate.release();
    }
}
