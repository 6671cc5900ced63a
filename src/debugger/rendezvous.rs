//! Manual-reset signals used to hand control between the request thread and the worker.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Binary signal that stays raised until explicitly reset.
#[derive(Debug)]
pub struct Gate {
    raised: Mutex<bool>,
    changed: Condvar,
}

impl Gate {
    pub fn new(raised: bool) -> Self {
        Self {
            raised: Mutex::new(raised),
            changed: Condvar::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, bool> {
        self.raised.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self) {
        *self.state() = true;
        self.changed.notify_all();
    }

    pub fn reset(&self) {
        *self.state() = false;
    }

    /// Block until the signal is raised, returns immediately if it already is.
    pub fn wait(&self) {
        let mut raised = self.state();
        while !*raised {
            raised = self
                .changed
                .wait(raised)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}
