//! Process-wide network subsystem lifecycle.
//!
//! Some platforms need an explicit socket-library bootstrap before the first
//! socket is created and a matching cleanup at exit. [`NetworkGuard`] models
//! that pair as a scoped resource: the first live guard initializes, the last
//! one dropped shuts down. `std::net` already performs any required
//! bootstrap lazily, so here the guard only tracks and logs the lifecycle.

use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

static ACTIVE_GUARDS: AtomicUsize = AtomicUsize::new(0);

/// Scoped handle on the network subsystem.
#[derive(Debug)]
#[must_use = "the network subsystem shuts down when the guard is dropped"]
pub struct NetworkGuard {
    _private: (),
}

impl NetworkGuard {
    /// Initialize the network subsystem if this is the first live guard.
    pub fn acquire() -> Self {
        if ACTIVE_GUARDS.fetch_add(1, Ordering::AcqRel) == 0 {
            debug!("network subsystem initialized");
        }
        Self { _private: () }
    }
}

impl Drop for NetworkGuard {
    fn drop(&mut self) {
        if ACTIVE_GUARDS.fetch_sub(1, Ordering::AcqRel) == 1 {
            debug!("network subsystem shut down");
        }
    }
}
