//! Chat-platform duel bot: challenge, accept, self-report, and per-user
//! win/loss statistics.

pub mod api;
pub mod config;
pub mod dispatch;
pub mod duel;
pub mod error;
pub mod interaction;
pub mod maintenance;
pub mod metrics;
pub mod platform;
pub mod registry;
pub mod session;
pub mod stats;

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the data if a panicking holder poisoned it.
///
/// Handlers run under `catch_unwind`, so a lock may be left poisoned.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
