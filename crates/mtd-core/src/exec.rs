// crates/mtd-core/src/exec.rs

//! Task-parallel execution environment.
//!
//! `Env` abstracts over a serial executor and the rayon worker pool. The
//! evaluators never spawn threads themselves; they ask the environment to
//! map a closure over an index range with a minimum grain size. Subtrees
//! below [`SERIAL_THRESHOLD`] bases drop to the serial environment so small
//! dynamic programs never pay dispatch overhead.

use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::DesignError;

/// Below this flattened size an evaluation runs on the caller's thread.
pub const SERIAL_THRESHOLD: usize = 500;

/// Execution environment handle. Cheap to copy; pass by value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Env {
    /// Run everything on the calling thread.
    #[default]
    Serial,
    /// Distribute over the rayon worker pool.
    Pool,
}

impl Env {
    /// Number of workers this environment can occupy.
    #[must_use]
    pub fn n_workers(self) -> usize {
        match self {
            Self::Serial => 1,
            Self::Pool => rayon::current_num_threads(),
        }
    }

    /// Replace a pooled environment with a serial one for small problems.
    #[must_use]
    pub fn threshold(self, size: usize) -> Self {
        if self == Self::Serial || size <= SERIAL_THRESHOLD {
            Self::Serial
        } else {
            self
        }
    }

    /// Map `f` over `0..n`, distributing with a minimum grain of `grain`
    /// items per task. Results come back in index order.
    pub fn map<T, F>(self, n: usize, grain: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(Self, usize) -> T + Sync,
    {
        match self {
            Self::Serial => (0..n).map(|i| f(Self::Serial, i)).collect(),
            Self::Pool => (0..n)
                .into_par_iter()
                .with_min_len(grain.max(1))
                .map(|i| f(Self::Pool, i))
                .collect(),
        }
    }
}

/// Shared cancellation flag polled at long-running loop boundaries.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; all clones observe it.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Fail with [`DesignError::CancellationRequested`] if cancelled.
    pub fn check(&self) -> Result<(), DesignError> {
        if self.is_cancelled() {
            Err(DesignError::CancellationRequested)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_and_pool_agree() {
        let serial: Vec<usize> = Env::Serial.map(64, 4, |_, i| i * i);
        let pooled: Vec<usize> = Env::Pool.map(64, 4, |_, i| i * i);
        assert_eq!(serial, pooled);
    }

    #[test]
    fn threshold_downgrades_small_problems() {
        assert_eq!(Env::Pool.threshold(100), Env::Serial);
        assert_eq!(Env::Pool.threshold(10_000), Env::Pool);
        assert_eq!(Env::Serial.threshold(10_000), Env::Serial);
    }

    #[test]
    fn cancel_token_propagates() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(matches!(token.check(), Err(DesignError::CancellationRequested)));
    }
}
