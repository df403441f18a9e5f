// crates/mtd-thermo/src/env.rs

//! Per-model thermodynamic environments.
//!
//! A `ThermoEnv` binds a kernel to one set of conditions and owns the
//! record cache for every evaluation under those conditions. The
//! `ModelMap` hands out environments keyed by model so a design touching
//! several condition sets shares nothing across them.

use crate::cache::RecordCache;
use crate::kernel::ThermoKernel;
use crate::model::{ModelKey, ThermoModel};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Kernel + conditions + cache for one thermodynamic model.
pub struct ThermoEnv {
    /// Conditions all evaluations in this environment use.
    pub model: ThermoModel,
    /// The black-box dynamic-program engine.
    pub kernel: Arc<dyn ThermoKernel>,
    /// Record cache shared by every node evaluated under this model.
    pub cache: RecordCache,
}

impl ThermoEnv {
    /// A fresh environment with the given cache budget.
    #[must_use]
    pub fn new(model: ThermoModel, kernel: Arc<dyn ThermoKernel>, cache_bytes: usize) -> Self {
        Self { model, kernel, cache: RecordCache::new(cache_bytes) }
    }
}

/// Lazily-populated map from model conditions to environments. The byte
/// budget is split evenly across the models the design touches.
pub struct ModelMap {
    kernel: Arc<dyn ThermoKernel>,
    cache_bytes: usize,
    envs: Mutex<HashMap<ModelKey, Arc<ThermoEnv>>>,
}

impl ModelMap {
    /// A map handing out environments backed by `kernel`.
    #[must_use]
    pub fn new(kernel: Arc<dyn ThermoKernel>, cache_bytes: usize) -> Self {
        Self { kernel, cache_bytes, envs: Mutex::new(HashMap::new()) }
    }

    /// Fetch (or create) the environment for `model`.
    #[must_use]
    pub fn get(&self, model: &ThermoModel) -> Arc<ThermoEnv> {
        let mut envs = self.envs.lock().expect("model map lock");
        let n = if envs.contains_key(&model.key()) { envs.len() } else { envs.len() + 1 };
        let budget = self.cache_bytes / n.max(1);
        envs.entry(model.key())
            .or_insert_with(|| Arc::new(ThermoEnv::new(*model, self.kernel.clone(), budget)))
            .clone()
    }

    /// Clear every environment's cache (used by timing analysis and tests).
    pub fn clear_caches(&self) {
        if let Ok(envs) = self.envs.lock() {
            for env in envs.values() {
                env.cache.clear();
            }
        }
    }

    /// Number of distinct models seen so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.envs.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// True iff no model has been requested yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
