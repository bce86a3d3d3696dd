//! In-process `FlowProcess`: configuration plus a counter table.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use sluice_core::config::FlowConfig;
use sluice_core::process::{Counter, FlowProcess};

#[derive(Debug, Default)]
pub struct LocalFlowProcess {
    config: FlowConfig,
    counters: Mutex<BTreeMap<Counter, i64>>,
}

impl LocalFlowProcess {
    pub fn new(config: FlowConfig) -> Self {
        Self {
            config,
            counters: Mutex::new(BTreeMap::new()),
        }
    }

    /// Reads configuration from `SLUICE_*` environment variables.
    pub fn from_env() -> Self {
        Self::new(FlowConfig::from_env())
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<Counter, i64>> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of every counter touched so far.
    pub fn counters(&self) -> BTreeMap<Counter, i64> {
        self.lock().clone()
    }

    pub fn reset_counters(&self) {
        self.lock().clear();
    }
}

impl FlowProcess for LocalFlowProcess {
    fn config(&self) -> &FlowConfig {
        &self.config
    }

    fn increment(&self, counter: Counter, amount: i64) {
        *self.lock().entry(counter).or_insert(0) += amount;
    }

    fn counter(&self, counter: &Counter) -> i64 {
        self.lock().get(counter).copied().unwrap_or(0)
    }

    fn keep_alive(&self) {
        tracing::trace!("keep alive");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_reset() {
        let p = LocalFlowProcess::default();
        p.increment(Counter::TuplesRead, 2);
        p.increment(Counter::TuplesRead, 3);
        p.increment(Counter::custom("app", "odd"), 1);
        assert_eq!(p.counter(&Counter::TuplesRead), 5);
        assert_eq!(p.counter(&Counter::TuplesTrapped), 0);
        assert_eq!(p.counters().len(), 2);
        p.reset_counters();
        assert_eq!(p.counter(&Counter::TuplesRead), 0);
    }

    #[test]
    fn properties_come_from_config() {
        let p = LocalFlowProcess::new(FlowConfig::default().with_property("k", "v"));
        assert_eq!(p.property("k").as_deref(), Some("v"));
        assert_eq!(p.property("missing"), None);
    }
}
