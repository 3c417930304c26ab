use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// Process-wide log shipping counters, labelled by destination host.
#[derive(Debug, Default)]
pub struct Metrics {
    forwarded_logs: CounterVec,
    dropped_logs: CounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log lines accepted by the delivery client for `host`.
    pub fn forwarded_logs(&self) -> &CounterVec {
        &self.forwarded_logs
    }

    /// Log lines whose delivery failed while a sorted batch was flushed.
    pub fn dropped_logs(&self) -> &CounterVec {
        &self.dropped_logs
    }
}

/// Monotonic counters keyed by a single label value.
#[derive(Debug, Default)]
pub struct CounterVec {
    values: Mutex<HashMap<String, u64>>,
}

impl CounterVec {
    pub fn inc(&self, label: &str) {
        let mut values = match self.values.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *values.entry(label.to_string()).or_insert(0) += 1;
    }

    pub fn get(&self, label: &str) -> u64 {
        match self.values.lock() {
            Ok(guard) => guard.get(label).copied().unwrap_or(0),
            Err(poisoned) => poisoned.into_inner().get(label).copied().unwrap_or(0),
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        let values = match self.values.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        values.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }
}
