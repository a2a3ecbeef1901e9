use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::{Mutex, PoisonError};

use tracing::warn;

/// Non-fatal generation problems, streamed to the log and counted by code.
#[derive(Debug, Default)]
pub struct Diagnostics {
    counts: Mutex<BTreeMap<&'static str, u64>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log one diagnostic for the node at `path` and count it.
    pub fn report(&self, code: &'static str, path: &str, message: impl Display) {
        warn!(event = "diagnostic", code, path, "{message}");
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        *counts.entry(code).or_default() += 1;
    }

    pub fn count(&self, code: &str) -> u64 {
        let counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        counts.get(code).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        let counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        counts.values().sum()
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        let counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        counts
            .iter()
            .map(|(code, count)| ((*code).to_string(), *count))
            .collect()
    }
}
