use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Capacity of the work queue and of every per-entity output queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Options for the generation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// Worker threads; `2 × available_parallelism` when unset.
    pub workers: Option<usize>,
    /// Bound of the work queue and of each entity queue.
    pub queue_capacity: usize,
    /// Overrides the config seed.
    pub seed: Option<u64>,
    /// Overrides the config `totalCount`.
    pub total_count: Option<u64>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            workers: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            seed: None,
            total_count: None,
        }
    }
}

/// Summary of one entity's output stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityReport {
    pub index: usize,
    pub target: String,
    pub format: String,
    /// Records admitted by the gate.
    pub admitted: u64,
    /// Records handed to the sink.
    pub written: u64,
    /// Records that failed serialization.
    pub dropped: u64,
    pub bytes_written: u64,
    pub write_errors: u64,
}

/// Report for a generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationReport {
    pub run_id: String,
    pub seed: u64,
    pub total_count: u64,
    /// Shared-field contexts the driver enqueued.
    pub records_dispatched: u64,
    pub workers: usize,
    pub entities: Vec<EntityReport>,
    pub diagnostics_by_code: BTreeMap<String, u64>,
    pub duration_ms: u64,
    pub bytes_written: u64,
}

impl GenerationReport {
    pub fn new(run_id: String, seed: u64, total_count: u64, workers: usize) -> Self {
        Self {
            run_id,
            seed,
            total_count,
            records_dispatched: 0,
            workers,
            entities: Vec::new(),
            diagnostics_by_code: BTreeMap::new(),
            duration_ms: 0,
            bytes_written: 0,
        }
    }

    pub fn record_entity(&mut self, entity: EntityReport) {
        self.bytes_written = self.bytes_written.saturating_add(entity.bytes_written);
        self.entities.push(entity);
    }

    pub fn records_written(&self) -> u64 {
        self.entities.iter().map(|entity| entity.written).sum()
    }

    pub fn diagnostics_total(&self) -> u64 {
        self.diagnostics_by_code.values().sum()
    }
}
