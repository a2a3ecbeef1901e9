use std::any::Any;
use std::fmt;
use std::io::Write;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::compile::{CompiledEntity, CompiledSchema};
use crate::diagnostics::Diagnostics;
use crate::errors::GenerationError;
use crate::generators::{GeneratorContext, SharedFields};
use crate::model::{EntityReport, GenerateOptions, GenerationReport};
use crate::output::{self, CountingWriter};
use crate::random::RandomSource;

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Generating,
    Draining,
    Done,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineState::Idle => "idle",
            PipelineState::Generating => "generating",
            PipelineState::Draining => "draining",
            PipelineState::Done => "done",
        })
    }
}

/// Entry point for streaming generated records into per-entity sinks.
#[derive(Debug, Clone, Default)]
pub struct GenerationEngine {
    options: GenerateOptions,
}

impl GenerationEngine {
    pub fn new(options: GenerateOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &GenerateOptions {
        &self.options
    }

    /// Generate `totalCount` records and stream every entity into the sink
    /// at the same index. Sinks are flushed before returning.
    ///
    /// A driver thread builds shared fields into a bounded work queue, a
    /// worker pool turns them into serialized records and one writer per
    /// entity drains that entity's bounded queue in FIFO order.
    pub fn run<W: Write + Send>(
        &self,
        schema: &CompiledSchema,
        sinks: &mut [W],
    ) -> Result<GenerationReport, GenerationError> {
        let started = Instant::now();
        let entities = schema.entities();
        if sinks.len() != entities.len() {
            return Err(GenerationError::InvalidConfig(format!(
                "expected {} sinks, got {}",
                entities.len(),
                sinks.len()
            )));
        }

        let random = match self.options.seed.or(schema.seed()) {
            Some(seed) => RandomSource::from_seed(seed),
            None => RandomSource::from_entropy(),
        };
        let total_count = self.options.total_count.unwrap_or(schema.total_count());
        let workers = self
            .options
            .workers
            .filter(|workers| *workers > 0)
            .unwrap_or_else(default_workers);
        let capacity = self.options.queue_capacity.max(1);
        let run_id = uuid::Uuid::new_v4().to_string();

        let mut state = PipelineState::Idle;
        info!(
            run_id = %run_id,
            seed = random.seed(),
            total_count,
            workers,
            entities = entities.len(),
            state = %state,
            "generation started"
        );

        let mut header_bytes = Vec::with_capacity(entities.len());
        for (entity, sink) in entities.iter().zip(sinks.iter_mut()) {
            header_bytes.push(output::write_header(entity, sink)?);
        }

        let diagnostics = Diagnostics::new();
        let failure = FailureSlot::default();
        let counters: Vec<EntityCounters> =
            entities.iter().map(|_| EntityCounters::default()).collect();
        let (work_tx, work_rx) = mpsc::sync_channel::<SharedFields>(capacity);
        let work_rx = Mutex::new(work_rx);

        let outcome = thread::scope(|scope| {
            let mut queues = Vec::with_capacity(entities.len());
            let mut writers = Vec::with_capacity(entities.len());
            for (entity, sink) in entities.iter().zip(sinks.iter_mut()) {
                let (tx, rx) = mpsc::sync_channel::<Vec<u8>>(capacity);
                queues.push(tx);
                let run_id = run_id.as_str();
                writers.push(scope.spawn(move || write_loop(run_id, entity, rx, sink)));
            }

            let mut pool = Vec::with_capacity(workers);
            for id in 0..workers {
                let worker = Worker {
                    id,
                    entities,
                    random: &random,
                    diagnostics: &diagnostics,
                    failure: &failure,
                    counters: &counters,
                    work: &work_rx,
                    queues: queues.clone(),
                };
                pool.push(scope.spawn(move || worker.run()));
            }
            // output queues close once every worker has dropped its senders
            drop(queues);

            transition(&run_id, &mut state, PipelineState::Generating);
            let mut dispatched = 0_u64;
            for _ in 0..total_count {
                if failure.is_aborted() {
                    break;
                }
                let shared = match schema.build_shared_fields(&random, &diagnostics) {
                    Ok(shared) => shared,
                    Err(err) => {
                        failure.record(err);
                        break;
                    }
                };
                if work_tx.send(shared).is_err() {
                    break;
                }
                dispatched += 1;
            }
            drop(work_tx);
            transition(&run_id, &mut state, PipelineState::Draining);

            let mut panicked = None;
            for handle in pool {
                if let Err(panic) = handle.join() {
                    panicked.get_or_insert(panic_message(panic));
                }
            }
            let mut stats = Vec::with_capacity(writers.len());
            for handle in writers {
                match handle.join() {
                    Ok(writer) => stats.push(writer),
                    Err(panic) => {
                        panicked.get_or_insert(panic_message(panic));
                        stats.push(WriterStats::default());
                    }
                }
            }
            if let Some(message) = panicked {
                failure.record(GenerationError::WorkerPanicked(message));
            }
            (dispatched, stats)
        });
        let (dispatched, writer_stats) = outcome;
        transition(&run_id, &mut state, PipelineState::Done);

        let mut report = GenerationReport::new(run_id.clone(), random.seed(), total_count, workers);
        report.records_dispatched = dispatched;
        for (((entity, stats), counters), header) in entities
            .iter()
            .zip(writer_stats)
            .zip(&counters)
            .zip(header_bytes)
        {
            report.record_entity(EntityReport {
                index: entity.index(),
                target: entity.target().display().to_string(),
                format: entity.format().as_str().to_string(),
                admitted: counters.admitted.load(Ordering::Acquire),
                written: stats.written,
                dropped: counters.dropped.load(Ordering::Acquire),
                bytes_written: header.saturating_add(stats.bytes),
                write_errors: stats.write_errors,
            });
        }
        report.diagnostics_by_code = diagnostics.snapshot();
        report.duration_ms = started.elapsed().as_millis() as u64;

        if let Some(err) = failure.take() {
            warn!(run_id = %run_id, error = %err, "generation failed");
            return Err(err);
        }

        let seconds = started.elapsed().as_secs_f64().max(f64::EPSILON);
        info!(
            run_id = %run_id,
            records = report.records_written(),
            diagnostics = report.diagnostics_total(),
            duration_ms = report.duration_ms,
            bytes_written = report.bytes_written,
            records_per_sec = (report.records_written() as f64 / seconds) as u64,
            "generation completed"
        );
        Ok(report)
    }
}

fn default_workers() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
        .saturating_mul(2)
}

fn transition(run_id: &str, state: &mut PipelineState, next: PipelineState) {
    info!(run_id = %run_id, from = %state, to = %next, "pipeline state changed");
    *state = next;
}

#[derive(Debug, Default)]
struct EntityCounters {
    admitted: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Default)]
struct WriterStats {
    written: u64,
    write_errors: u64,
    bytes: u64,
}

/// First fatal error of the run. Setting it stops the driver.
#[derive(Debug, Default)]
struct FailureSlot {
    aborted: AtomicBool,
    error: Mutex<Option<GenerationError>>,
}

impl FailureSlot {
    fn record(&self, err: GenerationError) {
        self.aborted.store(true, Ordering::Release);
        let mut slot = self.error.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    fn take(&self) -> Option<GenerationError> {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

struct Worker<'a> {
    id: usize,
    entities: &'a [CompiledEntity],
    random: &'a RandomSource,
    diagnostics: &'a Diagnostics,
    failure: &'a FailureSlot,
    counters: &'a [EntityCounters],
    work: &'a Mutex<Receiver<SharedFields>>,
    queues: Vec<SyncSender<Vec<u8>>>,
}

impl Worker<'_> {
    fn run(self) {
        let mut processed = 0_u64;
        loop {
            let next = self
                .work
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .recv();
            let Ok(shared) = next else {
                break;
            };
            // keep draining after a failure so the driver never blocks
            if self.failure.is_aborted() {
                continue;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.process(&shared)));
            match outcome {
                Ok(Ok(())) => processed += 1,
                Ok(Err(err)) => self.failure.record(err),
                Err(panic) => self
                    .failure
                    .record(GenerationError::WorkerPanicked(panic_message(panic))),
            }
        }
        debug!(worker = self.id, processed, "worker finished");
    }

    /// Run every entity's gate and generator for one record.
    fn process(&self, shared: &SharedFields) -> Result<(), GenerationError> {
        let ctx = GeneratorContext::new(self.random, shared, self.diagnostics);
        for (idx, entity) in self.entities.iter().enumerate() {
            if !entity.gate().admit(self.random) {
                continue;
            }
            self.counters[idx].admitted.fetch_add(1, Ordering::AcqRel);

            let record = entity.root().generate(&ctx)?;
            match output::encode_record(entity, &record) {
                Ok(buf) => {
                    if self.queues[idx].send(buf).is_err() {
                        warn!(
                            worker = self.id,
                            entity = idx,
                            "writer is gone; record discarded"
                        );
                    }
                }
                Err(err) => {
                    self.counters[idx].dropped.fetch_add(1, Ordering::AcqRel);
                    self.diagnostics.report(
                        "serialization_failed",
                        &entity.target().display().to_string(),
                        &err,
                    );
                }
            }
        }
        Ok(())
    }
}

fn write_loop<W: Write>(
    run_id: &str,
    entity: &CompiledEntity,
    queue: Receiver<Vec<u8>>,
    sink: &mut W,
) -> WriterStats {
    let mut sink = CountingWriter::new(sink);
    let mut stats = WriterStats::default();
    for buf in queue {
        match sink.write_all(&buf) {
            Ok(()) => stats.written += 1,
            Err(err) => {
                stats.write_errors += 1;
                warn!(
                    run_id = %run_id,
                    entity = entity.index(),
                    target = %entity.target().display(),
                    error = %err,
                    "write failed"
                );
            }
        }
    }
    if let Err(err) = sink.flush() {
        stats.write_errors += 1;
        warn!(
            run_id = %run_id,
            entity = entity.index(),
            target = %entity.target().display(),
            error = %err,
            "flush failed"
        );
    }
    stats.bytes = sink.bytes_written();
    debug!(
        run_id = %run_id,
        entity = entity.index(),
        written = stats.written,
        bytes = stats.bytes,
        "writer finished"
    );
    stats
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic during generation".to_string()
    }
}
