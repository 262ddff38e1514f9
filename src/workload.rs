use crate::buffer::{KeyBuf, ValueBuf};
use crate::database::{Database, Status};
use crate::error::BenchError;
use crate::generator::{KeySelector, SelectionPolicy, format_key};
use crate::loader::BATCH_SIZE;
use anyhow::{Context, Result};
use hdrhistogram::Histogram;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thousands::Separable;
use tracing::{debug, trace};

/// Shared stop request for an unbounded reader. Readers poll it once per
/// lookup, so cancellation lands within one iteration.
#[derive(Clone, Default, Debug)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadLimit {
    Bounded(u64),
    /// Run until the cancel flag is set.
    Unbounded,
}

impl ReadLimit {
    fn reached(self, reads: u64) -> bool {
        match self {
            ReadLimit::Bounded(limit) => reads >= limit,
            ReadLimit::Unbounded => false,
        }
    }
}

/// What a reader does with a lookup that did not find its row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadErrorMode {
    /// Anything but `Found` aborts the run.
    #[default]
    Strict,
    /// `LockNotGranted` and `Deadlock` are expected under row-lock contention
    /// and count as completed reads.
    Lenient,
}

#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    pub limit: ReadLimit,
    pub policy: SelectionPolicy,
    pub error_mode: ReadErrorMode,
    pub seed: u64,
    pub cancel: CancelFlag,
}

impl WorkloadConfig {
    /// Bounded reader over a 16-key hot set.
    pub fn hot(reads: u64, seed: u64) -> Self {
        WorkloadConfig {
            limit: ReadLimit::Bounded(reads),
            policy: SelectionPolicy::HotSet,
            error_mode: ReadErrorMode::Strict,
            seed,
            cancel: CancelFlag::new(),
        }
    }

    /// Unbounded uniform reader; stops only through `cancel`.
    pub fn cold(seed: u64) -> Self {
        WorkloadConfig {
            limit: ReadLimit::Unbounded,
            policy: SelectionPolicy::Uniform,
            error_mode: ReadErrorMode::Strict,
            seed,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_error_mode(mut self, error_mode: ReadErrorMode) -> Self {
        self.error_mode = error_mode;
        self
    }
}

#[derive(Debug)]
pub struct WorkloadResult {
    pub elapsed: Duration,
    pub reads_completed: u64,
    /// Reads that ended in a tolerated lock outcome (lenient mode only).
    pub tolerated: u64,
    pub latency_ns: Histogram<u64>,
}

impl WorkloadResult {
    pub fn throughput(&self) -> f64 {
        if self.reads_completed == 0 || self.elapsed.is_zero() {
            0.0
        } else {
            self.reads_completed as f64 / self.elapsed.as_secs_f64()
        }
    }

    /// Thread time divided by reads, in microseconds.
    pub fn micros_per_read(&self) -> f64 {
        if self.reads_completed == 0 {
            0.0
        } else {
            self.elapsed.as_secs_f64() / self.reads_completed as f64 * 1e6
        }
    }
}

impl Display for WorkloadResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let percentile = |q: f64| -> String {
            if self.latency_ns.is_empty() {
                "-".into()
            } else {
                (self.latency_ns.value_at_quantile(q) / 1_000).separate_with_underscores()
            }
        };
        write!(
            f,
            "reads: {} | time: {:.2?} | {:.3} us/read | throughput: {} reads/s | p50: {} µs | p99: {} µs | p99.9: {} µs",
            self.reads_completed.separate_with_underscores(),
            self.elapsed,
            self.micros_per_read(),
            (self.throughput() as u64).separate_with_underscores(),
            percentile(0.50),
            percentile(0.99),
            percentile(0.999),
        )?;
        if self.tolerated > 0 {
            write!(f, " | tolerated: {}", self.tolerated.separate_with_underscores())?;
        }
        Ok(())
    }
}

/// Look up keys from `0..rows` until the limit is hit or the run is
/// cancelled, committing the read transaction every [`BATCH_SIZE`] lookups.
pub fn run_reader(db: &dyn Database, rows: u64, config: &WorkloadConfig) -> Result<WorkloadResult> {
    let start = Instant::now();
    let mut selector = KeySelector::new(config.policy, rows, config.seed);
    if let Some(keys) = selector.hot_keys() {
        trace!(?keys, "hot set sampled");
    }
    let mut latency_ns = Histogram::<u64>::new_with_bounds(1, 10_000_000_000, 3)?;
    let mut key = KeyBuf::new();
    let mut value = ValueBuf::new();
    let mut reads_completed = 0;
    let mut tolerated = 0;
    let mut since_commit = 0;

    let mut txn = db.begin_read().context("begin read transaction")?;
    while !config.cancel.is_cancelled() && !config.limit.reached(reads_completed) {
        if since_commit == BATCH_SIZE {
            txn.commit().context("commit read transaction")?;
            txn = db.begin_read().context("begin read transaction")?;
            since_commit = 0;
            debug!(reads_completed, "read batch committed");
        }

        format_key(selector.next_seq(), &mut key);
        let t = Instant::now();
        let status = txn.get(key.as_slice(), &mut value)?;
        latency_ns.saturating_record(t.elapsed().as_nanos() as u64);

        match (status, config.error_mode) {
            (Status::Found, _) => {}
            (Status::LockNotGranted | Status::Deadlock, ReadErrorMode::Lenient) => tolerated += 1,
            (status, _) => {
                return Err(BenchError::UnexpectedStatus {
                    key: String::from_utf8_lossy(key.as_slice()).into_owned(),
                    status,
                }
                .into());
            }
        }
        reads_completed += 1;
        since_commit += 1;
    }
    txn.commit().context("commit read transaction")?;

    Ok(WorkloadResult { elapsed: start.elapsed(), reads_completed, tolerated, latency_ns })
}
