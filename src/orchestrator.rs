use crate::config::BenchConfig;
use crate::database::{Database, StoreOptions, get_db};
use crate::error::BenchError;
use crate::generator::thread_seed;
use crate::injector::PreadCounter;
use crate::loader::{self, LoadReport};
use crate::workload::{ReadErrorMode, WorkloadConfig, WorkloadResult, run_reader};
use anyhow::{Context, Result};
use std::fmt::{Display, Formatter};
use std::thread::Builder;
use tempfile::TempDir;
use thousands::Separable;
use tracing::info;

const HOT_THREAD: u64 = 0;
const COLD_THREAD: u64 = 1;
const LOADER_STREAM: u64 = 2;

/// Trials in run order: two solo baselines, then hot and cold together.
const TRIALS: [(&str, bool); 3] =
    [("baseline-1", false), ("baseline-2", false), ("contended", true)];

#[derive(Debug, Clone, Copy)]
pub struct TrialPlan {
    pub rows: u64,
    pub hot_reads: u64,
    pub seed: u64,
    pub error_mode: ReadErrorMode,
}

#[derive(Debug)]
pub struct TrialReport {
    pub name: &'static str,
    pub hot: WorkloadResult,
    pub cold: Option<WorkloadResult>,
    pub preads_before: u64,
    pub preads_after: u64,
}

impl TrialReport {
    pub fn total_reads(&self) -> u64 {
        self.hot.reads_completed + self.cold.as_ref().map_or(0, |c| c.reads_completed)
    }

    pub fn preads(&self) -> u64 {
        self.preads_after - self.preads_before
    }

    /// Hot thread time spread over every read of the trial. Only the hot
    /// thread's clock matters here; the cold thread is cut off when it ends.
    pub fn aggregate_micros_per_read(&self) -> f64 {
        let total = self.total_reads();
        if total == 0 {
            0.0
        } else {
            self.hot.elapsed.as_secs_f64() / total as f64 * 1e6
        }
    }

    pub fn aggregate_throughput(&self) -> f64 {
        if self.hot.elapsed.is_zero() {
            0.0
        } else {
            self.total_reads() as f64 / self.hot.elapsed.as_secs_f64()
        }
    }
}

impl Display for TrialReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== TRIAL {} ===", self.name)?;
        writeln!(f, "hot:   {}", self.hot)?;
        if let Some(cold) = &self.cold {
            writeln!(f, "cold:  {cold}")?;
            writeln!(
                f,
                "total: reads: {} | {:.3} us/read | throughput: {} reads/s",
                self.total_reads().separate_with_underscores(),
                self.aggregate_micros_per_read(),
                (self.aggregate_throughput() as u64).separate_with_underscores()
            )?;
        }
        write!(f, "preads: {}", self.preads().separate_with_underscores())
    }
}

#[derive(Debug)]
pub struct BenchReport {
    pub load: LoadReport,
    pub preads_after_load: u64,
    pub trials: Vec<TrialReport>,
    pub preads_after_close: u64,
}

impl BenchReport {
    /// Contended hot-thread latency over the best solo baseline. Close to 1
    /// when cold I/O does not leak into the hot reader.
    pub fn isolation_ratio(&self) -> Option<f64> {
        let baseline = self
            .trials
            .iter()
            .filter(|t| t.cold.is_none())
            .map(|t| t.hot.micros_per_read())
            .fold(f64::INFINITY, f64::min);
        let contended = self.trials.iter().find(|t| t.cold.is_some())?;
        (baseline.is_finite() && baseline > 0.0).then(|| contended.hot.micros_per_read() / baseline)
    }
}

impl Display for BenchReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== LOAD ===")?;
        writeln!(f, "{}", self.load)?;
        writeln!(f, "preads: {}", self.preads_after_load.separate_with_underscores())?;
        for trial in &self.trials {
            writeln!(f, "{trial}")?;
        }
        match self.isolation_ratio() {
            Some(ratio) => {
                writeln!(f, "isolation ratio (contended / baseline hot us/read): {ratio:.3}")?
            }
            None => writeln!(f, "isolation ratio: -")?,
        }
        write!(f, "preads after close: {}", self.preads_after_close.separate_with_underscores())
    }
}

/// Run one trial: a bounded hot reader, plus an unbounded cold reader when
/// `with_cold` is set. The cold reader is cancelled as soon as the hot one
/// has been joined, whatever its outcome, and a failing cold reader cancels
/// the hot one.
pub fn run_trial(
    db: &dyn Database,
    counter: &PreadCounter,
    name: &'static str,
    with_cold: bool,
    plan: &TrialPlan,
) -> Result<TrialReport> {
    let preads_before = counter.get();
    let hot_config = WorkloadConfig::hot(plan.hot_reads, thread_seed(plan.seed, HOT_THREAD))
        .with_error_mode(plan.error_mode);
    let cold_config =
        WorkloadConfig::cold(thread_seed(plan.seed, COLD_THREAD)).with_error_mode(plan.error_mode);

    let (hot, cold) = std::thread::scope(|s| -> Result<_> {
        let hot = Builder::new()
            .name("hot-reader".into())
            .spawn_scoped(s, || run_reader(db, plan.rows, &hot_config))
            .context("spawn hot reader")?;
        let cold = if with_cold {
            let spawned = Builder::new()
                .name("cold-reader".into())
                .spawn_scoped(s, || {
                    let result = run_reader(db, plan.rows, &cold_config);
                    if result.is_err() {
                        hot_config.cancel.cancel();
                    }
                    result
                });
            match spawned {
                Ok(h) => Some(h),
                Err(e) => {
                    hot_config.cancel.cancel();
                    let _ = hot.join();
                    return Err(e).context("spawn cold reader");
                }
            }
        } else {
            None
        };

        let hot = hot.join();
        cold_config.cancel.cancel();
        let cold = cold.map(|h| h.join());

        let hot = hot
            .map_err(|_| BenchError::ThreadPanicked { role: "hot" })?
            .context("hot reader")?;
        let cold = match cold {
            Some(joined) => Some(
                joined
                    .map_err(|_| BenchError::ThreadPanicked { role: "cold" })?
                    .context("cold reader")?,
            ),
            None => None,
        };
        Ok((hot, cold))
    })?;

    info!(
        "{:>9} thread time = {:8.2?} on {:>9} reads ({:.3} us/read)",
        "hot",
        hot.elapsed,
        hot.reads_completed,
        hot.micros_per_read()
    );
    if let Some(cold) = &cold {
        info!(
            "{:>9} thread time = {:8.2?} on {:>9} reads ({:.3} us/read)",
            "cold",
            cold.elapsed,
            cold.reads_completed,
            cold.micros_per_read()
        );
    }

    let report = TrialReport { name, hot, cold, preads_before, preads_after: counter.get() };
    if report.cold.is_some() {
        info!(
            "total                                {:>9} reads ({:.3} us/read)",
            report.total_reads(),
            report.aggregate_micros_per_read()
        );
    }
    info!(trial = name, "{} preads", report.preads_after);
    Ok(report)
}

pub fn run_trials(
    db: &dyn Database,
    counter: &PreadCounter,
    plan: &TrialPlan,
) -> Result<Vec<TrialReport>> {
    TRIALS
        .iter()
        .map(|&(name, with_cold)| run_trial(db, counter, name, with_cold, plan))
        .collect()
}

/// Create and fill the store, run every trial, close the store.
pub fn run_benchmark(config: &BenchConfig) -> Result<BenchReport> {
    config.validate()?;
    // keeps the default directory alive until the store is closed
    let scratch;
    let dir = match &config.dir {
        Some(dir) => dir.clone(),
        None => {
            scratch = TempDir::new().context("create scratch directory")?;
            scratch.path().to_path_buf()
        }
    };
    let options = StoreOptions {
        dir,
        cache_bytes: config.cache_bytes,
        injected_delay: config.injected_delay,
        exclusive_reads: config.exclusive_reads,
    };

    let counter = PreadCounter::new();
    let db = get_db(config.database, &options, &counter).context("open store")?;
    info!(rows = config.rows, dir = ?options.dir, "loading");
    let load = loader::load(db.as_ref(), config.rows, thread_seed(config.seed, LOADER_STREAM))
        .context("load dataset")?;
    info!("{load}");
    if config.verify {
        loader::verify(db.as_ref(), config.rows).context("verify dataset")?;
        info!("dataset verified");
    }
    let preads_after_load = counter.get();
    info!("{preads_after_load} preads");

    let plan = TrialPlan {
        rows: config.rows,
        hot_reads: config.hot_reads(),
        seed: config.seed,
        error_mode: config.error_mode,
    };
    let trials = run_trials(db.as_ref(), &counter, &plan)?;

    db.close().context("close store")?;
    let preads_after_close = counter.get();
    info!("{preads_after_close} preads");

    Ok(BenchReport { load, preads_after_load, trials, preads_after_close })
}
