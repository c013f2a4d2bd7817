//! Runs trials: one adapter, one benchmark, many worker threads.
//!
//! A trial moves through `Init -> Warmup -> Measure -> Teardown -> Done`.  INIT validates the
//! configuration, generates the workload buffers and builds the registry, all before any worker
//! thread exists.  Workers then meet at a gate before warm-up, before measuring and before
//! teardown; the driver only synchronizes at those gates and never on the hot path.
//!
//! A failing or panicking worker raises a shared cancellation flag and releases its gates, so its
//! siblings stop at their next batch boundary instead of blocking.  The trial is then reported as
//! failed, with the phase and cause, and every timing it produced is discarded.
use std::{
    any::Any,
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use crossbeam_utils::sync::WaitGroup;
use log::{debug, info, warn};
use parking_lot::Mutex;
use quanta::{Clock, Instant};
use serde::Serialize;

mod operation;
use self::operation::{Inputs, Operation, Workload};
use crate::{
    adapter::AdapterFactory,
    config::{Benchmark, IterationMode, TrialConfig, WarmupAccounting},
    error::{AggregationError, HarnessError, WorkerFailure},
    meter::Meter,
    name::MetricName,
    probe::{NoopProbe, RuntimeProbe, RuntimeSample},
    quantile::parse_quantiles,
    reporter::{LogReporter, StopSignal},
    stats::{summarize, LatencySummary},
    storage::HistogramPolicy,
};

/// Lifecycle phase of a trial.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Warmup,
    Measure,
    Teardown,
    Done,
}

impl Phase {
    /// Name of the phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Warmup => "warmup",
            Phase::Measure => "measure",
            Phase::Teardown => "teardown",
            Phase::Done => "done",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timing of one batch of operations run by one worker during MEASURE.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TimingRecord {
    pub worker: usize,
    /// When the batch completed, relative to the start of the trial.
    pub completed_at: Duration,
    pub elapsed: Duration,
    pub operations: u64,
}

impl TimingRecord {
    /// Average latency of one operation in the batch, in nanoseconds.
    pub fn nanos_per_op(&self) -> f64 {
        self.elapsed.as_nanos() as f64 / self.operations as f64
    }
}

/// Why and where a trial failed.
#[derive(Clone, Debug, PartialEq)]
pub struct TrialFailure {
    pub phase: Phase,
    pub error: HarnessError,
}

impl fmt::Display for TrialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed during {}: {}", self.phase, self.error)
    }
}

/// Outcome of a trial.
#[derive(Clone, Debug, PartialEq)]
pub enum TrialStatus {
    Completed,
    Failed(TrialFailure),
}

/// Everything a trial produced.
///
/// A failed trial carries no timings, no meters and no latency summary.
#[derive(Clone, Debug)]
pub struct TrialResult {
    /// `adapter/benchmark`.
    pub name: String,
    pub adapter: String,
    pub benchmark: String,
    pub status: TrialStatus,
    /// Per-batch timings of the MEASURE phase, ordered by completion time.
    pub timings: Vec<TimingRecord>,
    /// Operations issued during MEASURE, across all workers.
    pub operations: u64,
    /// Wall-clock length of MEASURE.
    pub measure_time: Duration,
    /// Time spent reading every meter during TEARDOWN.
    pub snapshot_time: Duration,
    /// Every meter as read during TEARDOWN.
    pub meters: Vec<(MetricName, Meter)>,
    /// Runtime counters accumulated during MEASURE.
    pub runtime: Option<RuntimeSample>,
    /// Per-operation latency statistics, in nanoseconds.
    pub latency: Result<LatencySummary, AggregationError>,
}

impl TrialResult {
    fn failed(name: String, adapter: &str, benchmark: &Benchmark, failure: TrialFailure) -> Self {
        warn!("trial {} {}", name, failure);
        TrialResult {
            name,
            adapter: adapter.to_string(),
            benchmark: benchmark.to_string(),
            status: TrialStatus::Failed(failure),
            timings: Vec::new(),
            operations: 0,
            measure_time: Duration::ZERO,
            snapshot_time: Duration::ZERO,
            meters: Vec::new(),
            runtime: None,
            latency: Err(AggregationError::NoData),
        }
    }

    /// Whether the trial completed.
    pub fn is_completed(&self) -> bool {
        self.status == TrialStatus::Completed
    }

    /// The failure, if the trial failed.
    pub fn failure(&self) -> Option<&TrialFailure> {
        match &self.status {
            TrialStatus::Failed(failure) => Some(failure),
            TrialStatus::Completed => None,
        }
    }

    /// Operations per second during MEASURE.
    pub fn throughput(&self) -> f64 {
        let secs = self.measure_time.as_secs_f64();
        if secs > 0.0 {
            self.operations as f64 / secs
        } else {
            0.0
        }
    }

    /// Heap allocations per measured operation, if a probe was sampled.
    pub fn allocations_per_op(&self) -> Option<f64> {
        match (self.runtime, self.operations) {
            (Some(runtime), ops) if ops > 0 => Some(runtime.allocations as f64 / ops as f64),
            _ => None,
        }
    }

    /// Reads the count of a counter meter.
    pub fn counter(&self, name: &MetricName) -> Option<u64> {
        self.meters.iter().find(|(n, _)| n == name).and_then(|(_, meter)| match meter {
            Meter::Counter(count) => Some(*count),
            _ => None,
        })
    }
}

/// State shared by the driver and every worker of one trial.
struct TrialState {
    clock: Clock,
    start: Instant,
    deadline: Instant,
    timeout: Duration,
    cancelled: AtomicBool,
    failure: Mutex<Option<TrialFailure>>,
}

impl TrialState {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Records a failure and cancels the trial.  Only the first failure is kept.
    fn fail(&self, phase: Phase, error: HarnessError) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(TrialFailure { phase, error });
        }
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

/// Gates every worker passes through, released once all workers reach them.
#[derive(Clone)]
struct Gates {
    warmup: WaitGroup,
    measure: WaitGroup,
    teardown: WaitGroup,
}

impl Gates {
    fn new() -> Gates {
        Gates { warmup: WaitGroup::new(), measure: WaitGroup::new(), teardown: WaitGroup::new() }
    }
}

struct Worker<'t> {
    index: usize,
    state: &'t TrialState,
    config: &'t TrialConfig,
}

impl Worker<'_> {
    /// Runs the worker through WARMUP and MEASURE, returning its MEASURE timings.
    ///
    /// Returns early, with whatever it has, when the trial is cancelled.
    fn run(
        &self,
        gates: Gates,
        warmup: &Workload<'_>,
        measure: &Workload<'_>,
        phase: &mut Phase,
    ) -> Result<Vec<TimingRecord>, WorkerFailure> {
        let Gates { warmup: warmup_gate, measure: measure_gate, teardown: teardown_gate } = gates;

        // Generators live from WARMUP entry until TEARDOWN exit.
        let mut warmup_op = warmup.operation();
        let mut measure_op = measure.operation();

        warmup_gate.wait();
        *phase = Phase::Warmup;
        for _ in 0..self.config.warmup_iterations {
            self.iteration(&mut warmup_op, None)?;
        }

        measure_gate.wait();
        *phase = Phase::Measure;
        let mut records = Vec::new();
        for _ in 0..self.config.measurement_iterations {
            self.iteration(&mut measure_op, Some(&mut records))?;
        }

        teardown_gate.wait();
        Ok(records)
    }

    fn iteration(
        &self,
        op: &mut Operation<'_>,
        mut records: Option<&mut Vec<TimingRecord>>,
    ) -> Result<(), WorkerFailure> {
        let clock = &self.state.clock;
        let started = clock.now();
        let mut batches = 0;

        loop {
            match self.config.iteration {
                IterationMode::Operations { batches: limit } if batches >= limit => break,
                IterationMode::Time(limit) if clock.now().duration_since(started) >= limit => break,
                _ => {}
            }
            if self.state.is_cancelled() {
                return Ok(());
            }

            let batch_start = clock.now();
            if batch_start > self.state.deadline {
                let limit = self.state.timeout;
                return Err(WorkerFailure::TimedOut { worker: self.index, limit });
            }
            for _ in 0..self.config.batch_size {
                op.run()
                    .map_err(|cause| WorkerFailure::Operation { worker: self.index, cause })?;
            }
            let batch_end = clock.now();
            batches += 1;

            if let Some(records) = records.as_deref_mut() {
                records.push(TimingRecord {
                    worker: self.index,
                    completed_at: batch_end.duration_since(self.state.start),
                    elapsed: batch_end.duration_since(batch_start),
                    operations: self.config.batch_size,
                });
            }
        }

        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// One adapter/benchmark combination.
#[derive(Clone, Debug)]
pub struct Trial {
    pub benchmark: Benchmark,
    pub config: TrialConfig,
}

impl Trial {
    /// Creates a new `Trial`.
    pub fn new(benchmark: Benchmark, config: TrialConfig) -> Self {
        Trial { benchmark, config }
    }

    /// Runs the trial against a fresh adapter built by `factory`, without a runtime probe.
    pub fn run(&self, factory: &dyn AdapterFactory) -> TrialResult {
        self.run_with_probe(factory, &NoopProbe)
    }

    /// Runs the trial against a fresh adapter built by `factory`.
    ///
    /// `probe` is sampled right before and right after MEASURE.
    pub fn run_with_probe(
        &self,
        factory: &dyn AdapterFactory,
        probe: &dyn RuntimeProbe,
    ) -> TrialResult {
        let adapter_name = factory.name().to_string();
        let name = format!("{}/{}", adapter_name, self.benchmark);
        let fail = |phase: Phase, error: HarnessError| {
            TrialResult::failed(name.clone(), &adapter_name, &self.benchmark, TrialFailure {
                phase,
                error,
            })
        };

        // INIT
        debug!("trial {}: {}", name, Phase::Init);
        let quantiles = match self
            .config
            .validate()
            .and_then(|_| self.benchmark.validate())
            .and_then(|_| parse_quantiles(&self.config.quantiles))
        {
            Ok(quantiles) => quantiles,
            Err(e) => return fail(Phase::Init, e.into()),
        };
        let inputs = match Inputs::generate(&self.benchmark, &self.config) {
            Ok(inputs) => inputs,
            Err(e) => return fail(Phase::Init, e.into()),
        };

        let adapter = match factory.build() {
            Ok(adapter) => adapter,
            Err(e) => return fail(Phase::Init, e.into()),
        };
        let separate_warmup =
            self.config.warmup == WarmupAccounting::Excluded && self.config.warmup_iterations > 0;
        let warmup_adapter = if separate_warmup {
            match factory.build() {
                Ok(adapter) => Some(adapter),
                Err(e) => return fail(Phase::Init, e.into()),
            }
        } else {
            None
        };

        if let Some(HistogramPolicy::SlidingTimeWindow { .. }) = self.benchmark.policy() {
            if self.config.threads > 1 {
                warn!(
                    "trial {}: sliding time window histograms serialize every writer on one lock; \
                     results under concurrent load vary wildly between runs",
                    name
                );
            }
        }

        let measure = match Workload::prepare(&self.benchmark, adapter.as_ref(), &inputs) {
            Ok(workload) => workload,
            Err(e) => {
                adapter.close();
                return fail(Phase::Init, e.into());
            }
        };
        let warmup_target = warmup_adapter.as_deref().unwrap_or(adapter.as_ref());
        let warmup = match Workload::prepare(&self.benchmark, warmup_target, &inputs) {
            Ok(workload) => workload,
            Err(e) => {
                adapter.close();
                warmup_target.close();
                return fail(Phase::Init, e.into());
            }
        };

        let clock = Clock::new();
        let start = clock.now();
        let state = TrialState {
            deadline: start + self.config.timeout,
            start,
            clock,
            timeout: self.config.timeout,
            cancelled: AtomicBool::new(false),
            failure: Mutex::new(None),
        };
        let stop_reporter = StopSignal::new();
        let reporter = self
            .config
            .reporter
            .clone()
            .filter(|config| config.enabled)
            .map(LogReporter::new);

        let mut before = RuntimeSample::default();
        let mut after = RuntimeSample::default();
        let mut measure_start = start;
        let mut measure_end = start;

        let outcomes = thread::scope(|scope| {
            if let Some(reporter) = &reporter {
                let adapter = adapter.as_ref();
                let stop = &stop_reporter;
                scope.spawn(move || reporter.run(adapter, stop));
            }

            let gates = Gates::new();
            let workers = (0..self.config.threads)
                .map(|index| {
                    let gates = gates.clone();
                    let state = &state;
                    let config = &self.config;
                    let (warmup, measure) = (&warmup, &measure);
                    scope.spawn(move || {
                        let worker = Worker { index, state, config };
                        let mut phase = Phase::Init;
                        let outcome = catch_unwind(AssertUnwindSafe(|| {
                            worker.run(gates, warmup, measure, &mut phase)
                        }));
                        match outcome {
                            Ok(Ok(records)) => records,
                            Ok(Err(failure)) => {
                                state.fail(phase, failure.into());
                                Vec::new()
                            }
                            Err(payload) => {
                                let message = panic_message(payload.as_ref());
                                let failure = WorkerFailure::Panicked { worker: index, message };
                                state.fail(phase, failure.into());
                                Vec::new()
                            }
                        }
                    })
                })
                .collect::<Vec<_>>();

            let Gates { warmup: warmup_gate, measure: measure_gate, teardown: teardown_gate } =
                gates;
            warmup_gate.wait();
            debug!("trial {}: {}", name, Phase::Warmup);

            measure_gate.wait();
            debug!("trial {}: {}", name, Phase::Measure);
            before = probe.sample();
            measure_start = state.clock.now();

            teardown_gate.wait();
            measure_end = state.clock.now();
            after = probe.sample();
            debug!("trial {}: {}", name, Phase::Teardown);

            let outcomes = workers
                .into_iter()
                .map(|worker| worker.join().unwrap_or_default())
                .collect::<Vec<_>>();
            stop_reporter.stop();
            outcomes
        });

        // TEARDOWN
        drop(warmup);
        drop(measure);
        if let Some(warmup_adapter) = &warmup_adapter {
            warmup_adapter.close();
        }

        if let Some(failure) = state.failure.into_inner() {
            adapter.close();
            return fail(failure.phase, failure.error);
        }

        let snapshot_start = state.clock.now();
        let meters = adapter.meters();
        let snapshot_time = state.clock.now().duration_since(snapshot_start);
        adapter.close();

        let mut timings = outcomes.into_iter().flatten().collect::<Vec<_>>();
        timings.sort_by_key(|record| record.completed_at);
        let operations = timings.iter().map(|record| record.operations).sum();
        let samples = timings.iter().map(TimingRecord::nanos_per_op).collect::<Vec<_>>();
        let latency = summarize(&samples, &quantiles, self.config.confidence);

        let result = TrialResult {
            name,
            adapter: adapter_name,
            benchmark: self.benchmark.to_string(),
            status: TrialStatus::Completed,
            timings,
            operations,
            measure_time: measure_end.duration_since(measure_start),
            snapshot_time,
            meters,
            runtime: Some(after.since(&before)),
            latency,
        };
        info!(
            "trial {} completed: {} operations in {:?} ({:.0} ops/s)",
            result.name,
            result.operations,
            result.measure_time,
            result.throughput()
        );
        debug!("trial {}: {}", result.name, Phase::Done);
        result
    }
}

/// A sequence of trials run one after the other.
///
/// A failing trial never stops the suite; its failure is recorded in its result.
pub struct Suite {
    config: TrialConfig,
    probe: Box<dyn RuntimeProbe>,
    trials: Vec<(Box<dyn AdapterFactory>, Benchmark)>,
}

impl Suite {
    /// Creates an empty suite whose trials all share `config`.
    pub fn new(config: TrialConfig) -> Self {
        Suite { config, probe: Box::new(NoopProbe), trials: Vec::new() }
    }

    /// Sets the probe sampled around every MEASURE phase.
    #[must_use]
    pub fn with_probe<P: RuntimeProbe + 'static>(mut self, probe: P) -> Self {
        self.probe = Box::new(probe);
        self
    }

    /// Adds a trial.
    pub fn add<F: AdapterFactory + 'static>(&mut self, factory: F, benchmark: Benchmark) {
        self.trials.push((Box::new(factory), benchmark));
    }

    /// Number of trials in the suite.
    pub fn len(&self) -> usize {
        self.trials.len()
    }

    /// Whether the suite has no trials.
    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    /// Runs every trial in order.
    pub fn run(&self) -> Vec<TrialResult> {
        self.trials
            .iter()
            .map(|(factory, benchmark)| {
                Trial::new(benchmark.clone(), self.config.clone())
                    .run_with_probe(factory.as_ref(), self.probe.as_ref())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{panic_message, Phase, TimingRecord, Trial, TrialStatus};
    use crate::{
        adapter::AdapterKind,
        config::{Benchmark, IterationMode, TrialConfig},
        error::{ConfigurationError, HarnessError, WorkerFailure},
        storage::HistogramPolicy,
    };

    fn small() -> TrialConfig {
        TrialConfig {
            threads: 2,
            warmup_iterations: 1,
            measurement_iterations: 1,
            iteration: IterationMode::Operations { batches: 4 },
            batch_size: 10,
            buffer_len: 1024,
            ..Default::default()
        }
    }

    #[test]
    fn test_nanos_per_op() {
        let record = TimingRecord {
            worker: 0,
            completed_at: Duration::from_micros(5),
            elapsed: Duration::from_nanos(500),
            operations: 100,
        };
        assert_eq!(record.nanos_per_op(), 5.0);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }

    #[test]
    fn test_completed_trial() {
        let result = Trial::new(Benchmark::Counter, small()).run(&AdapterKind::Atomic);
        assert_eq!(result.status, TrialStatus::Completed);
        assert_eq!(result.name, "atomic/counter");
        assert_eq!(result.timings.len(), 8);
        assert_eq!(result.operations, 80);
        assert!(result.timings.windows(2).all(|w| w[0].completed_at <= w[1].completed_at));
        assert_eq!(result.latency.as_ref().map(|l| l.samples), Ok(8));
    }

    #[test]
    fn test_time_based_iterations() {
        let config = TrialConfig {
            iteration: IterationMode::Time(Duration::from_millis(20)),
            ..small()
        };
        let result = Trial::new(Benchmark::Counter, config).run(&AdapterKind::Striped);
        assert!(result.is_completed());
        assert!(result.timings.len() >= 2);
        assert_eq!(result.operations % 10, 0);
    }

    #[test]
    fn test_invalid_config_fails_in_init() {
        let config = TrialConfig { threads: 0, ..small() };
        let result = Trial::new(Benchmark::Counter, config).run(&AdapterKind::Atomic);
        let failure = result.failure().unwrap();
        assert_eq!(failure.phase, Phase::Init);
        assert_eq!(
            failure.error,
            HarnessError::Configuration(ConfigurationError::InvalidThreadCount)
        );
        assert!(result.timings.is_empty());
    }

    #[test]
    fn test_unsupported_policy_fails_in_init() {
        let benchmark = Benchmark::Histogram { policy: HistogramPolicy::buckets() };
        let result = Trial::new(benchmark, small()).run(&AdapterKind::Atomic);
        let failure = result.failure().unwrap();
        assert_eq!(failure.phase, Phase::Init);
        assert!(matches!(
            failure.error,
            HarnessError::Configuration(ConfigurationError::UnsupportedPolicy { .. })
        ));
    }

    #[test]
    fn test_timeout_fails_trial() {
        let config = TrialConfig {
            iteration: IterationMode::Time(Duration::from_millis(200)),
            timeout: Duration::from_millis(50),
            ..small()
        };
        let result = Trial::new(Benchmark::Counter, config).run(&AdapterKind::Atomic);
        let failure = result.failure().unwrap();
        match &failure.error {
            HarnessError::Worker(WorkerFailure::TimedOut { worker, limit }) => {
                assert!(*worker < 2);
                assert_eq!(*limit, Duration::from_millis(50));
            }
            other => panic!("unexpected failure: {:?}", other),
        }
        assert!(failure.error.to_string().starts_with("worker "));
        assert!(result.timings.is_empty());
        assert!(result.meters.is_empty());
    }
}
