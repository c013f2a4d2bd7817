use std::sync::Arc;

use crate::{
    adapter::RegistryAdapter,
    config::{Benchmark, TrialConfig},
    error::ConfigurationError,
    handles::{Counter, Histogram},
    name::MetricName,
    workload::{Generator, SampleBuffer},
};

const COUNTER: &str = "counter";
const SPREAD_COUNTER: &str = "app.counter";
const HISTOGRAM: &str = "histogram";
const TAGS: [(&str, &str); 2] = [("key1", "value1"), ("key2", "value2")];
const TAG_PAIRS: [&str; 4] = ["key1", "value1", "key2", "value2"];

/// Samples shared by every worker and every registry of one trial.
///
/// Built once during INIT and dropped with the trial.
pub(crate) struct Inputs {
    samples: Option<SampleBuffer<f64>>,
    indices: Option<SampleBuffer<u32>>,
    /// Pre-rendered `id` tag values for the spread benchmarks.
    ids: Arc<[String]>,
}

impl Inputs {
    pub(crate) fn generate(
        benchmark: &Benchmark,
        config: &TrialConfig,
    ) -> Result<Inputs, ConfigurationError> {
        let mut inputs = Inputs { samples: None, indices: None, ids: Arc::from(Vec::new()) };
        match benchmark {
            Benchmark::CounterSpread { counters }
            | Benchmark::CounterSpreadDynamic { counters } => {
                inputs.indices =
                    Some(SampleBuffer::indices(config.seed, config.buffer_len, *counters)?);
                inputs.ids = (0..*counters).map(|id| id.to_string()).collect();
            }
            Benchmark::Histogram { .. } => {
                inputs.samples = Some(SampleBuffer::log_normal(config.seed, config.buffer_len)?);
            }
            _ => {}
        }
        Ok(inputs)
    }
}

/// A benchmark bound to one registry, with every fixed handle resolved.
pub(crate) enum Workload<'a> {
    Counter(Counter),
    DynamicTags(&'a dyn RegistryAdapter),
    Spread { counters: Vec<Counter>, indices: SampleBuffer<u32> },
    SpreadDynamic {
        adapter: &'a dyn RegistryAdapter,
        ids: Arc<[String]>,
        indices: SampleBuffer<u32>,
    },
    Histogram { histogram: Histogram, samples: SampleBuffer<f64> },
}

impl<'a> Workload<'a> {
    /// Resolves the handles `benchmark` reuses across operations.
    pub(crate) fn prepare(
        benchmark: &Benchmark,
        adapter: &'a dyn RegistryAdapter,
        inputs: &Inputs,
    ) -> Result<Workload<'a>, ConfigurationError> {
        let missing = || ConfigurationError::EmptyWorkload;
        Ok(match benchmark {
            Benchmark::Counter => Workload::Counter(adapter.counter(&MetricName::new(COUNTER)?)),
            Benchmark::CounterFixedTags => {
                Workload::Counter(adapter.counter(&MetricName::with_tags(COUNTER, TAGS)?))
            }
            Benchmark::CounterDynamicTags => Workload::DynamicTags(adapter),
            Benchmark::CounterSpread { .. } => {
                let counters = inputs
                    .ids
                    .iter()
                    .map(|id| {
                        MetricName::with_tags(SPREAD_COUNTER, [("id", id.as_str())])
                            .map(|name| adapter.counter(&name))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Workload::Spread { counters, indices: inputs.indices.clone().ok_or_else(missing)? }
            }
            Benchmark::CounterSpreadDynamic { .. } => Workload::SpreadDynamic {
                adapter,
                ids: Arc::clone(&inputs.ids),
                indices: inputs.indices.clone().ok_or_else(missing)?,
            },
            Benchmark::Histogram { policy } => Workload::Histogram {
                histogram: adapter.histogram(&MetricName::new(HISTOGRAM)?, policy)?,
                samples: inputs.samples.clone().ok_or_else(missing)?,
            },
        })
    }

    /// Creates the operation one worker runs, with its own generator.
    pub(crate) fn operation(&self) -> Operation<'_> {
        match self {
            Workload::Counter(counter) => Operation::Counter(counter),
            Workload::DynamicTags(adapter) => Operation::DynamicTags(*adapter),
            Workload::Spread { counters, indices } => {
                Operation::Spread { counters, indices: indices.generator() }
            }
            Workload::SpreadDynamic { adapter, ids, indices } => {
                Operation::SpreadDynamic { adapter: *adapter, ids, indices: indices.generator() }
            }
            Workload::Histogram { histogram, samples } => {
                Operation::Histogram { histogram, samples: samples.generator() }
            }
        }
    }
}

/// One worker's view of a [`Workload`].
pub(crate) enum Operation<'w> {
    Counter(&'w Counter),
    DynamicTags(&'w dyn RegistryAdapter),
    Spread { counters: &'w [Counter], indices: Generator<u32> },
    SpreadDynamic { adapter: &'w dyn RegistryAdapter, ids: &'w [String], indices: Generator<u32> },
    Histogram { histogram: &'w Histogram, samples: Generator<f64> },
}

impl Operation<'_> {
    /// Performs a single increment or record.
    #[inline]
    pub(crate) fn run(&mut self) -> Result<(), ConfigurationError> {
        match self {
            Operation::Counter(counter) => counter.increment(),
            Operation::DynamicTags(adapter) => {
                adapter.counter(&MetricName::from_pairs(COUNTER, &TAG_PAIRS)?).increment()
            }
            Operation::Spread { counters, indices } => {
                counters[indices.next_sample() as usize].increment()
            }
            Operation::SpreadDynamic { adapter, ids, indices } => {
                let id = ids[indices.next_sample() as usize].as_str();
                adapter.counter(&MetricName::with_tags(SPREAD_COUNTER, [("id", id)])?).increment()
            }
            Operation::Histogram { histogram, samples } => histogram.record(samples.next_sample()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Inputs, Workload};
    use crate::{
        adapter::{AdapterFactory, AdapterKind},
        config::{Benchmark, TrialConfig},
        error::ConfigurationError,
        meter::Meter,
        storage::HistogramPolicy,
    };

    fn config() -> TrialConfig {
        TrialConfig { buffer_len: 1024, ..Default::default() }
    }

    fn run(benchmark: Benchmark, operations: usize) -> Vec<(String, Meter)> {
        let adapter = AdapterKind::Striped.build().unwrap();
        let inputs = Inputs::generate(&benchmark, &config()).unwrap();
        let workload = Workload::prepare(&benchmark, adapter.as_ref(), &inputs).unwrap();

        let mut operation = workload.operation();
        for _ in 0..operations {
            operation.run().unwrap();
        }
        drop(operation);
        drop(workload);

        adapter.meters().into_iter().map(|(name, meter)| (name.to_string(), meter)).collect()
    }

    #[test]
    fn test_counter_benchmarks() {
        assert_eq!(
            run(Benchmark::Counter, 10),
            vec![("counter".to_string(), Meter::Counter(10))]
        );

        let tagged = "counter{key1=\"value1\",key2=\"value2\"}".to_string();
        assert_eq!(
            run(Benchmark::CounterFixedTags, 10),
            vec![(tagged.clone(), Meter::Counter(10))]
        );
        assert_eq!(run(Benchmark::CounterDynamicTags, 10), vec![(tagged, Meter::Counter(10))]);
    }

    #[test]
    fn test_spread_benchmarks() {
        let fixed = run(Benchmark::CounterSpread { counters: 8 }, 1000);
        // Every counter is registered up front.
        assert_eq!(fixed.len(), 8);

        let dynamic = run(Benchmark::CounterSpreadDynamic { counters: 8 }, 1000);
        assert!(dynamic.len() <= 8);

        let total = |meters: &[(String, Meter)]| {
            meters
                .iter()
                .map(|(_, meter)| match meter {
                    Meter::Counter(count) => *count,
                    _ => 0,
                })
                .sum::<u64>()
        };
        assert_eq!(total(&fixed), 1000);
        assert_eq!(total(&dynamic), 1000);
        // Same seed, same selections.
        assert_eq!(fixed.iter().filter(|(_, m)| *m != Meter::Counter(0)).count(), dynamic.len());
    }

    #[test]
    fn test_histogram_benchmark() {
        let meters = run(Benchmark::Histogram { policy: HistogramPolicy::summary() }, 500);
        assert_eq!(meters.len(), 1);
        assert!(matches!(meters[0].1, Meter::Summary(snapshot) if snapshot.count == 500));
    }

    #[test]
    fn test_unsupported_policy_fails_prepare() {
        let benchmark = Benchmark::Histogram { policy: HistogramPolicy::sliding_time_window() };
        let adapter = AdapterKind::Prometheus.build().unwrap();
        let inputs = Inputs::generate(&benchmark, &config()).unwrap();
        let err = Workload::prepare(&benchmark, adapter.as_ref(), &inputs).err().unwrap();
        assert_eq!(
            err,
            ConfigurationError::UnsupportedPolicy {
                adapter: "prometheus",
                policy: "sliding_time_window"
            }
        );
    }
}
