//! Meter kinds exposed by registry adapters.
use std::time::Duration;

use serde::Serialize;

use crate::handles::DistributionSnapshot;

/// A single named statistic of a meter that has no dedicated kind.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Measurement {
    pub statistic: String,
    pub value: f64,
}

/// Current value of a meter, tagged by kind.
///
/// Consumers that need to handle every kind implement [`MeterVisitor`] and call
/// [`Meter::accept`], which dispatches exhaustively; [`Meter::Other`] is the catch-all for meters
/// that only expose raw measurements.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Meter {
    /// A monotonically increasing count.
    Counter(u64),
    /// A value that can go up and down.
    Gauge(f64),
    /// A distribution of durations.
    Timer(DistributionSnapshot),
    /// A distribution of arbitrary values.
    Summary(DistributionSnapshot),
    /// In-flight tasks and their cumulative duration.
    LongTaskTimer { active_tasks: u64, duration: Duration },
    /// A count read from an external source.
    FunctionCounter(f64),
    /// Count and total time read from an external source.
    FunctionTimer { count: u64, total: Duration },
    /// Anything else.
    Other(Vec<Measurement>),
}

impl Meter {
    /// Short name of the meter kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Meter::Counter(_) => "counter",
            Meter::Gauge(_) => "gauge",
            Meter::Timer(_) => "timer",
            Meter::Summary(_) => "summary",
            Meter::LongTaskTimer { .. } => "long_task_timer",
            Meter::FunctionCounter(_) => "function_counter",
            Meter::FunctionTimer { .. } => "function_timer",
            Meter::Other(_) => "other",
        }
    }

    /// Dispatches to the visitor method matching this meter's kind.
    pub fn accept<N, V>(&self, name: &N, visitor: &mut V)
    where
        N: ?Sized,
        V: MeterVisitor<N> + ?Sized,
    {
        match self {
            Meter::Counter(count) => visitor.visit_counter(name, *count),
            Meter::Gauge(value) => visitor.visit_gauge(name, *value),
            Meter::Timer(snapshot) => visitor.visit_timer(name, snapshot),
            Meter::Summary(snapshot) => visitor.visit_summary(name, snapshot),
            Meter::LongTaskTimer { active_tasks, duration } => {
                visitor.visit_long_task_timer(name, *active_tasks, *duration)
            }
            Meter::FunctionCounter(count) => visitor.visit_function_counter(name, *count),
            Meter::FunctionTimer { count, total } => {
                visitor.visit_function_timer(name, *count, *total)
            }
            Meter::Other(measurements) => visitor.visit_other(name, measurements),
        }
    }
}

/// Handles every kind of [`Meter`].
///
/// `N` is whatever the caller uses to identify the meter, typically a
/// [`MetricName`](crate::MetricName).
pub trait MeterVisitor<N: ?Sized> {
    fn visit_counter(&mut self, name: &N, count: u64);
    fn visit_gauge(&mut self, name: &N, value: f64);
    fn visit_timer(&mut self, name: &N, snapshot: &DistributionSnapshot);
    fn visit_summary(&mut self, name: &N, snapshot: &DistributionSnapshot);
    fn visit_long_task_timer(&mut self, name: &N, active_tasks: u64, duration: Duration);
    fn visit_function_counter(&mut self, name: &N, count: f64);
    fn visit_function_timer(&mut self, name: &N, count: u64, total: Duration);
    fn visit_other(&mut self, name: &N, measurements: &[Measurement]);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Measurement, Meter, MeterVisitor};
    use crate::handles::DistributionSnapshot;

    #[derive(Default)]
    struct KindRecorder(Vec<String>);

    impl MeterVisitor<str> for KindRecorder {
        fn visit_counter(&mut self, name: &str, _: u64) {
            self.0.push(format!("{name}:counter"));
        }
        fn visit_gauge(&mut self, name: &str, _: f64) {
            self.0.push(format!("{name}:gauge"));
        }
        fn visit_timer(&mut self, name: &str, _: &DistributionSnapshot) {
            self.0.push(format!("{name}:timer"));
        }
        fn visit_summary(&mut self, name: &str, _: &DistributionSnapshot) {
            self.0.push(format!("{name}:summary"));
        }
        fn visit_long_task_timer(&mut self, name: &str, _: u64, _: Duration) {
            self.0.push(format!("{name}:long_task_timer"));
        }
        fn visit_function_counter(&mut self, name: &str, _: f64) {
            self.0.push(format!("{name}:function_counter"));
        }
        fn visit_function_timer(&mut self, name: &str, _: u64, _: Duration) {
            self.0.push(format!("{name}:function_timer"));
        }
        fn visit_other(&mut self, name: &str, _: &[Measurement]) {
            self.0.push(format!("{name}:other"));
        }
    }

    #[test]
    fn test_every_kind_is_dispatched() {
        let meters = vec![
            Meter::Counter(1),
            Meter::Gauge(1.0),
            Meter::Timer(DistributionSnapshot::default()),
            Meter::Summary(DistributionSnapshot::default()),
            Meter::LongTaskTimer { active_tasks: 1, duration: Duration::from_secs(1) },
            Meter::FunctionCounter(1.0),
            Meter::FunctionTimer { count: 1, total: Duration::from_secs(1) },
            Meter::Other(vec![Measurement { statistic: "value".to_string(), value: 1.0 }]),
        ];

        let mut visitor = KindRecorder::default();
        for meter in &meters {
            meter.accept("m", &mut visitor);
        }

        let expected = meters.iter().map(|m| format!("m:{}", m.kind())).collect::<Vec<_>>();
        assert_eq!(visitor.0, expected);
    }
}
