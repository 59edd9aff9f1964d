//! Per-invocation metric accumulation and the sinks metrics are published to.
//!
//! A fresh [`MetricsRecorder`] is created for every dispatch invocation. Tasks of the invocation
//! [`record`](MetricsRecorder::record) into it concurrently, and once all of them have settled
//! the invocation [`flushes`](MetricsRecorder::flush) it into a [`MetricsSink`] exactly once.
//!
//! Measurements are keyed `{metric_name}-{kind}`, see [`MetricKind::key`].

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use loadsim_types::{MetricKind, Unit};
use serde_json::{Map, Value, json};

use crate::error::SinkError;

/// CloudWatch accepts at most this many metric definitions per EMF document.
const MAX_METRICS_PER_DOCUMENT: usize = 100;

/// A type-erased, shareable [`MetricsSink`] instance.
pub type SharedSink = Arc<dyn MetricsSink>;

/// Destination of recorded measurements.
pub trait MetricsSink: fmt::Debug + Send + Sync + 'static {
    /// Adds one measurement under the synthetic key `name`.
    fn record(&self, name: &str, unit: Unit, value: f64);

    /// Publishes everything recorded since the last flush.
    fn flush(&self) -> Result<(), SinkError>;
}

/// A single recorded value.
#[derive(Clone, Debug, PartialEq)]
pub struct Measurement {
    /// The kind of measurement.
    pub kind: MetricKind,
    /// The logical endpoint label.
    pub metric_name: String,
    /// Duration in milliseconds or count increment, depending on the kind.
    pub value: f64,
}

impl Measurement {
    /// Returns the synthetic key `{metric_name}-{kind}`.
    pub fn key(&self) -> String {
        self.kind.key(&self.metric_name)
    }
}

/// Invocation-scoped accumulator of measurements.
///
/// Safe to share between the tasks of one invocation. The lock is never held across an await
/// point.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    measurements: Mutex<Vec<Measurement>>,
}

impl MetricsRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a measurement for the given logical endpoint.
    pub fn record(&self, kind: MetricKind, metric_name: &str, value: f64) {
        self.measurements.lock().unwrap().push(Measurement {
            kind,
            metric_name: metric_name.to_owned(),
            value,
        });
    }

    /// Records a duration sample in milliseconds.
    pub fn record_duration(&self, kind: MetricKind, metric_name: &str, duration: Duration) {
        self.record(kind, metric_name, duration.as_secs_f64() * 1000.0);
    }

    /// Returns the number of measurements recorded so far.
    pub fn len(&self) -> usize {
        self.measurements.lock().unwrap().len()
    }

    /// Returns `true` if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a copy of the measurements recorded so far.
    pub fn snapshot(&self) -> Vec<Measurement> {
        self.measurements.lock().unwrap().clone()
    }

    /// Moves all measurements into `sink` and flushes it.
    ///
    /// The accumulator is empty afterwards, even if the sink fails to publish.
    pub fn flush(&self, sink: &dyn MetricsSink) -> Result<usize, SinkError> {
        let measurements = std::mem::take(&mut *self.measurements.lock().unwrap());
        let count = measurements.len();

        for measurement in measurements {
            sink.record(&measurement.key(), measurement.kind.unit(), measurement.value);
        }
        sink.flush()?;

        Ok(count)
    }
}

#[derive(Debug, Default)]
struct EmfBuffer {
    metrics: BTreeMap<String, (Unit, Vec<f64>)>,
}

/// Publishes metrics as CloudWatch [Embedded Metric Format] documents.
///
/// Every flush writes one JSON line per group of up to 100 metrics, with a single `service`
/// dimension. Nothing is written when nothing was recorded.
///
/// [Embedded Metric Format]: https://docs.aws.amazon.com/AmazonCloudWatch/latest/monitoring/CloudWatch_Embedded_Metric_Format_Specification.html
pub struct EmfSink {
    namespace: String,
    service: String,
    buffer: Mutex<EmfBuffer>,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl EmfSink {
    /// Creates a sink writing to stdout.
    pub fn stdout(namespace: impl Into<String>, service: impl Into<String>) -> Self {
        Self::new(namespace, service, Box::new(io::stdout()))
    }

    /// Creates a sink writing to the given writer.
    pub fn new(
        namespace: impl Into<String>,
        service: impl Into<String>,
        writer: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            service: service.into(),
            buffer: Mutex::default(),
            writer: Mutex::new(writer),
        }
    }

    fn document(&self, timestamp: u64, metrics: &[(String, (Unit, Vec<f64>))]) -> Value {
        let definitions: Vec<_> = metrics
            .iter()
            .map(|(name, (unit, _))| json!({"Name": name, "Unit": unit.as_str()}))
            .collect();

        let mut document = Map::new();
        document.insert(
            "_aws".to_owned(),
            json!({
                "Timestamp": timestamp,
                "CloudWatchMetrics": [{
                    "Namespace": self.namespace,
                    "Dimensions": [["service"]],
                    "Metrics": definitions,
                }],
            }),
        );
        document.insert("service".to_owned(), json!(self.service));

        for (name, (_, values)) in metrics {
            let value = match values.as_slice() {
                [single] => json!(single),
                values => json!(values),
            };
            document.insert(name.clone(), value);
        }

        Value::Object(document)
    }
}

impl fmt::Debug for EmfSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmfSink")
            .field("namespace", &self.namespace)
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl MetricsSink for EmfSink {
    fn record(&self, name: &str, unit: Unit, value: f64) {
        let mut buffer = self.buffer.lock().unwrap();
        buffer
            .metrics
            .entry(name.to_owned())
            .or_insert_with(|| (unit, Vec::new()))
            .1
            .push(value);
    }

    fn flush(&self) -> Result<(), SinkError> {
        let metrics: Vec<_> = std::mem::take(&mut self.buffer.lock().unwrap().metrics)
            .into_iter()
            .collect();
        if metrics.is_empty() {
            return Ok(());
        }

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let mut writer = self.writer.lock().unwrap();
        for chunk in metrics.chunks(MAX_METRICS_PER_DOCUMENT) {
            let document = self.document(timestamp, chunk);
            serde_json::to_writer(&mut *writer, &document)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;

        Ok(())
    }
}

/// Forwards measurements to the process-wide `merni` recorder.
///
/// Durations become `request.latency` distributions and counts become `request.count`
/// counters, both tagged with the synthetic metric key. Publishing is left to the global
/// Datadog flusher, so [`flush`](MetricsSink::flush) does nothing.
#[derive(Debug, Default)]
pub struct MerniSink;

impl MetricsSink for MerniSink {
    fn record(&self, name: &str, unit: Unit, value: f64) {
        match unit {
            Unit::Milliseconds => {
                let duration = Duration::from_secs_f64(value.max(0.0) / 1000.0);
                merni::distribution!("request.latency"@s: duration, "metric" => name);
            }
            Unit::Count => {
                merni::counter!("request.count": value as u64, "metric" => name);
            }
        }
    }

    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Keeps all measurements in memory.
///
/// Used by tests and dry runs to inspect what an invocation published. The sink is [`Clone`],
/// clones share the same storage.
#[derive(Clone, Debug, Default)]
pub struct InMemorySink {
    records: Arc<Mutex<Vec<(String, Unit, f64)>>>,
    flushes: Arc<AtomicUsize>,
}

impl InMemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recorded measurements in recording order.
    pub fn records(&self) -> Vec<(String, Unit, f64)> {
        self.records.lock().unwrap().clone()
    }

    /// Returns the values recorded under `name`.
    pub fn values(&self, name: &str) -> Vec<f64> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _, _)| key == name)
            .map(|(_, _, value)| *value)
            .collect()
    }

    /// Returns the sum of all values recorded under `name`.
    pub fn total(&self, name: &str) -> f64 {
        self.values(name).iter().sum()
    }

    /// Returns how often the sink was flushed.
    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::Relaxed)
    }
}

impl MetricsSink for InMemorySink {
    fn record(&self, name: &str, unit: Unit, value: f64) {
        self.records
            .lock()
            .unwrap()
            .push((name.to_owned(), unit, value));
    }

    fn flush(&self) -> Result<(), SinkError> {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
