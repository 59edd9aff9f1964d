//! Console summary of a locally dispatched run.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use loadsim_service::{InvocationReport, OutcomeKind};
use sketches_ddsketch::DDSketch;
use yansi::Paint;

/// Latency distribution and outcome counts of one endpoint.
#[derive(Default)]
pub struct EndpointStats {
    latency: DDSketch,
    successes: u64,
    http_failures: u64,
    transport_errors: u64,
}

impl EndpointStats {
    /// Returns the number of calls.
    pub fn calls(&self) -> u64 {
        self.successes + self.failures()
    }

    /// Returns the number of successful calls.
    pub fn successes(&self) -> u64 {
        self.successes
    }

    /// Returns the number of failed calls of either kind.
    pub fn failures(&self) -> u64 {
        self.http_failures + self.transport_errors
    }

    /// Returns the number of calls answered with a non-2xx status.
    pub fn http_failures(&self) -> u64 {
        self.http_failures
    }

    /// Returns the number of calls that produced no HTTP response.
    pub fn transport_errors(&self) -> u64 {
        self.transport_errors
    }
}

/// Aggregated outcomes of all invocations of a run, keyed by metric name.
#[derive(Default)]
pub struct RunSummary {
    endpoints: BTreeMap<String, EndpointStats>,
    invocations: usize,
}

impl RunSummary {
    /// Aggregates the outcomes of all `reports`.
    pub fn from_reports(reports: &[InvocationReport]) -> Self {
        let mut summary = Self {
            invocations: reports.len(),
            ..Default::default()
        };

        for outcome in reports.iter().flat_map(|r| &r.outcomes) {
            let stats = summary
                .endpoints
                .entry(outcome.metric_name.clone())
                .or_default();
            stats.latency.add(outcome.duration.as_secs_f64());
            match outcome.kind {
                OutcomeKind::Success { .. } => stats.successes += 1,
                OutcomeKind::HttpFailure { .. } => stats.http_failures += 1,
                OutcomeKind::TransportError { .. } => stats.transport_errors += 1,
            }
        }

        summary
    }

    /// Returns the stats of one endpoint.
    pub fn endpoint(&self, metric_name: &str) -> Option<&EndpointStats> {
        self.endpoints.get(metric_name)
    }

    /// Returns the total number of calls.
    pub fn calls(&self) -> u64 {
        self.endpoints.values().map(EndpointStats::calls).sum()
    }

    /// Returns the total number of failed calls.
    pub fn failures(&self) -> u64 {
        self.endpoints.values().map(EndpointStats::failures).sum()
    }

    /// Returns the total number of calls answered with a non-2xx status.
    pub fn http_failures(&self) -> u64 {
        self.endpoints.values().map(EndpointStats::http_failures).sum()
    }

    /// Returns the total number of calls that produced no HTTP response.
    pub fn transport_errors(&self) -> u64 {
        self.endpoints.values().map(EndpointStats::transport_errors).sum()
    }

    /// Prints the summary to stdout.
    pub fn print(&self, duration: Duration) {
        println!();
        println!(
            "{} ({} calls in {} invocations, {:.2?})",
            "## RUN".bold(),
            self.calls().bold(),
            self.invocations.bold(),
            duration
        );

        for (name, stats) in &self.endpoints {
            print!("{} ({} calls", format!("{name}:").bold().green(), stats.calls().bold());
            if stats.http_failures > 0 {
                let failures = format!("{} HTTP FAILURES", stats.http_failures);
                print!(", {}", failures.bold().red());
            }
            if stats.transport_errors > 0 {
                let errors = format!("{} TRANSPORT ERRORS", stats.transport_errors);
                print!(", {}", errors.bold().red());
            }
            println!(")");
            if stats.calls() > 0 {
                print_percentiles(&stats.latency, Duration::from_secs_f64);
            }
        }
    }
}

impl fmt::Debug for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunSummary")
            .field("endpoints", &self.endpoints.keys().collect::<Vec<_>>())
            .field("calls", &self.calls())
            .field("http_failures", &self.http_failures())
            .field("transport_errors", &self.transport_errors())
            .field("invocations", &self.invocations)
            .finish()
    }
}

fn print_percentiles<T: fmt::Debug>(sketch: &DDSketch, map: impl Fn(f64) -> T) {
    let quantile = |q| sketch.quantile(q).ok().flatten().unwrap_or_default();

    let ops = sketch.count();
    let avg = map(sketch.sum().unwrap_or_default() / ops as f64);
    let p50 = map(quantile(0.5));
    let p90 = map(quantile(0.9));
    let p99 = map(quantile(0.99));
    println!(
        "  avg: {:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}",
        avg.bold()
    );
}

#[cfg(test)]
mod tests {
    use loadsim_service::DispatchOutcome;

    use super::*;

    fn outcome(metric_name: &str, millis: u64, kind: OutcomeKind) -> DispatchOutcome {
        DispatchOutcome {
            metric_name: metric_name.to_owned(),
            duration: Duration::from_millis(millis),
            kind,
        }
    }

    #[test]
    fn aggregates_by_metric_name() {
        let reports = vec![
            InvocationReport {
                outcomes: vec![
                    outcome("user", 10, OutcomeKind::Success { status: 200 }),
                    outcome("followers", 30, OutcomeKind::HttpFailure { status: 503 }),
                ],
                flushed: 6,
            },
            InvocationReport {
                outcomes: vec![
                    outcome("user", 20, OutcomeKind::Success { status: 204 }),
                    outcome(
                        "user",
                        5,
                        OutcomeKind::TransportError {
                            reason: "request timed out".into(),
                        },
                    ),
                ],
                flushed: 8,
            },
        ];

        let summary = RunSummary::from_reports(&reports);

        assert_eq!(summary.calls(), 4);
        assert_eq!(summary.failures(), 2);
        assert_eq!(summary.http_failures(), 1);
        assert_eq!(summary.transport_errors(), 1);

        let user = summary.endpoint("user").unwrap();
        assert_eq!(user.calls(), 3);
        assert_eq!(user.successes(), 2);
        assert_eq!(user.failures(), 1);
        assert_eq!(user.http_failures(), 0);
        assert_eq!(user.transport_errors(), 1);

        let followers = summary.endpoint("followers").unwrap();
        assert_eq!(followers.successes(), 0);
        assert_eq!(followers.http_failures(), 1);
        assert_eq!(followers.transport_errors(), 0);
    }

    #[test]
    fn empty_run() {
        let summary = RunSummary::from_reports(&[]);
        assert_eq!(summary.calls(), 0);
        assert!(summary.endpoint("user").is_none());
    }
}
