//! Names and units of the per-endpoint measurements.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unit of a recorded measurement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Unit {
    /// A duration sample in milliseconds.
    Milliseconds,
    /// A counter increment.
    Count,
}

impl Unit {
    /// Returns the unit name as understood by CloudWatch.
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Milliseconds => "Milliseconds",
            Unit::Count => "Count",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kinds of measurements recorded for every dispatched request.
///
/// Each kind is stored under the key `{metric_name}-{suffix}`, see [`MetricKind::key`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Time from sending the request until the response body was read.
    NetworkLatency,
    /// One per dispatched request, regardless of the outcome.
    TotalCalls,
    /// Requests that completed with a status below 400.
    Successes,
    /// Requests that completed with a status of 400 or above, or did not complete at all.
    Failures,
}

impl MetricKind {
    /// Returns the suffix appended to the metric name.
    pub fn suffix(&self) -> &'static str {
        match self {
            MetricKind::NetworkLatency => "network-latency",
            MetricKind::TotalCalls => "total-calls",
            MetricKind::Successes => "successes",
            MetricKind::Failures => "failures",
        }
    }

    /// Returns the unit of measurements of this kind.
    pub fn unit(&self) -> Unit {
        match self {
            MetricKind::NetworkLatency => Unit::Milliseconds,
            _ => Unit::Count,
        }
    }

    /// Builds the synthetic key for the given logical endpoint.
    ///
    /// ```
    /// use loadsim_types::MetricKind;
    ///
    /// assert_eq!(MetricKind::TotalCalls.key("user"), "user-total-calls");
    /// ```
    pub fn key(&self, metric_name: &str) -> String {
        format!("{metric_name}-{}", self.suffix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_and_units() {
        assert_eq!(
            MetricKind::NetworkLatency.key("cached-user"),
            "cached-user-network-latency"
        );
        assert_eq!(MetricKind::Successes.key("followers"), "followers-successes");
        assert_eq!(MetricKind::Failures.key("followers"), "followers-failures");

        assert_eq!(MetricKind::NetworkLatency.unit(), Unit::Milliseconds);
        assert_eq!(MetricKind::Failures.unit(), Unit::Count);
    }
}
