//! Metrics for the ground station links.
//!
//! Every metric is declared once as a structured [`Metric`] constant so call
//! sites cannot misspell a name and exporters get descriptions and units.
//! Recording without an installed recorder is a no-op.
//!
//! # Example
//!
//! ```rust
//! use gcom_metrics::{metric_defs, Link};
//!
//! metrics::counter!(metric_defs::FRAMES_DECODED.name, &Link::Companion.labels()).increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, Unit};

/// The kind of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A value that can go up and down.
    Gauge,
}

impl MetricKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric declaration with its metadata.
///
/// ```rust
/// use gcom_metrics::{Metric, MetricKind};
/// use metrics::Unit;
///
/// const RETRIES: Metric = Metric::counter("gcom.test.retries")
///     .with_description("Retries attempted")
///     .with_unit(Unit::Count)
///     .with_labels(&["link"]);
///
/// assert_eq!(RETRIES.kind, MetricKind::Counter);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "gcom.frames.decoded").
    pub name: &'static str,
    pub kind: MetricKind,
    pub description: &'static str,
    pub unit: Option<Unit>,
    /// Expected label keys.
    pub labels: &'static [&'static str],
}

impl Metric {
    pub const fn counter(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Counter,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    pub const fn gauge(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Gauge,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Registers this metric's description with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => {
                describe_counter!(self.name, unit, self.description);
            }
            (MetricKind::Counter, None) => {
                describe_counter!(self.name, self.description);
            }
            (MetricKind::Gauge, Some(unit)) => {
                describe_gauge!(self.name, unit, self.description);
            }
            (MetricKind::Gauge, None) => {
                describe_gauge!(self.name, self.description);
            }
        }
    }
}

/// Which link a measurement belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Link {
    Companion,
    Autopilot,
}

impl Link {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Link::Companion => "companion",
            Link::Autopilot => "autopilot",
        }
    }

    /// Label set identifying this link.
    pub fn labels(&self) -> [(&'static str, &'static str); 1] {
        [("link", self.as_str())]
    }

    /// Label set identifying this link plus one extra pair.
    pub fn labels_with(&self, key: &'static str, value: &'static str) -> [(&'static str, &'static str); 2] {
        [("link", self.as_str()), (key, value)]
    }
}

/// All metric definitions.
pub mod metric_defs {
    use super::{Metric, Unit};

    // ========================================================================
    // Framing
    // ========================================================================

    /// Labels: link
    pub const FRAMES_DECODED: Metric = Metric::counter("gcom.frames.decoded")
        .with_description("Frames decoded successfully")
        .with_unit(Unit::Count)
        .with_labels(&["link"]);

    /// Labels: link
    pub const FRAMES_CORRUPT: Metric = Metric::counter("gcom.frames.corrupt")
        .with_description("Decode attempts that discarded bytes")
        .with_unit(Unit::Count)
        .with_labels(&["link"]);

    /// Labels: link
    pub const FRAMES_SENT: Metric = Metric::counter("gcom.frames.sent")
        .with_description("Frames written to the transport")
        .with_unit(Unit::Count)
        .with_labels(&["link"]);

    /// Labels: link
    pub const BYTES_RECEIVED: Metric = Metric::counter("gcom.bytes.received")
        .with_description("Bytes read from the transport")
        .with_unit(Unit::Bytes)
        .with_labels(&["link"]);

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Labels: link
    pub const PEER_CONNECTIONS: Metric = Metric::counter("gcom.session.connections")
        .with_description("Peer connections established")
        .with_unit(Unit::Count)
        .with_labels(&["link"]);

    /// Labels: link
    pub const PEER_DROPS: Metric = Metric::counter("gcom.session.drops")
        .with_description("Peer connections lost or cancelled")
        .with_unit(Unit::Count)
        .with_labels(&["link"]);

    /// Labels: link, decision (resume, reset, query)
    pub const SESSION_DECISIONS: Metric = Metric::counter("gcom.session.decisions")
        .with_description("Resume/reset decisions taken on SystemInfo")
        .with_unit(Unit::Count)
        .with_labels(&["link", "decision"]);

    /// Labels: link
    pub const SESSION_STATE: Metric = Metric::gauge("gcom.session.state")
        .with_description("Current link state as an ordinal (0 = idle)")
        .with_labels(&["link"]);

    // ========================================================================
    // Autopilot
    // ========================================================================

    /// Labels: link, result (accepted, rejected, timeout)
    pub const MISSION_UPLOADS: Metric = Metric::counter("gcom.mission.uploads")
        .with_description("Completed mission upload attempts")
        .with_unit(Unit::Count)
        .with_labels(&["link", "result"]);

    /// Labels: link
    pub const MISSION_ITEMS_SENT: Metric = Metric::counter("gcom.mission.items_sent")
        .with_description("Mission items sent in reply to requests")
        .with_unit(Unit::Count)
        .with_labels(&["link"]);

    /// Labels: link, result (accepted, rejected)
    pub const COMMAND_ACKS: Metric = Metric::counter("gcom.command.acks")
        .with_description("Command acknowledgements received")
        .with_unit(Unit::Count)
        .with_labels(&["link", "result"]);

    /// Every metric, for [`super::describe_metrics`].
    pub const ALL: &[Metric] = &[
        FRAMES_DECODED,
        FRAMES_CORRUPT,
        FRAMES_SENT,
        BYTES_RECEIVED,
        PEER_CONNECTIONS,
        PEER_DROPS,
        SESSION_DECISIONS,
        SESSION_STATE,
        MISSION_UPLOADS,
        MISSION_ITEMS_SENT,
        COMMAND_ACKS,
    ];
}

/// Describes all metrics. Call once after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_labels() {
        assert_eq!(Link::Companion.labels(), [("link", "companion")]);
        assert_eq!(
            Link::Autopilot.labels_with("result", "timeout"),
            [("link", "autopilot"), ("result", "timeout")]
        );
    }

    #[test]
    fn test_metric_definitions() {
        assert_eq!(metric_defs::FRAMES_DECODED.name, "gcom.frames.decoded");
        assert_eq!(metric_defs::FRAMES_DECODED.kind, MetricKind::Counter);
        assert_eq!(metric_defs::BYTES_RECEIVED.unit, Some(Unit::Bytes));
        assert_eq!(metric_defs::SESSION_STATE.kind, MetricKind::Gauge);
        assert_eq!(metric_defs::MISSION_UPLOADS.labels, &["link", "result"]);
    }

    #[test]
    fn test_all_metrics_unique() {
        let mut names: Vec<_> = metric_defs::ALL.iter().map(|m| m.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), metric_defs::ALL.len());
        assert_eq!(metric_defs::ALL.len(), 11);
    }

    #[test]
    fn test_describe_without_recorder() {
        describe_metrics();
        metrics::counter!(metric_defs::FRAMES_SENT.name, &Link::Autopilot.labels()).increment(1);
    }

    #[test]
    fn test_metric_minimal() {
        const MINIMAL: Metric = Metric::gauge("minimal");
        assert_eq!(MINIMAL.description, "");
        assert_eq!(MINIMAL.unit, None);
        assert_eq!(MINIMAL.labels, &[] as &[&str]);
    }
}
