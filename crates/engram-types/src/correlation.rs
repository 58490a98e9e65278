//! The correlation data model: one persisted event row in the unified
//! time-series/audit table.
//!
//! The flat nullable-column shape of the `correlations` table never leaves
//! the persistence edge. Business logic sees `CorrelationKind`, a tagged
//! variant where only the fields meaningful for the event kind exist.

use crate::error::{EngramError, EngramResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Discriminator selecting which semantics apply to a correlation row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrelationType {
    /// A request/response interaction with a service handler.
    ServiceInteraction,
    /// A single metric observation.
    MetricDatapoint,
    /// A log line.
    LogEntry,
    /// A distributed-trace span.
    TraceSpan,
    /// An audit event.
    AuditEvent,
    /// An hourly roll-up of raw metric datapoints.
    MetricHourlySummary,
    /// A daily roll-up of raw metric datapoints.
    MetricDailySummary,
}

impl CorrelationType {
    /// The stored wire name for this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServiceInteraction => "SERVICE_INTERACTION",
            Self::MetricDatapoint => "METRIC_DATAPOINT",
            Self::LogEntry => "LOG_ENTRY",
            Self::TraceSpan => "TRACE_SPAN",
            Self::AuditEvent => "AUDIT_EVENT",
            Self::MetricHourlySummary => "METRIC_HOURLY_SUMMARY",
            Self::MetricDailySummary => "METRIC_DAILY_SUMMARY",
        }
    }
}

impl std::fmt::Display for CorrelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CorrelationType {
    type Err = EngramError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SERVICE_INTERACTION" => Ok(Self::ServiceInteraction),
            "METRIC_DATAPOINT" => Ok(Self::MetricDatapoint),
            "LOG_ENTRY" => Ok(Self::LogEntry),
            "TRACE_SPAN" => Ok(Self::TraceSpan),
            "AUDIT_EVENT" => Ok(Self::AuditEvent),
            "METRIC_HOURLY_SUMMARY" => Ok(Self::MetricHourlySummary),
            "METRIC_DAILY_SUMMARY" => Ok(Self::MetricDailySummary),
            other => Err(EngramError::Validation(format!(
                "Unknown correlation type: {other}"
            ))),
        }
    }
}

/// Lifecycle status of a request/response correlation.
///
/// Metric, log, and audit rows are created already `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrelationStatus {
    Pending,
    Completed,
    Failed,
}

impl CorrelationStatus {
    /// The stored wire name for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::str::FromStr for CorrelationStatus {
    type Err = EngramError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(EngramError::Validation(format!(
                "Unknown correlation status: {other}"
            ))),
        }
    }
}

/// Advisory retention tier. The store only records and filters on this tag;
/// the compaction job that produces summary rows is an external producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    #[default]
    Raw,
    HourlySummary,
    DailySummary,
}

impl RetentionPolicy {
    /// The stored wire name for this tier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::HourlySummary => "hourly_summary",
            Self::DailySummary => "daily_summary",
        }
    }

    /// Parse a stored tier tag, defaulting unknown values to `Raw`.
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "hourly_summary" => Self::HourlySummary,
            "daily_summary" => Self::DailySummary,
            _ => Self::Raw,
        }
    }
}

/// The polymorphic payload of a correlation, discriminated by kind.
///
/// Exactly the fields meaningful for the event kind exist on each variant;
/// there are no sentinel values for "unused".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CorrelationKind {
    /// A request/response service interaction.
    Interaction,
    /// A metric observation.
    Metric { metric_name: String, metric_value: f64 },
    /// A log line at a named level.
    Log { log_level: String },
    /// A trace span within a distributed trace.
    Trace {
        trace_id: String,
        span_id: String,
        parent_span_id: Option<String>,
    },
    /// An audit event.
    Audit,
    /// An hourly metric roll-up produced by an external summarizer.
    HourlySummary { metric_name: String, metric_value: f64 },
    /// A daily metric roll-up produced by an external summarizer.
    DailySummary { metric_name: String, metric_value: f64 },
}

impl CorrelationKind {
    /// The discriminator value this kind maps to in storage.
    pub fn correlation_type(&self) -> CorrelationType {
        match self {
            Self::Interaction => CorrelationType::ServiceInteraction,
            Self::Metric { .. } => CorrelationType::MetricDatapoint,
            Self::Log { .. } => CorrelationType::LogEntry,
            Self::Trace { .. } => CorrelationType::TraceSpan,
            Self::Audit => CorrelationType::AuditEvent,
            Self::HourlySummary { .. } => CorrelationType::MetricHourlySummary,
            Self::DailySummary { .. } => CorrelationType::MetricDailySummary,
        }
    }

    /// Reassemble a kind from the flat column values at the persistence edge.
    ///
    /// Fails with `Validation` when a required column for the discriminator
    /// is absent (e.g. a METRIC_DATAPOINT row with no metric name).
    pub fn from_columns(
        ctype: CorrelationType,
        metric_name: Option<String>,
        metric_value: Option<f64>,
        log_level: Option<String>,
        trace_id: Option<String>,
        span_id: Option<String>,
        parent_span_id: Option<String>,
    ) -> EngramResult<Self> {
        let missing = |col: &str| {
            EngramError::Validation(format!("{ctype} row missing required column {col}"))
        };
        match ctype {
            CorrelationType::ServiceInteraction => Ok(Self::Interaction),
            CorrelationType::MetricDatapoint => Ok(Self::Metric {
                metric_name: metric_name.ok_or_else(|| missing("metric_name"))?,
                metric_value: metric_value.ok_or_else(|| missing("metric_value"))?,
            }),
            CorrelationType::LogEntry => Ok(Self::Log {
                log_level: log_level.ok_or_else(|| missing("log_level"))?,
            }),
            CorrelationType::TraceSpan => Ok(Self::Trace {
                trace_id: trace_id.ok_or_else(|| missing("trace_id"))?,
                span_id: span_id.ok_or_else(|| missing("span_id"))?,
                parent_span_id,
            }),
            CorrelationType::AuditEvent => Ok(Self::Audit),
            CorrelationType::MetricHourlySummary => Ok(Self::HourlySummary {
                metric_name: metric_name.ok_or_else(|| missing("metric_name"))?,
                metric_value: metric_value.ok_or_else(|| missing("metric_value"))?,
            }),
            CorrelationType::MetricDailySummary => Ok(Self::DailySummary {
                metric_name: metric_name.ok_or_else(|| missing("metric_name"))?,
                metric_value: metric_value.ok_or_else(|| missing("metric_value"))?,
            }),
        }
    }

    /// The metric name, when this kind carries one.
    pub fn metric_name(&self) -> Option<&str> {
        match self {
            Self::Metric { metric_name, .. }
            | Self::HourlySummary { metric_name, .. }
            | Self::DailySummary { metric_name, .. } => Some(metric_name),
            _ => None,
        }
    }

    /// The metric value, when this kind carries one.
    pub fn metric_value(&self) -> Option<f64> {
        match self {
            Self::Metric { metric_value, .. }
            | Self::HourlySummary { metric_value, .. }
            | Self::DailySummary { metric_value, .. } => Some(*metric_value),
            _ => None,
        }
    }

    /// The log level, when this kind carries one.
    pub fn log_level(&self) -> Option<&str> {
        match self {
            Self::Log { log_level } => Some(log_level),
            _ => None,
        }
    }
}

/// A single persisted event row in the unified time-series/audit table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    /// Primary key; immutable after creation.
    pub correlation_id: String,
    /// Which service produced the event.
    pub service_type: String,
    /// Which handler within that service.
    pub handler_name: String,
    /// Which action the handler was performing.
    pub action_type: String,
    /// Kind-specific payload and discriminator.
    pub kind: CorrelationKind,
    /// Logical event time, used for all range queries. Distinct from the
    /// row-lifecycle stamps below.
    pub timestamp: Option<DateTime<Utc>>,
    /// Free-form request context; may contain secret references.
    pub request_data: Option<serde_json::Value>,
    /// Free-form response context; may contain secret references.
    pub response_data: Option<serde_json::Value>,
    /// Equality-filterable tags (scope, environment, host, ...).
    pub tags: HashMap<String, String>,
    /// Lifecycle status.
    pub status: CorrelationStatus,
    /// Advisory retention tier.
    pub retention_policy: RetentionPolicy,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last modified.
    pub updated_at: DateTime<Utc>,
}

impl Correlation {
    /// Create a correlation stamped at `now`.
    ///
    /// Metric, log, audit, and summary kinds are created `Completed`;
    /// interactions and trace spans start `Pending`.
    pub fn new(
        correlation_id: impl Into<String>,
        service_type: impl Into<String>,
        handler_name: impl Into<String>,
        action_type: impl Into<String>,
        kind: CorrelationKind,
        now: DateTime<Utc>,
    ) -> Self {
        let status = match kind {
            CorrelationKind::Interaction | CorrelationKind::Trace { .. } => {
                CorrelationStatus::Pending
            }
            _ => CorrelationStatus::Completed,
        };
        Self {
            correlation_id: correlation_id.into(),
            service_type: service_type.into(),
            handler_name: handler_name.into(),
            action_type: action_type.into(),
            kind,
            timestamp: Some(now),
            request_data: None,
            response_data: None,
            tags: HashMap::new(),
            status,
            retention_policy: RetentionPolicy::Raw,
            created_at: now,
            updated_at: now,
        }
    }

    /// A `MetricDatapoint` correlation with a generated id.
    pub fn metric(
        service_type: impl Into<String>,
        handler_name: impl Into<String>,
        metric_name: impl Into<String>,
        metric_value: f64,
        tags: HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut c = Self::new(
            Uuid::new_v4().to_string(),
            service_type,
            handler_name,
            "memorize_metric",
            CorrelationKind::Metric {
                metric_name: metric_name.into(),
                metric_value,
            },
            now,
        );
        c.tags = tags;
        c
    }

    /// A `LogEntry` correlation with a generated id. The message travels in
    /// `request_data` under the `"message"` key.
    pub fn log(
        service_type: impl Into<String>,
        handler_name: impl Into<String>,
        message: impl Into<String>,
        log_level: impl Into<String>,
        tags: HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut c = Self::new(
            Uuid::new_v4().to_string(),
            service_type,
            handler_name,
            "memorize_log",
            CorrelationKind::Log {
                log_level: log_level.into(),
            },
            now,
        );
        c.request_data = Some(serde_json::json!({ "message": message.into() }));
        c.tags = tags;
        c
    }

    /// Attach tags, builder-style.
    pub fn with_tags(mut self, tags: HashMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    /// Attach request data, builder-style.
    pub fn with_request_data(mut self, data: serde_json::Value) -> Self {
        self.request_data = Some(data);
        self
    }
}

/// Partial update applied to a pending request/response correlation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorrelationUpdate {
    /// New response payload, if any.
    pub response_data: Option<serde_json::Value>,
    /// New lifecycle status, if any.
    pub status: Option<CorrelationStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_round_trips_through_str() {
        for t in [
            CorrelationType::ServiceInteraction,
            CorrelationType::MetricDatapoint,
            CorrelationType::LogEntry,
            CorrelationType::TraceSpan,
            CorrelationType::AuditEvent,
            CorrelationType::MetricHourlySummary,
            CorrelationType::MetricDailySummary,
        ] {
            assert_eq!(t.as_str().parse::<CorrelationType>().unwrap(), t);
        }
    }

    #[test]
    fn test_unknown_type_is_validation_error() {
        let err = "METRIC_WEEKLY_SUMMARY".parse::<CorrelationType>().unwrap_err();
        assert!(matches!(err, EngramError::Validation(_)));
    }

    #[test]
    fn test_metric_created_completed() {
        let c = Correlation::metric(
            "telemetry",
            "collector",
            "cpu",
            42.5,
            HashMap::new(),
            Utc::now(),
        );
        assert_eq!(c.status, CorrelationStatus::Completed);
        assert_eq!(c.kind.metric_name(), Some("cpu"));
        assert_eq!(c.kind.metric_value(), Some(42.5));
        assert_eq!(c.kind.correlation_type(), CorrelationType::MetricDatapoint);
    }

    #[test]
    fn test_interaction_created_pending() {
        let c = Correlation::new(
            "corr-1",
            "llm",
            "chat_handler",
            "speak",
            CorrelationKind::Interaction,
            Utc::now(),
        );
        assert_eq!(c.status, CorrelationStatus::Pending);
        assert!(c.kind.metric_name().is_none());
    }

    #[test]
    fn test_from_columns_rejects_missing_metric_name() {
        let err = CorrelationKind::from_columns(
            CorrelationType::MetricDatapoint,
            None,
            Some(1.0),
            None,
            None,
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, EngramError::Validation(_)));
    }

    #[test]
    fn test_from_columns_trace() {
        let kind = CorrelationKind::from_columns(
            CorrelationType::TraceSpan,
            None,
            None,
            None,
            Some("trace-1".into()),
            Some("span-1".into()),
            None,
        )
        .unwrap();
        assert_eq!(
            kind,
            CorrelationKind::Trace {
                trace_id: "trace-1".into(),
                span_id: "span-1".into(),
                parent_span_id: None,
            }
        );
    }

    #[test]
    fn test_retention_policy_lenient_parse() {
        assert_eq!(
            RetentionPolicy::parse_lenient("hourly_summary"),
            RetentionPolicy::HourlySummary
        );
        assert_eq!(RetentionPolicy::parse_lenient("bogus"), RetentionPolicy::Raw);
    }
}
