//! Thin aggregation layer over the service's primitives, used by status
//! endpoints and the agent's introspection tools.

use chrono::{DateTime, Utc};
use engram_types::correlation::{Correlation, CorrelationType};
use engram_types::error::EngramResult;
use serde::{Deserialize, Serialize};

use crate::service::MemoryService;

/// Latest resource status for one service, derived from its synthetic
/// `<service>.tokens_used` metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// The service asked about.
    pub service_name: String,
    /// Most recent tokens-used reading, if any was ever recorded.
    pub tokens_used: Option<f64>,
    /// When that reading was taken.
    pub last_seen: Option<DateTime<Utc>>,
}

impl MemoryService {
    /// Status for one service: the last datapoint of its
    /// `<service>.tokens_used` metric.
    pub async fn service_status(&self, service_name: &str) -> EngramResult<ServiceStatus> {
        let metric = format!("{service_name}.tokens_used");
        let series = self.correlations().query_metric_series(
            &metric,
            None,
            None,
            &Default::default(),
            1000,
        )?;
        // Series is ascending; the status is the tail.
        let last = series.last();
        Ok(ServiceStatus {
            service_name: service_name.to_string(),
            tokens_used: last.and_then(|c| c.kind.metric_value()),
            last_seen: last.and_then(|c| c.timestamp),
        })
    }

    /// Audit events belonging to a task or thought, newest first.
    ///
    /// Belonging means the event's `request_data` embeds the entity id as
    /// `task_id` or `thought_id`.
    pub async fn audit_trail(
        &self,
        entity_id: &str,
        limit: usize,
    ) -> EngramResult<Vec<Correlation>> {
        let mut rows = self.correlations().query_by_type_and_time(
            CorrelationType::AuditEvent,
            None,
            None,
            &[],
            &[],
            // Overfetch: the entity filter applies after the scan.
            limit.saturating_mul(10).max(100),
        )?;
        rows.retain(|c| {
            let Some(data) = c.request_data.as_ref() else {
                return false;
            };
            ["task_id", "thought_id"].iter().any(|key| {
                data.get(key).and_then(|v| v.as_str()) == Some(entity_id)
            })
        });
        rows.truncate(limit);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_secrets::{MasterKey, SecretsPipeline, SecretsStore};
    use engram_store::Database;
    use engram_types::correlation::CorrelationKind;
    use engram_types::node::GraphScope;
    use engram_types::time::{FixedClock, TimeSource};
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn setup() -> (MemoryService, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 8, 26, 12, 0, 0).unwrap(),
        ));
        let time: Arc<dyn TimeSource> = clock.clone();
        let db = Database::open_in_memory(time.clone()).unwrap();
        let pipeline = SecretsPipeline::new(SecretsStore::new(
            db.connection(),
            time,
            MasterKey::generate(),
        ));
        (MemoryService::new(&db, pipeline), clock)
    }

    #[tokio::test]
    async fn test_service_status_reads_latest_datapoint() {
        let (service, clock) = setup();
        for used in [100.0, 250.0, 900.0] {
            service
                .memorize_metric("llm.tokens_used", used, HashMap::new(), GraphScope::Local)
                .await
                .unwrap();
            clock.advance(chrono::Duration::minutes(1));
        }

        let status = service.service_status("llm").await.unwrap();
        assert_eq!(status.tokens_used, Some(900.0));
        assert!(status.last_seen.is_some());
    }

    #[tokio::test]
    async fn test_service_status_for_unknown_service_is_empty() {
        let (service, _) = setup();
        let status = service.service_status("ghost").await.unwrap();
        assert!(status.tokens_used.is_none());
        assert!(status.last_seen.is_none());
    }

    #[tokio::test]
    async fn test_audit_trail_filters_on_embedded_entity() {
        let (service, clock) = setup();
        for (id, task) in [("audit-1", "task-1"), ("audit-2", "task-2"), ("audit-3", "task-1")] {
            let c = Correlation::new(
                id,
                "audit",
                "audit_logger",
                "record",
                CorrelationKind::Audit,
                clock.now(),
            )
            .with_request_data(serde_json::json!({"task_id": task}));
            service.correlations().add(&c).unwrap();
            clock.advance(chrono::Duration::seconds(1));
        }

        let trail = service.audit_trail("task-1", 10).await.unwrap();
        assert_eq!(trail.len(), 2);
        // Newest first.
        assert_eq!(trail[0].correlation_id, "audit-3");

        let by_thought = service.audit_trail("task-2", 10).await.unwrap();
        assert_eq!(by_thought.len(), 1);
    }
}
