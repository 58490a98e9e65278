//! The correlation store: CRUD and time-range/tag queries over the unified
//! `correlations` table.
//!
//! The flat nullable-column row shape lives entirely in this file; rows are
//! reassembled into `CorrelationKind` variants on the way out. One corrupt
//! row never fails a range scan: row-level decode failures are logged and
//! the row is skipped.

use chrono::{DateTime, Utc};
use engram_types::correlation::{
    Correlation, CorrelationStatus, CorrelationType, CorrelationUpdate, RetentionPolicy,
};
use engram_types::error::{EngramError, EngramResult};
use engram_types::time::TimeSource;
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::timefmt::{format_ts, parse_ts};

const COLUMNS: &str = "correlation_id, service_type, handler_name, action_type, \
     correlation_type, timestamp, metric_name, metric_value, log_level, \
     trace_id, span_id, parent_span_id, request_data, response_data, tags, \
     status, retention_policy, created_at, updated_at";

/// Correlation store backed by SQLite.
#[derive(Clone)]
pub struct CorrelationStore {
    conn: Arc<Mutex<Connection>>,
    time: Arc<dyn TimeSource>,
}

impl CorrelationStore {
    /// Create a store wrapping the given connection.
    pub fn new(conn: Arc<Mutex<Connection>>, time: Arc<dyn TimeSource>) -> Self {
        Self { conn, time }
    }

    /// Insert a new correlation row. All polymorphic fields are written
    /// verbatim. Fails with `DuplicateKey` if the id already exists; the
    /// store is unchanged by a failed insert.
    pub fn add(&self, correlation: &Correlation) -> EngramResult<String> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| EngramError::Internal(e.to_string()))?;

        let tags_str = serde_json::to_string(&correlation.tags)
            .map_err(|e| EngramError::Serialization(e.to_string()))?;
        let request_str = match &correlation.request_data {
            Some(v) => Some(
                serde_json::to_string(v).map_err(|e| EngramError::Serialization(e.to_string()))?,
            ),
            None => None,
        };
        let response_str = match &correlation.response_data {
            Some(v) => Some(
                serde_json::to_string(v).map_err(|e| EngramError::Serialization(e.to_string()))?,
            ),
            None => None,
        };

        let kind = &correlation.kind;
        let trace_fields = match kind {
            engram_types::correlation::CorrelationKind::Trace {
                trace_id,
                span_id,
                parent_span_id,
            } => (
                Some(trace_id.clone()),
                Some(span_id.clone()),
                parent_span_id.clone(),
            ),
            _ => (None, None, None),
        };

        let result = conn.execute(
            "INSERT INTO correlations (
                correlation_id, service_type, handler_name, action_type,
                correlation_type, timestamp, metric_name, metric_value,
                log_level, trace_id, span_id, parent_span_id,
                request_data, response_data, tags, status, retention_policy,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            rusqlite::params![
                correlation.correlation_id,
                correlation.service_type,
                correlation.handler_name,
                correlation.action_type,
                kind.correlation_type().as_str(),
                correlation.timestamp.map(format_ts),
                kind.metric_name(),
                kind.metric_value(),
                kind.log_level(),
                trace_fields.0,
                trace_fields.1,
                trace_fields.2,
                request_str,
                response_str,
                tags_str,
                correlation.status.as_str(),
                correlation.retention_policy.as_str(),
                format_ts(correlation.created_at),
                format_ts(correlation.updated_at),
            ],
        );

        match result {
            Ok(_) => Ok(correlation.correlation_id.clone()),
            // Only a primary-key collision means "duplicate"; other
            // constraint failures stay generic storage errors.
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                Err(EngramError::DuplicateKey(correlation.correlation_id.clone()))
            }
            Err(e) => Err(EngramError::Storage(e.to_string())),
        }
    }

    /// Partially update a correlation's response data and/or status.
    ///
    /// Returns `false` (not an error) when no row with that id exists; a
    /// missing target never creates a phantom row. Always stamps a fresh
    /// `updated_at`.
    pub fn update(&self, id: &str, update: &CorrelationUpdate) -> EngramResult<bool> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| EngramError::Internal(e.to_string()))?;

        let response_str = match &update.response_data {
            Some(v) => Some(
                serde_json::to_string(v).map_err(|e| EngramError::Serialization(e.to_string()))?,
            ),
            None => None,
        };

        let affected = conn
            .execute(
                "UPDATE correlations SET
                    response_data = COALESCE(?1, response_data),
                    status = COALESCE(?2, status),
                    updated_at = ?3
                 WHERE correlation_id = ?4",
                rusqlite::params![
                    response_str,
                    update.status.map(|s| s.as_str()),
                    format_ts(self.time.now()),
                    id,
                ],
            )
            .map_err(|e| EngramError::Storage(e.to_string()))?;
        Ok(affected > 0)
    }

    /// Fetch a correlation by id.
    pub fn get(&self, id: &str) -> EngramResult<Option<Correlation>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| EngramError::Internal(e.to_string()))?;
        let sql = format!("SELECT {COLUMNS} FROM correlations WHERE correlation_id = ?1");
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| EngramError::Storage(e.to_string()))?;
        let result = stmt.query_row(rusqlite::params![id], read_raw_row);
        match result {
            Ok(raw) => Ok(Some(raw_to_correlation(raw)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(EngramError::Storage(e.to_string())),
        }
    }

    /// Query correlations of one type within an inclusive timestamp range,
    /// newest first.
    ///
    /// `metric_names` / `log_levels` are allow-lists; empty means no filter.
    pub fn query_by_type_and_time(
        &self,
        correlation_type: CorrelationType,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        metric_names: &[String],
        log_levels: &[String],
        limit: usize,
    ) -> EngramResult<Vec<Correlation>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| EngramError::Internal(e.to_string()))?;

        let mut sql = format!(
            "SELECT {COLUMNS} FROM correlations WHERE correlation_type = ?1"
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(correlation_type.as_str().to_string())];
        let mut idx = 2;

        if let Some(start) = start {
            sql.push_str(&format!(" AND timestamp >= ?{idx}"));
            params.push(Box::new(format_ts(start)));
            idx += 1;
        }
        if let Some(end) = end {
            sql.push_str(&format!(" AND timestamp <= ?{idx}"));
            params.push(Box::new(format_ts(end)));
            idx += 1;
        }
        idx = push_in_filter(&mut sql, &mut params, idx, "metric_name", metric_names);
        let _ = push_in_filter(&mut sql, &mut params, idx, "log_level", log_levels);

        sql.push_str(" ORDER BY timestamp DESC");
        sql.push_str(&format!(" LIMIT {limit}"));

        run_query(&conn, &sql, &params)
    }

    /// Query a metric series in timeline (ascending) order, with optional
    /// exact-match tag filters.
    pub fn query_metric_series(
        &self,
        metric_name: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        tags: &HashMap<String, String>,
        limit: usize,
    ) -> EngramResult<Vec<Correlation>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| EngramError::Internal(e.to_string()))?;

        let mut sql = format!(
            "SELECT {COLUMNS} FROM correlations \
             WHERE correlation_type = 'METRIC_DATAPOINT' AND metric_name = ?1"
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(metric_name.to_string())];
        let mut idx = 2;

        if let Some(start) = start {
            sql.push_str(&format!(" AND timestamp >= ?{idx}"));
            params.push(Box::new(format_ts(start)));
            idx += 1;
        }
        if let Some(end) = end {
            sql.push_str(&format!(" AND timestamp <= ?{idx}"));
            params.push(Box::new(format_ts(end)));
            let _ = idx;
        }

        // Series order: callers consume this as a timeline.
        sql.push_str(" ORDER BY timestamp ASC");
        if tags.is_empty() {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut rows = run_query(&conn, &sql, &params)?;
        if !tags.is_empty() {
            // Tag equality is checked after JSON decode; exact match only.
            rows.retain(|c| tags.iter().all(|(k, v)| c.tags.get(k) == Some(v)));
            rows.truncate(limit);
        }
        Ok(rows)
    }

    /// Correlate an agent task with its side effects: rows whose
    /// `request_data` embeds the given `task_id`, for one action type.
    pub fn query_by_task_and_action(
        &self,
        task_id: &str,
        action_type: &str,
        status: Option<CorrelationStatus>,
    ) -> EngramResult<Vec<Correlation>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| EngramError::Internal(e.to_string()))?;

        let mut sql = format!(
            "SELECT {COLUMNS} FROM correlations \
             WHERE action_type = ?1 AND request_data LIKE ?2"
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = vec![
            Box::new(action_type.to_string()),
            Box::new(format!("%{task_id}%")),
        ];
        if let Some(status) = status {
            sql.push_str(" AND status = ?3");
            params.push(Box::new(status.as_str().to_string()));
        }
        sql.push_str(" ORDER BY timestamp DESC");

        let mut rows = run_query(&conn, &sql, &params)?;
        // The LIKE is only a prefilter; verify the embedded task_id exactly.
        rows.retain(|c| {
            c.request_data
                .as_ref()
                .and_then(|d| d.get("task_id"))
                .and_then(|v| v.as_str())
                == Some(task_id)
        });
        Ok(rows)
    }
}

/// Raw column values for one row, before kind reassembly.
struct RawRow {
    correlation_id: String,
    service_type: String,
    handler_name: String,
    action_type: String,
    correlation_type: String,
    timestamp: Option<String>,
    metric_name: Option<String>,
    metric_value: Option<f64>,
    log_level: Option<String>,
    trace_id: Option<String>,
    span_id: Option<String>,
    parent_span_id: Option<String>,
    request_data: Option<String>,
    response_data: Option<String>,
    tags: String,
    status: String,
    retention_policy: String,
    created_at: String,
    updated_at: String,
}

fn read_raw_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        correlation_id: row.get(0)?,
        service_type: row.get(1)?,
        handler_name: row.get(2)?,
        action_type: row.get(3)?,
        correlation_type: row.get(4)?,
        timestamp: row.get(5)?,
        metric_name: row.get(6)?,
        metric_value: row.get(7)?,
        log_level: row.get(8)?,
        trace_id: row.get(9)?,
        span_id: row.get(10)?,
        parent_span_id: row.get(11)?,
        request_data: row.get(12)?,
        response_data: row.get(13)?,
        tags: row.get(14)?,
        status: row.get(15)?,
        retention_policy: row.get(16)?,
        created_at: row.get(17)?,
        updated_at: row.get(18)?,
    })
}

/// Reassemble a domain correlation from raw column values.
///
/// Malformed JSON in tags/request/response degrades to empty map / `None`.
/// A row whose discriminator or required kind columns are unusable is a
/// `Validation` error; range scans skip such rows.
fn raw_to_correlation(raw: RawRow) -> EngramResult<Correlation> {
    let ctype: CorrelationType = raw.correlation_type.parse()?;
    let kind = engram_types::correlation::CorrelationKind::from_columns(
        ctype,
        raw.metric_name,
        raw.metric_value,
        raw.log_level,
        raw.trace_id,
        raw.span_id,
        raw.parent_span_id,
    )?;
    let status: CorrelationStatus = raw.status.parse()?;

    let tags: HashMap<String, String> = serde_json::from_str(&raw.tags).unwrap_or_default();
    let request_data = raw
        .request_data
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok());
    let response_data = raw
        .response_data
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok());

    let now_fallback = Utc::now();
    Ok(Correlation {
        correlation_id: raw.correlation_id,
        service_type: raw.service_type,
        handler_name: raw.handler_name,
        action_type: raw.action_type,
        kind,
        timestamp: raw.timestamp.as_deref().and_then(parse_ts),
        request_data,
        response_data,
        tags,
        status,
        retention_policy: RetentionPolicy::parse_lenient(&raw.retention_policy),
        created_at: parse_ts(&raw.created_at).unwrap_or(now_fallback),
        updated_at: parse_ts(&raw.updated_at).unwrap_or(now_fallback),
    })
}

/// Append `AND col IN (?, ...)` for a non-empty allow-list.
fn push_in_filter(
    sql: &mut String,
    params: &mut Vec<Box<dyn rusqlite::types::ToSql>>,
    mut idx: usize,
    column: &str,
    values: &[String],
) -> usize {
    if values.is_empty() {
        return idx;
    }
    let placeholders: Vec<String> = values
        .iter()
        .map(|_| {
            let p = format!("?{idx}");
            idx += 1;
            p
        })
        .collect();
    sql.push_str(&format!(" AND {column} IN ({})", placeholders.join(", ")));
    for v in values {
        params.push(Box::new(v.clone()));
    }
    idx
}

/// Run a prepared query, skipping (and logging) rows that fail to decode.
fn run_query(
    conn: &Connection,
    sql: &str,
    params: &[Box<dyn rusqlite::types::ToSql>],
) -> EngramResult<Vec<Correlation>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| EngramError::Storage(e.to_string()))?;
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt
        .query_map(param_refs.as_slice(), read_raw_row)
        .map_err(|e| EngramError::Storage(e.to_string()))?;

    let mut correlations = Vec::new();
    for row in rows {
        let raw = match row {
            Ok(r) => r,
            Err(e) => {
                warn!("Skipping correlation row with read error: {e}");
                continue;
            }
        };
        let id = raw.correlation_id.clone();
        match raw_to_correlation(raw) {
            Ok(c) => correlations.push(c),
            Err(e) => {
                warn!(correlation_id = %id, "Skipping undecodable correlation row: {e}");
            }
        }
    }
    Ok(correlations)
}
