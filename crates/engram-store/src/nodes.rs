//! Graph node store: CRUD over `(node_id, scope)`-keyed memory entities.

use engram_types::error::{EngramError, EngramResult};
use engram_types::node::{GraphNode, GraphScope, NodeType};
use engram_types::time::TimeSource;
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::timefmt::{format_ts, parse_ts};

/// Graph node store backed by SQLite.
#[derive(Clone)]
pub struct GraphNodeStore {
    conn: Arc<Mutex<Connection>>,
    time: Arc<dyn TimeSource>,
}

impl GraphNodeStore {
    /// Create a store wrapping the given connection.
    pub fn new(conn: Arc<Mutex<Connection>>, time: Arc<dyn TimeSource>) -> Self {
        Self { conn, time }
    }

    /// Insert or replace a node. An existing `(id, scope)` row keeps its
    /// `created_at`; everything else is overwritten.
    pub fn upsert(&self, node: &GraphNode) -> EngramResult<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| EngramError::Internal(e.to_string()))?;
        let attrs_str = serde_json::to_string(&node.attributes)
            .map_err(|e| EngramError::Serialization(e.to_string()))?;
        let now = format_ts(self.time.now());
        conn.execute(
            "INSERT INTO graph_nodes (node_id, scope, node_type, attributes, updated_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(node_id, scope) DO UPDATE SET
                node_type = ?3, attributes = ?4, updated_by = ?5, updated_at = ?6",
            rusqlite::params![
                node.id,
                node.scope.as_str(),
                node.node_type.as_str(),
                attrs_str,
                node.updated_by,
                now,
            ],
        )
        .map_err(|e| EngramError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Fetch a node by `(id, scope)`.
    pub fn get(&self, id: &str, scope: GraphScope) -> EngramResult<Option<GraphNode>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| EngramError::Internal(e.to_string()))?;
        let mut stmt = conn
            .prepare(
                "SELECT node_id, scope, node_type, attributes, updated_by, created_at, updated_at
                 FROM graph_nodes WHERE node_id = ?1 AND scope = ?2",
            )
            .map_err(|e| EngramError::Storage(e.to_string()))?;
        let result = stmt.query_row(rusqlite::params![id, scope.as_str()], read_node_row);
        match result {
            Ok(raw) => Ok(Some(raw_to_node(raw)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(EngramError::Storage(e.to_string())),
        }
    }

    /// Delete a node. Returns `false` when no such node existed.
    pub fn delete(&self, id: &str, scope: GraphScope) -> EngramResult<bool> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| EngramError::Internal(e.to_string()))?;
        let affected = conn
            .execute(
                "DELETE FROM graph_nodes WHERE node_id = ?1 AND scope = ?2",
                rusqlite::params![id, scope.as_str()],
            )
            .map_err(|e| EngramError::Storage(e.to_string()))?;
        Ok(affected > 0)
    }

    /// List nodes in a scope, most recently updated first, optionally
    /// narrowed to one node type.
    pub fn list(
        &self,
        scope: GraphScope,
        node_type: Option<&NodeType>,
        limit: usize,
    ) -> EngramResult<Vec<GraphNode>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| EngramError::Internal(e.to_string()))?;
        let mut sql = String::from(
            "SELECT node_id, scope, node_type, attributes, updated_by, created_at, updated_at
             FROM graph_nodes WHERE scope = ?1",
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(scope.as_str().to_string())];
        if let Some(node_type) = node_type {
            sql.push_str(" AND node_type = ?2");
            params.push(Box::new(node_type.as_str().to_string()));
        }
        sql.push_str(&format!(" ORDER BY updated_at DESC LIMIT {limit}"));

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| EngramError::Storage(e.to_string()))?;
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), read_node_row)
            .map_err(|e| EngramError::Storage(e.to_string()))?;

        let mut nodes = Vec::new();
        for row in rows {
            let raw = match row {
                Ok(r) => r,
                Err(e) => {
                    warn!("Skipping graph node row with read error: {e}");
                    continue;
                }
            };
            let id = raw.node_id.clone();
            match raw_to_node(raw) {
                Ok(n) => nodes.push(n),
                Err(e) => warn!(node_id = %id, "Skipping undecodable graph node: {e}"),
            }
        }
        Ok(nodes)
    }
}

struct RawNodeRow {
    node_id: String,
    scope: String,
    node_type: String,
    attributes: String,
    updated_by: Option<String>,
    created_at: String,
    updated_at: String,
}

fn read_node_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawNodeRow> {
    Ok(RawNodeRow {
        node_id: row.get(0)?,
        scope: row.get(1)?,
        node_type: row.get(2)?,
        attributes: row.get(3)?,
        updated_by: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn raw_to_node(raw: RawNodeRow) -> EngramResult<GraphNode> {
    let scope: GraphScope = raw.scope.parse()?;
    let attributes: HashMap<String, serde_json::Value> =
        serde_json::from_str(&raw.attributes).unwrap_or_default();
    let now_fallback = chrono::Utc::now();
    Ok(GraphNode {
        id: raw.node_id,
        node_type: NodeType::parse_lenient(&raw.node_type),
        scope,
        attributes,
        updated_by: raw.updated_by,
        created_at: parse_ts(&raw.created_at).unwrap_or(now_fallback),
        updated_at: parse_ts(&raw.updated_at).unwrap_or(now_fallback),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{run_migrations, MIGRATIONS};
    use chrono::{Duration, TimeZone, Utc};
    use engram_types::time::FixedClock;

    fn setup() -> (GraphNodeStore, Arc<FixedClock>) {
        let mut conn = Connection::open_in_memory().unwrap();
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 8, 26, 12, 0, 0).unwrap(),
        ));
        run_migrations(&mut conn, clock.as_ref(), MIGRATIONS).unwrap();
        let store = GraphNodeStore::new(Arc::new(Mutex::new(conn)), clock.clone());
        (store, clock)
    }

    fn node(id: &str, scope: GraphScope, clock: &FixedClock) -> GraphNode {
        GraphNode::new(id, NodeType::Concept, scope, HashMap::new(), clock.now())
    }

    #[test]
    fn test_upsert_get_roundtrip() {
        let (store, clock) = setup();
        let mut n = node("concept/rust", GraphScope::Local, &clock);
        n.attributes
            .insert("summary".into(), serde_json::json!("a language"));
        store.upsert(&n).unwrap();

        let got = store.get("concept/rust", GraphScope::Local).unwrap().unwrap();
        assert_eq!(got.id, "concept/rust");
        assert_eq!(got.attributes["summary"], serde_json::json!("a language"));
    }

    #[test]
    fn test_scope_partitions_identity() {
        let (store, clock) = setup();
        store
            .upsert(&node("agent/self", GraphScope::Local, &clock))
            .unwrap();
        assert!(store.get("agent/self", GraphScope::Identity).unwrap().is_none());
        assert!(store.get("agent/self", GraphScope::Local).unwrap().is_some());
    }

    #[test]
    fn test_upsert_keeps_created_at() {
        let (store, clock) = setup();
        let n = node("user/alice", GraphScope::Local, &clock);
        store.upsert(&n).unwrap();
        let first = store.get("user/alice", GraphScope::Local).unwrap().unwrap();

        clock.advance(Duration::hours(1));
        store.upsert(&n).unwrap();
        let second = store.get("user/alice", GraphScope::Local).unwrap().unwrap();
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at > first.updated_at);
    }

    #[test]
    fn test_delete_reports_absence() {
        let (store, clock) = setup();
        store
            .upsert(&node("user/alice", GraphScope::Local, &clock))
            .unwrap();
        assert!(store.delete("user/alice", GraphScope::Local).unwrap());
        assert!(!store.delete("user/alice", GraphScope::Local).unwrap());
    }

    #[test]
    fn test_list_filters_by_type() {
        let (store, clock) = setup();
        for i in 0..3 {
            let mut n = node(&format!("metric/{i}"), GraphScope::Local, &clock);
            n.node_type = NodeType::TsdbData;
            store.upsert(&n).unwrap();
            clock.advance(Duration::seconds(1));
        }
        store
            .upsert(&node("concept/other", GraphScope::Local, &clock))
            .unwrap();

        let typed = store
            .list(GraphScope::Local, Some(&NodeType::TsdbData), 10)
            .unwrap();
        assert_eq!(typed.len(), 3);
        assert_eq!(typed[0].id, "metric/2");

        let all = store.list(GraphScope::Local, None, 10).unwrap();
        assert_eq!(all.len(), 4);
    }
}
