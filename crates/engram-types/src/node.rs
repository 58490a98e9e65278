//! Graph node model: addressable memory entities keyed by `(id, scope)`.

use crate::error::EngramError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Scope partitions a node's identity space; `(id, scope)` is the true key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphScope {
    /// Private to this agent instance.
    Local,
    /// The agent's identity; mutations require wise-authority provenance.
    Identity,
    /// Shared knowledge about the environment.
    Environment,
}

impl GraphScope {
    /// The stored wire name for this scope.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Identity => "identity",
            Self::Environment => "environment",
        }
    }
}

impl std::str::FromStr for GraphScope {
    type Err = EngramError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "identity" => Ok(Self::Identity),
            "environment" => Ok(Self::Environment),
            other => Err(EngramError::Validation(format!("Unknown scope: {other}"))),
        }
    }
}

/// Types of nodes in the memory graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// The agent itself.
    Agent,
    /// A user the agent interacts with.
    User,
    /// A communication channel.
    Channel,
    /// A concept or fact.
    Concept,
    /// A time-series datapoint mirrored into the graph; carries the same
    /// metric/log fields as its correlation twin in its attributes.
    TsdbData,
    /// A custom node type.
    Custom(String),
}

impl NodeType {
    /// The stored wire name for this node type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Agent => "agent",
            Self::User => "user",
            Self::Channel => "channel",
            Self::Concept => "concept",
            Self::TsdbData => "tsdb_data",
            Self::Custom(s) => s,
        }
    }

    /// Parse a stored node type, folding unknown names into `Custom`.
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "agent" => Self::Agent,
            "user" => Self::User,
            "channel" => Self::Channel,
            "concept" => Self::Concept,
            "tsdb_data" => Self::TsdbData,
            other => Self::Custom(other.to_string()),
        }
    }
}

/// Reserved attribute key holding the list of secret-reference UUIDs.
pub const SECRET_REFS_KEY: &str = "_secret_refs";

/// An addressable memory entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Unique within `scope`.
    pub id: String,
    /// What kind of entity this is.
    pub node_type: NodeType,
    /// Which identity space the node lives in.
    pub scope: GraphScope,
    /// Arbitrary structured attributes.
    pub attributes: HashMap<String, serde_json::Value>,
    /// Who last wrote the node, when known.
    pub updated_by: Option<String>,
    /// When the node was created.
    pub created_at: DateTime<Utc>,
    /// When the node was last updated.
    pub updated_at: DateTime<Utc>,
}

impl GraphNode {
    /// Create a node stamped at `now`.
    pub fn new(
        id: impl Into<String>,
        node_type: NodeType,
        scope: GraphScope,
        attributes: HashMap<String, serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            node_type,
            scope,
            attributes,
            updated_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The secret-reference UUIDs stored under [`SECRET_REFS_KEY`], if any.
    pub fn secret_refs(&self) -> Vec<String> {
        match self.attributes.get(SECRET_REFS_KEY) {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Append secret-reference UUIDs under [`SECRET_REFS_KEY`].
    pub fn append_secret_refs(&mut self, uuids: impl IntoIterator<Item = String>) {
        let entry = self
            .attributes
            .entry(SECRET_REFS_KEY.to_string())
            .or_insert_with(|| serde_json::Value::Array(Vec::new()));
        if let serde_json::Value::Array(items) = entry {
            for uuid in uuids {
                items.push(serde_json::Value::String(uuid));
            }
        }
    }
}

/// Query for recalling nodes from the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallQuery {
    /// The node id to fetch, or `"*"` to list nodes in the scope.
    pub node_id: String,
    /// Which identity space to look in.
    pub scope: GraphScope,
    /// Whether to include edges. Traversal beyond depth 0 is not yet
    /// implemented; this is accepted and ignored.
    pub include_edges: bool,
    /// Traversal depth. Only depth 0 is honored today.
    pub depth: u32,
}

impl RecallQuery {
    /// A direct lookup of one node.
    pub fn node(node_id: impl Into<String>, scope: GraphScope) -> Self {
        Self {
            node_id: node_id.into(),
            scope,
            include_edges: false,
            depth: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_refs_roundtrip() {
        let mut node = GraphNode::new(
            "user/alice",
            NodeType::User,
            GraphScope::Local,
            HashMap::new(),
            Utc::now(),
        );
        assert!(node.secret_refs().is_empty());
        node.append_secret_refs(["a-1".to_string(), "b-2".to_string()]);
        node.append_secret_refs(["c-3".to_string()]);
        assert_eq!(node.secret_refs(), vec!["a-1", "b-2", "c-3"]);
    }

    #[test]
    fn test_node_type_lenient_parse() {
        assert_eq!(NodeType::parse_lenient("tsdb_data"), NodeType::TsdbData);
        assert_eq!(
            NodeType::parse_lenient("widget"),
            NodeType::Custom("widget".to_string())
        );
    }

    #[test]
    fn test_scope_rejects_unknown() {
        assert!("global".parse::<GraphScope>().is_err());
        assert_eq!("identity".parse::<GraphScope>().unwrap(), GraphScope::Identity);
    }
}
