//! Graph write models for the issue knowledge graph

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label carried by every issue node
pub const ISSUE_LABEL: &str = "Issue";
/// Unique identifying property of issue nodes
pub const ISSUE_KEY_PROPERTY: &str = "key";
/// Unique identifying property of satellite nodes (within their label)
pub const SATELLITE_NAME_PROPERTY: &str = "name";
/// Property holding the issue embedding vector
pub const EMBEDDING_PROPERTY: &str = "embedding";

/// Fully resolved property set of one Issue node.
///
/// Written as a whole: every ingestion overwrites all of these properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueNode {
    pub key: String,
    pub summary: String,
    pub description: String,
    pub embedding: Vec<f32>,
    /// Scalar attributes as (property, value), in configuration order
    pub attributes: Vec<(String, String)>,
}

/// Satellites of one derived (label, relationship type) pair for one issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SatelliteLink {
    pub label: String,
    pub relationship: String,
    /// Distinct satellite names, in first-seen order
    pub names: Vec<String>,
}

/// One row's unit of work: the issue node and all its outgoing links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueWrite {
    pub issue: IssueNode,
    pub links: Vec<SatelliteLink>,
}

impl IssueWrite {
    /// Number of relationship merges this write issues
    pub fn link_count(&self) -> usize {
        self.links.iter().map(|l| l.names.len()).sum()
    }
}

/// Node and relationship counts of the ingested graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub issues: usize,
    /// Satellite node count per label
    pub satellites: BTreeMap<String, usize>,
    /// Issue → satellite relationship count per type
    pub relationships: BTreeMap<String, usize>,
}

impl GraphStats {
    pub fn satellite_total(&self) -> usize {
        self.satellites.values().sum()
    }

    pub fn relationship_total(&self) -> usize {
        self.relationships.values().sum()
    }
}

/// Quote an identifier (label, relationship type, property) for Cypher.
///
/// Derived names come from free-form CSV headers, so they are always
/// backtick-quoted with embedded backticks doubled.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}
