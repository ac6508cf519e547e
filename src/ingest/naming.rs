//! Column name → (node label, relationship type) derivation.
//!
//! The convention is deliberately mechanical so the same header always maps
//! to the same graph vocabulary:
//!
//! | column          | label         | relationship    |
//! |-----------------|---------------|-----------------|
//! | `Assignee`      | `Assignee`    | `ASSIGNEE`      |
//! | `Labels`        | `Label`       | `LABEL`         |
//! | `Fix versions`  | `FixVersion`  | `FIX_VERSION`   |
//! | `Status`        | `Statu`       | `STATU`         |
//!
//! Singularization only strips one trailing `s`, so already-singular names
//! ending in `s` (`Status`, `Progress`) lose a letter. This is a known
//! defect of the convention and is kept so existing graphs stay addressable.

use serde::Serialize;
use std::collections::HashMap;

/// Graph vocabulary derived from one dynamic column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GraphNaming {
    /// Label of the satellite nodes
    pub label: String,
    /// Type of the Issue → satellite relationships
    pub relationship: String,
}

impl GraphNaming {
    /// Both parts are non-empty and therefore usable in Cypher.
    pub fn is_usable(&self) -> bool {
        !self.label.is_empty() && !self.relationship.is_empty()
    }
}

/// Title-case one token: first character upper, the rest lower.
fn title_case(token: &str) -> String {
    let mut chars = token.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(|c| c.to_lowercase()))
            .collect(),
    }
}

/// Derive the satellite label and relationship type for a column name.
///
/// - label: strip one trailing `s`, split on space/underscore, title-case
///   each token and concatenate
/// - relationship: upper-case, spaces to underscores, strip one trailing `S`
pub fn derive_naming(column: &str) -> GraphNaming {
    let singular = column.strip_suffix('s').unwrap_or(column);
    let label: String = singular
        .split([' ', '_'])
        .map(title_case)
        .collect();

    let upper = column.to_uppercase().replace(' ', "_");
    let relationship = upper.strip_suffix('S').unwrap_or(&upper).to_string();

    GraphNaming {
        label,
        relationship,
    }
}

/// Memoized [`derive_naming`], filled once while classifying the header.
#[derive(Debug, Default, Clone)]
pub struct NamingCache {
    entries: HashMap<String, GraphNaming>,
}

impl NamingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_derive(&mut self, column: &str) -> GraphNaming {
        self.entries
            .entry(column.to_string())
            .or_insert_with(|| derive_naming(column))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
