//! Header classification into core and dynamic columns.
//!
//! Done once per file: every row is then read through the same
//! [`ColumnSchema`], so the graph shape cannot drift between rows.

use crate::error::ValidationError;
use crate::ingest::loader::find_column;
use crate::ingest::naming::{GraphNaming, NamingCache};
use crate::neo4j::ISSUE_LABEL;
use crate::IngestConfig;
use serde::Serialize;
use std::collections::BTreeSet;

/// A static scalar attribute and where it lives in the header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScalarBinding {
    /// `None` when the export does not carry the column at all
    pub index: Option<usize>,
    pub column: String,
    pub property: String,
}

/// A column whose cells become satellite nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DynamicColumn {
    pub index: usize,
    pub name: String,
    #[serde(flatten)]
    pub naming: GraphNaming,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnSchema {
    pub key: usize,
    pub summary: usize,
    pub description: usize,
    pub scalars: Vec<ScalarBinding>,
    /// In header order; duplicated header names appear once per occurrence
    pub dynamic: Vec<DynamicColumn>,
    /// Non-static columns whose name yields no usable label
    pub ignored: Vec<String>,
}

impl ColumnSchema {
    /// Partition `columns` using the configured static set.
    pub fn classify(columns: &[String], config: &IngestConfig) -> Result<Self, ValidationError> {
        let names = &config.columns;
        let required = |name: &String| {
            find_column(columns, name).ok_or_else(|| ValidationError::MissingColumn(name.clone()))
        };
        let key = required(&names.key)?;
        let summary = required(&names.summary)?;
        let description = required(&names.description)?;

        let scalars: Vec<ScalarBinding> = names
            .scalars
            .iter()
            .map(|s| ScalarBinding {
                index: find_column(columns, &s.column),
                column: s.column.clone(),
                property: s.property.clone(),
            })
            .collect();

        let static_names: Vec<&str> = [&names.key, &names.summary, &names.description]
            .into_iter()
            .chain(names.scalars.iter().map(|s| &s.column))
            .chain(config.extra_static_columns.iter())
            .map(|s| s.trim())
            .collect();
        let is_static = |column: &str| {
            static_names
                .iter()
                .any(|s| *s == column || s.eq_ignore_ascii_case(column))
        };

        let mut cache = NamingCache::new();
        let mut dynamic = Vec::new();
        let mut ignored = Vec::new();
        for (index, name) in columns.iter().enumerate() {
            if is_static(name) {
                continue;
            }
            let naming = cache.get_or_derive(name);
            if !naming.is_usable() {
                tracing::warn!(column = %name, "Ignoring column: no usable label can be derived");
                ignored.push(name.clone());
                continue;
            }
            if naming.label == ISSUE_LABEL {
                tracing::warn!(column = %name, "Ignoring column: its label would collide with issue nodes");
                ignored.push(name.clone());
                continue;
            }
            dynamic.push(DynamicColumn {
                index,
                name: name.clone(),
                naming,
            });
        }

        tracing::debug!(
            dynamic = dynamic.len(),
            distinct_namings = cache.len(),
            ignored = ignored.len(),
            "Classified header"
        );

        Ok(Self {
            key,
            summary,
            description,
            scalars,
            dynamic,
            ignored,
        })
    }

    /// Names of the core columns present in the header.
    pub fn core_columns<'a>(&self, columns: &'a [String]) -> Vec<&'a str> {
        [Some(self.key), Some(self.summary), Some(self.description)]
            .into_iter()
            .chain(self.scalars.iter().map(|s| s.index))
            .flatten()
            .filter_map(|idx| columns.get(idx).map(String::as_str))
            .collect()
    }

    /// Distinct satellite namings, sorted.
    pub fn namings(&self) -> BTreeSet<&GraphNaming> {
        self.dynamic.iter().map(|d| &d.naming).collect()
    }

    /// Distinct satellite labels, sorted.
    pub fn satellite_labels(&self) -> BTreeSet<&str> {
        self.dynamic.iter().map(|d| d.naming.label.as_str()).collect()
    }
}
