//! Tabular-to-graph projection.
//!
//! A [`ProjectionRule`] names three column sets: one for the source node,
//! one for the target node, one for the relationship. [`project`] turns
//! every row of the matching table (or of the join of the matching tables)
//! into one [`ProjectedEdge`].
//!
//! # Algorithm
//!
//! | Step | What happens |
//! |------|--------------|
//! | validate | at least one rule and one table; labels and node columns non-empty |
//! | resolve  | each spec with columns is resolved independently (first match wins) |
//! | single   | all specs hit the same table: iterate its rows directly |
//! | join     | otherwise group specs per table and join source → target → relationship |
//! | emit     | per row, one record per spec, each fingerprinted on its own |
//!
//! The engine never deduplicates: two identical rows give two identical
//! edges, and the writer's merge collapses them.
//!
//! Any error aborts the whole projection. No partial edge list is returned.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ProjectionError;
use crate::fingerprint::element_id;
use crate::resolve::{find_table, join, JoinKind};
use crate::table::{Table, TableSet, Value};

/// Label plus the ordered source columns of one graph element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphElementSpec {
    pub label: String,
    #[serde(alias = "properties", default)]
    pub columns: Vec<String>,
}

impl GraphElementSpec {
    pub fn new<S: Into<String>>(label: impl Into<String>, columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            label: label.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }
}

/// Source node, target node and relationship specs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionRule {
    pub source: GraphElementSpec,
    pub target: GraphElementSpec,
    #[serde(alias = "rels")]
    pub relationship: GraphElementSpec,
}

impl ProjectionRule {
    /// Check labels and column lists. `index` is only used in the error.
    pub fn validate(&self, index: usize) -> Result<(), ProjectionError> {
        let invalid = |reason: String| ProjectionError::InvalidRule { index, reason };
        for (role, spec) in [
            ("source", &self.source),
            ("target", &self.target),
            ("relationship", &self.relationship),
        ] {
            if spec.label.trim().is_empty() {
                return Err(invalid(format!("{} label is empty", role)));
            }
            if spec.columns.iter().any(|c| c.is_empty()) {
                return Err(invalid(format!("{} has an empty column name", role)));
            }
        }
        if self.source.columns.is_empty() {
            return Err(invalid("source needs at least one column".to_string()));
        }
        if self.target.columns.is_empty() {
            return Err(invalid("target needs at least one column".to_string()));
        }
        Ok(())
    }

    fn specs(&self) -> [&GraphElementSpec; 3] {
        [&self.source, &self.target, &self.relationship]
    }
}

/// One node or relationship instance derived from a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphElementRecord {
    pub label: String,
    /// The spec's columns, in spec order.
    pub properties: IndexMap<String, Value>,
    /// Content fingerprint of `label` and `properties`.
    pub id: String,
}

impl GraphElementRecord {
    pub fn new(label: impl Into<String>, properties: IndexMap<String, Value>) -> Self {
        let label = label.into();
        let id = element_id(&label, &properties);
        Self {
            label,
            properties,
            id,
        }
    }
}

/// One projected row: source node, target node and the relationship between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedEdge {
    pub source: GraphElementRecord,
    pub target: GraphElementRecord,
    pub relationship: GraphElementRecord,
}

/// Project `tables` through `rules` using inner joins.
pub fn project(
    rules: &[ProjectionRule],
    tables: &TableSet,
) -> Result<Vec<ProjectedEdge>, ProjectionError> {
    project_with(rules, tables, JoinKind::Inner)
}

/// Project `tables` through `rules`, joining multi-table rules with `kind`.
pub fn project_with(
    rules: &[ProjectionRule],
    tables: &TableSet,
    kind: JoinKind,
) -> Result<Vec<ProjectedEdge>, ProjectionError> {
    if rules.is_empty() {
        return Err(ProjectionError::EmptyInput("projection rule"));
    }
    if tables.is_empty() {
        return Err(ProjectionError::EmptyInput("table"));
    }
    for (i, rule) in rules.iter().enumerate() {
        rule.validate(i)?;
    }

    let mut edges = Vec::new();
    for (i, rule) in rules.iter().enumerate() {
        let rows = unified_rows(rule, tables, kind)?;
        tracing::debug!(
            rule = i,
            table = rows.name(),
            rows = rows.row_count(),
            "projecting rule"
        );
        edges.reserve(rows.row_count());
        for row in 0..rows.row_count() {
            edges.push(ProjectedEdge {
                source: element(&rule.source, &rows, row),
                target: element(&rule.target, &rows, row),
                relationship: element(&rule.relationship, &rows, row),
            });
        }
    }
    Ok(edges)
}

/// Resolve the rule's specs and produce one table holding every column any
/// spec needs, one row per edge.
fn unified_rows(
    rule: &ProjectionRule,
    tables: &TableSet,
    kind: JoinKind,
) -> Result<Table, ProjectionError> {
    // (table name, union of spec columns), in source → target → relationship order.
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for spec in rule.specs() {
        if spec.columns.is_empty() {
            continue;
        }
        let resolved = find_table(tables, &spec.columns)?;
        let pos = match groups.iter().position(|(n, _)| *n == resolved.table_name) {
            Some(pos) => pos,
            None => {
                groups.push((resolved.table_name, Vec::new()));
                groups.len() - 1
            }
        };
        let group = &mut groups[pos].1;
        for c in &spec.columns {
            if !group.contains(c) {
                group.push(c.clone());
            }
        }
    }

    let mut narrowed = groups
        .iter()
        .filter_map(|(name, cols)| tables.get(name).map(|t| t.select(cols)));
    let Some(mut acc) = narrowed.next() else {
        // Unreachable after validation: the source spec always has columns.
        return Err(ProjectionError::EmptyInput("column"));
    };
    for next in narrowed {
        acc = join(&acc, &next, kind)?;
    }
    Ok(acc)
}

fn element(spec: &GraphElementSpec, rows: &Table, row: usize) -> GraphElementRecord {
    let properties = spec
        .columns
        .iter()
        .map(|c| {
            let v = rows.value(row, c).cloned().unwrap_or(Value::Null);
            (c.clone(), v)
        })
        .collect();
    GraphElementRecord::new(spec.label.clone(), properties)
}
