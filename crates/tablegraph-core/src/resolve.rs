//! Column resolution and content-equality joins.
//!
//! [`find_table`] locates the first table (in [`TableSet`] insertion order)
//! that carries every requested column. It deliberately does not look for
//! the "best" table or split a column set across tables: first match wins.
//!
//! [`join`] combines two tables on the full set of column names they share.
//! Rows are emitted in right-hand order, each followed by its left-hand
//! matches in left-hand order, so output is deterministic.

use std::collections::HashMap;

use crate::error::ProjectionError;
use crate::fingerprint::join_key;
use crate::table::{Table, TableSet, Value};

/// How [`join`] treats right-hand rows without a left-hand match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    /// Keep matched pairs only.
    #[default]
    Inner,
    /// Keep every right-hand row; left-only columns become null when unmatched.
    Right,
}

impl std::str::FromStr for JoinKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inner" => Ok(JoinKind::Inner),
            "right" => Ok(JoinKind::Right),
            other => Err(format!("unknown join kind '{}' (expected inner or right)", other)),
        }
    }
}

/// A table located by [`find_table`], narrowed to the requested columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    /// Name of the underlying table in the set.
    pub table_name: String,
    pub table: Table,
}

/// Return the first table whose columns are a superset of `required`,
/// narrowed to exactly `required` in the requested order.
///
/// An empty `required` matches the first table (zero columns, same row
/// count).
pub fn find_table<S: AsRef<str>>(
    tables: &TableSet,
    required: &[S],
) -> Result<Resolved, ProjectionError> {
    for (name, table) in tables {
        if table.has_columns(required) {
            return Ok(Resolved {
                table_name: name.clone(),
                table: table.select(required),
            });
        }
    }

    let mut columns: Vec<String> = Vec::with_capacity(required.len());
    for c in required {
        if !columns.iter().any(|x| x == c.as_ref()) {
            columns.push(c.as_ref().to_string());
        }
    }
    let missing = columns
        .iter()
        .filter(|c| tables.values().all(|t| t.column_index(c).is_none()))
        .cloned()
        .collect();
    Err(ProjectionError::ColumnsNotFound { columns, missing })
}

/// Join `left` and `right` on every column name they share.
///
/// Output columns are the left columns followed by the right-only columns.
/// `Null` never equals anything, including another `Null`.
pub fn join(left: &Table, right: &Table, kind: JoinKind) -> Result<Table, ProjectionError> {
    let shared: Vec<&String> = left
        .columns()
        .iter()
        .filter(|c| right.column_index(c).is_some())
        .collect();
    if shared.is_empty() {
        return Err(ProjectionError::NoSharedColumns {
            left: left.name().to_string(),
            right: right.name().to_string(),
        });
    }

    let left_key_idx: Vec<usize> = shared
        .iter()
        .filter_map(|c| left.column_index(c))
        .collect();
    let right_key_idx: Vec<usize> = shared
        .iter()
        .filter_map(|c| right.column_index(c))
        .collect();

    let mut index: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, row) in left.rows().iter().enumerate() {
        let parts: Vec<&Value> = left_key_idx.iter().map(|&k| &row[k]).collect();
        if let Some(key) = join_key(&parts) {
            index.entry(key).or_default().push(i);
        }
    }

    // For each left column: its index in the right table when shared.
    let left_in_right: Vec<Option<usize>> = left
        .columns()
        .iter()
        .map(|c| right.column_index(c))
        .collect();
    let right_only: Vec<usize> = right
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, c)| left.column_index(c).is_none())
        .map(|(i, _)| i)
        .collect();

    let mut columns: Vec<String> = left.columns().to_vec();
    columns.extend(right_only.iter().map(|&i| right.columns()[i].clone()));

    let mut rows = Vec::new();
    for rrow in right.rows() {
        let parts: Vec<&Value> = right_key_idx.iter().map(|&k| &rrow[k]).collect();
        let matches = join_key(&parts).and_then(|k| index.get(&k));
        match matches {
            Some(lefts) => {
                for &li in lefts {
                    let mut row = left.rows()[li].clone();
                    row.extend(right_only.iter().map(|&i| rrow[i].clone()));
                    rows.push(row);
                }
            }
            None if kind == JoinKind::Right => {
                let mut row: Vec<Value> = left_in_right
                    .iter()
                    .map(|r| r.map(|i| rrow[i].clone()).unwrap_or(Value::Null))
                    .collect();
                row.extend(right_only.iter().map(|&i| rrow[i].clone()));
                rows.push(row);
            }
            None => {}
        }
    }

    Ok(Table::from_parts(
        format!("{}+{}", left.name(), right.name()),
        columns,
        rows,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, cols: &[&str], rows: Vec<Vec<Value>>) -> Table {
        Table::new(name, cols.iter().map(|c| c.to_string()).collect(), rows).unwrap()
    }

    fn set(tables: Vec<Table>) -> TableSet {
        tables
            .into_iter()
            .map(|t| (t.name().to_string(), t))
            .collect()
    }

    fn sample() -> TableSet {
        set(vec![
            table(
                "people",
                &["id", "name"],
                vec![
                    vec![Value::Int(1), "John".into()],
                    vec![Value::Int(2), "Jane".into()],
                ],
            ),
            table(
                "places",
                &["id", "city", "name"],
                vec![
                    vec![Value::Int(1), "NYC".into(), "home".into()],
                    vec![Value::Int(3), "LA".into(), "work".into()],
                ],
            ),
        ])
    }

    #[test]
    fn test_first_matching_table_wins() {
        let r = find_table(&sample(), &["name", "id"]).unwrap();
        assert_eq!(r.table_name, "people");
        assert_eq!(r.table.columns(), &["name".to_string(), "id".to_string()]);
    }

    #[test]
    fn test_falls_through_to_later_table() {
        let r = find_table(&sample(), &["city"]).unwrap();
        assert_eq!(r.table_name, "places");
        assert_eq!(r.table.row_count(), 2);
    }

    #[test]
    fn test_empty_requirement_matches_first_table() {
        let r = find_table::<&str>(&sample(), &[]).unwrap();
        assert_eq!(r.table_name, "people");
        assert!(r.table.columns().is_empty());
        assert_eq!(r.table.row_count(), 2);
    }

    #[test]
    fn test_missing_columns_are_named() {
        let err = find_table(&sample(), &["city", "salary", "name"]).unwrap_err();
        match err {
            ProjectionError::ColumnsNotFound { columns, missing } => {
                assert_eq!(columns, vec!["city", "salary", "name"]);
                assert_eq!(missing, vec!["salary"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_inner_join_drops_unmatched() {
        let s = sample();
        let left = s["people"].select(&["id", "name"]);
        let right = s["places"].select(&["id", "city"]);
        let joined = join(&left, &right, JoinKind::Inner).unwrap();
        assert_eq!(
            joined.columns(),
            &["id".to_string(), "name".to_string(), "city".to_string()]
        );
        assert_eq!(joined.row_count(), 1);
        assert_eq!(
            joined.rows()[0],
            vec![Value::Int(1), "John".into(), "NYC".into()]
        );
    }

    #[test]
    fn test_right_join_keeps_unmatched_right_rows() {
        let s = sample();
        let left = s["people"].select(&["id", "name"]);
        let right = s["places"].select(&["id", "city"]);
        let joined = join(&left, &right, JoinKind::Right).unwrap();
        assert_eq!(joined.row_count(), 2);
        assert_eq!(
            joined.rows()[1],
            vec![Value::Int(3), Value::Null, "LA".into()]
        );
    }

    #[test]
    fn test_join_uses_every_shared_column() {
        let s = sample();
        // Both `id` and `name` are shared, and no row agrees on both.
        let joined = join(&s["people"], &s["places"], JoinKind::Inner).unwrap();
        assert_eq!(joined.row_count(), 0);
    }

    #[test]
    fn test_null_keys_never_match() {
        let a = table("a", &["k", "x"], vec![vec![Value::Null, Value::Int(1)]]);
        let b = table("b", &["k", "y"], vec![vec![Value::Null, Value::Int(2)]]);
        assert_eq!(join(&a, &b, JoinKind::Inner).unwrap().row_count(), 0);
    }

    #[test]
    fn test_no_shared_columns() {
        let a = table("a", &["x"], vec![]);
        let b = table("b", &["y"], vec![]);
        assert!(matches!(
            join(&a, &b, JoinKind::Inner),
            Err(ProjectionError::NoSharedColumns { .. })
        ));
    }

    #[test]
    fn test_parse_join_kind() {
        assert_eq!("RIGHT".parse::<JoinKind>().unwrap(), JoinKind::Right);
        assert!("outer".parse::<JoinKind>().is_err());
    }
}
