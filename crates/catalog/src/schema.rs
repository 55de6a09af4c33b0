//! Schema descriptions for file tables and datasets, plus the branch-naming
//! scheme that ties repositories to catalog branches.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A table with a file column: everything needed to insert into it and to
/// diff its rows between two repositories.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub file_column: String,
    pub key_columns: Vec<String>,
}

impl TableSchema {
    /// `REPLACE INTO` statement for one row: file column first, then the key
    /// columns. Last writer wins on identical key columns.
    pub fn insert_sql(&self) -> String {
        let columns = std::iter::once(self.file_column.as_str())
            .chain(self.key_columns.iter().map(String::as_str))
            .map(|col| format!("`{col}`"))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; 1 + self.key_columns.len()].join(", ");
        format!("REPLACE INTO `{}` ({columns}) VALUES ({placeholders})", self.name)
    }

    /// Commit-diff query over this table.
    ///
    /// Generating SQL by string formatting is not injection-safe, but the
    /// schema comes from the operator's own descriptors: any query the
    /// application can run, the operator can already run directly. The
    /// limit is a number and is embedded directly.
    pub fn diff_sql(&self, filters: &[TableFilter], limit: Option<usize>) -> String {
        let key_columns = self
            .key_columns
            .iter()
            .map(|col| format!("`to_{col}`"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!(
            "SELECT `to_{file}`, `diff_type`, {key_columns} \
             FROM `dolt_commit_diff_{table}` \
             WHERE `from_commit` = HASHOF(?) AND `to_commit` = HASHOF(?)",
            file = self.file_column,
            table = self.name,
        );
        for filter in filters {
            sql.push_str(&format!(" AND `to_{}` = ?", filter.column));
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        sql
    }
}

/// One or more file tables that are version controlled together.
///
/// `empty_table_ref` names a branch holding the table definitions but no
/// rows; per-repository branches are forked from it on first write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSchema {
    pub name: String,
    pub tables: Vec<TableSchema>,
    pub empty_table_ref: String,
}

impl DatasetSchema {
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|table| table.name == name)
    }
}

/// Values for a table's key columns, positionally. Carried as text; the
/// catalog contract keys on textual columns.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TableRow(Vec<String>);

impl TableRow {
    pub fn new(cells: Vec<String>) -> Self {
        Self(cells)
    }

    pub fn cells(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for TableRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.0.join(", "))
    }
}

impl<S: Into<String>> FromIterator<S> for TableRow {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// An equality filter over one column, parsed from `column=value`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableFilter {
    pub column: String,
    pub value: String,
}

impl FromStr for TableFilter {
    type Err = String;

    fn from_str(input: &str) -> std::result::Result<Self, Self::Err> {
        let (column, value) = input
            .split_once('=')
            .ok_or_else(|| format!("invalid filter (expected column=value): {input}"))?;
        Ok(Self { column: column.to_string(), value: value.to_string() })
    }
}

/// Branch holding the rows a repository asserts for a dataset.
pub fn repo_branch(repo: &Uuid, dataset: &str) -> String {
    format!("{repo}-{dataset}")
}

/// Branch holding the union of two repositories' rows for a dataset.
///
/// The two UUIDs are ordered so both peers derive the same name; the branch
/// is created lazily on first diff and reused, since it only ever
/// accumulates rows.
pub fn union_branch(a: &Uuid, b: &Uuid, dataset: &str) -> String {
    let (low, high) = if a.to_string() <= b.to_string() { (a, b) } else { (b, a) };
    format!("union-{low}-{high}-{dataset}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> TableSchema {
        TableSchema {
            name: "submissions".to_string(),
            file_column: "file_key".to_string(),
            key_columns: vec!["source".to_string(), "id".to_string()],
        }
    }

    #[test]
    fn test_insert_sql() {
        assert_eq!(
            schema().insert_sql(),
            "REPLACE INTO `submissions` (`file_key`, `source`, `id`) VALUES (?, ?, ?)"
        );
    }

    #[test]
    fn test_diff_sql() {
        assert_eq!(
            schema().diff_sql(&[], None),
            "SELECT `to_file_key`, `diff_type`, `to_source`, `to_id` \
             FROM `dolt_commit_diff_submissions` \
             WHERE `from_commit` = HASHOF(?) AND `to_commit` = HASHOF(?)"
        );
    }

    #[test]
    fn test_diff_sql_with_filters_and_limit() {
        let filter = TableFilter::from_str("source=e621").unwrap();
        let sql = schema().diff_sql(&[filter], Some(1000));
        assert!(sql.ends_with("AND `to_source` = ? LIMIT 1000"));
    }

    #[test]
    fn test_filter_parse_rejects_missing_equals() {
        assert!(TableFilter::from_str("sourcee621").is_err());
    }

    #[test]
    fn test_union_branch_is_order_independent() {
        let a = Uuid::parse_str("3fca31d9-f0dd-424e-b0e9-3cd4a26e9d68").unwrap();
        let b = Uuid::parse_str("36b60d94-fbdf-476b-9479-f0abc61fa5ba").unwrap();
        assert_eq!(union_branch(&a, &b, "art"), union_branch(&b, &a, "art"));
        assert_eq!(
            union_branch(&a, &b, "art"),
            "union-36b60d94-fbdf-476b-9479-f0abc61fa5ba-3fca31d9-f0dd-424e-b0e9-3cd4a26e9d68-art"
        );
    }

    #[test]
    fn test_repo_branch() {
        let uuid = Uuid::parse_str("3fca31d9-f0dd-424e-b0e9-3cd4a26e9d68").unwrap();
        assert_eq!(repo_branch(&uuid, "art"), "3fca31d9-f0dd-424e-b0e9-3cd4a26e9d68-art");
    }
}
