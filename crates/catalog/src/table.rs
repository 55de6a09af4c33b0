//! Buffered catalog writes for one file table.
//!
//! Rows are buffered per source repository and written out in batches. The
//! flush order is load-bearing:
//!
//! 1. `REPLACE INTO` the per-repository branch and commit.
//! 2. Run the registered flush hooks (these move payload bytes into the
//!    filestore).
//! 3. Clear the buffer.
//!
//! If the process dies before (1), the source files are untouched and a
//! re-import finds them. If it dies between (1) and (2), the catalog claims
//! a file whose bytes are still at the source: the row is sync-eligible and
//! the bytes are still recoverable from the source path. The reverse order
//! would lose the original filename metadata the moment bytes move, which is
//! why hooks never run before the commit.

use exn::ResultExt;
use futures::future::BoxFuture;
use std::collections::HashMap;
use stowage_keys::FileKey;
use tracing::debug;
use uuid::Uuid;

use crate::db::DoltHandle;
use crate::error::{ErrorKind, Result};
use crate::schema::{TableFilter, TableRow, TableSchema, repo_branch};

/// Callback run after a catalog batch commits. Errors are strings so hooks
/// can come from any crate without a shared error type.
pub type FlushHook =
    Box<dyn Fn() -> BoxFuture<'static, std::result::Result<(), String>> + Send + Sync>;

pub struct FileTable {
    dolt: DoltHandle,
    schema: TableSchema,
    dataset_name: String,
    /// Branch that new per-repository branches fork from.
    start_point: String,
    batch_size: usize,
    count: usize,
    added_rows: HashMap<Uuid, Vec<(FileKey, TableRow)>>,
    flush_hooks: Vec<FlushHook>,
}

impl FileTable {
    pub fn new(
        dolt: DoltHandle,
        schema: TableSchema,
        dataset_name: impl Into<String>,
        start_point: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            dolt,
            schema,
            dataset_name: dataset_name.into(),
            start_point: start_point.into(),
            batch_size: batch_size.max(1),
            count: 0,
            added_rows: HashMap::new(),
            flush_hooks: Vec::new(),
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn dataset_name(&self) -> &str {
        &self.dataset_name
    }

    pub fn dolt(&self) -> &DoltHandle {
        &self.dolt
    }

    /// Register a hook to run after each catalog batch commits.
    pub fn add_flush_hook(&mut self, hook: FlushHook) {
        self.flush_hooks.push(hook);
    }

    /// Buffer one row asserting that `source` holds `key` for `row`.
    /// Flushes automatically when the batch fills.
    pub async fn insert_file_source(
        &mut self,
        row: TableRow,
        key: FileKey,
        source: Uuid,
    ) -> Result<()> {
        self.added_rows.entry(source).or_default().push((key, row));
        self.count += 1;
        if self.count >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Write all buffered rows, commit, run flush hooks, clear the buffer.
    pub async fn flush(&mut self) -> Result<()> {
        let started = std::time::Instant::now();
        let insert_sql = self.schema.insert_sql();
        {
            let mut dolt = self.dolt.lock().await;
            for (source, rows) in &self.added_rows {
                let branch = repo_branch(source, &self.dataset_name);
                dolt.maybe_create_branch(&branch, &self.start_point).await?;
                let previous = dolt.active_branch().await?;
                dolt.checkout(&branch).await?;
                let values = rows.iter().map(|(key, row)| {
                    std::iter::once(key.as_str().to_string())
                        .chain(row.cells().iter().cloned())
                        .collect::<Vec<_>>()
                });
                let written = match dolt.executemany(&insert_sql, values).await {
                    Ok(()) => dolt.commit(false).await,
                    Err(err) => Err(err),
                };
                dolt.checkout(&previous).await?;
                written?;
            }
        }

        for hook in &self.flush_hooks {
            hook().await.map_err(ErrorKind::Hook)?;
        }

        let rows = self.count;
        self.added_rows.clear();
        self.count = 0;
        debug!(
            table = %self.schema.name,
            rows,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "flushed catalog batch"
        );
        Ok(())
    }

    /// Number of rows currently buffered.
    pub fn pending(&self) -> usize {
        self.count
    }

    fn qualified_table(&self, db: &str, source: &Uuid) -> String {
        let branch = repo_branch(source, &self.dataset_name);
        format!("`{db}/{branch}`.`{}`", self.schema.name)
    }

    /// Whether `source` asserts a file for these key columns.
    pub async fn has_row(&self, source: &Uuid, row: &TableRow) -> Result<bool> {
        Ok(self.get_row(source, row).await?.is_some())
    }

    /// The file key `source` asserts for these key columns, if any.
    pub async fn get_row(&self, source: &Uuid, row: &TableRow) -> Result<Option<FileKey>> {
        use sqlx::Row;
        let mut dolt = self.dolt.lock().await;
        let conditions = self
            .schema
            .key_columns
            .iter()
            .map(|col| format!("`{col}` = ?"))
            .collect::<Vec<_>>()
            .join(" AND ");
        let sql = format!(
            "SELECT `{}` FROM {} WHERE {conditions} LIMIT 1",
            self.schema.file_column,
            self.qualified_table(dolt.database(), source),
        );
        let params: Vec<&str> = row.cells().iter().map(String::as_str).collect();
        let rows = dolt.query(&sql, &params).await?;
        match rows.first() {
            Some(found) => {
                let key: String = found.try_get(0).or_raise(|| ErrorKind::Decode("file column"))?;
                Ok(Some(FileKey::from_raw(key)))
            }
            None => Ok(None),
        }
    }

    /// All rows `source` asserts, optionally restricted by equality filters.
    pub async fn get_rows(
        &self,
        source: &Uuid,
        filters: &[TableFilter],
    ) -> Result<Vec<(FileKey, TableRow)>> {
        use sqlx::Row;
        let mut dolt = self.dolt.lock().await;
        let key_columns = self
            .schema
            .key_columns
            .iter()
            .map(|col| format!("`{col}`"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!(
            "SELECT `{}`, {key_columns} FROM {}",
            self.schema.file_column,
            self.qualified_table(dolt.database(), source),
        );
        if !filters.is_empty() {
            let conditions = filters
                .iter()
                .map(|filter| format!("`{}` = ?", filter.column))
                .collect::<Vec<_>>()
                .join(" AND ");
            sql.push_str(&format!(" WHERE {conditions}"));
        }
        let params: Vec<&str> = filters.iter().map(|filter| filter.value.as_str()).collect();
        let found = dolt.query(&sql, &params).await?;

        let mut results = Vec::with_capacity(found.len());
        for db_row in found {
            let key: String = db_row.try_get(0).or_raise(|| ErrorKind::Decode("file column"))?;
            let mut cells = Vec::with_capacity(self.schema.key_columns.len());
            for index in 1..=self.schema.key_columns.len() {
                let cell: String =
                    db_row.try_get(index).or_raise(|| ErrorKind::Decode("key column"))?;
                cells.push(cell);
            }
            results.push((FileKey::from_raw(key), TableRow::new(cells)));
        }
        Ok(results)
    }
}
