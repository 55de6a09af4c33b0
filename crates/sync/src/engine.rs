//! The diff-and-move loop.

use exn::ResultExt;
use sqlx::Row;
use stowage_catalog::{
    Dataset, DoltHandle, FileTable, TableFilter, TableRow, TableSchema, repo_branch, union_branch,
};
use stowage_config::Repo;
use stowage_keys::FileKey;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, Result};

/// What a bidirectional sync moved.
#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub pushed: Vec<FileKey>,
    pub pulled: Vec<FileKey>,
}

impl SyncOutcome {
    pub fn is_empty(&self) -> bool {
        self.pushed.is_empty() && self.pulled.is_empty()
    }

    pub fn total(&self) -> usize {
        self.pushed.len() + self.pulled.len()
    }
}

/// Move every file `from` has and `to` lacks, one page at a time.
///
/// Returns the keys moved. Honors `cancel` between pages; a cancelled sync
/// has completed some whole pages and is safe to re-run.
pub async fn move_table(
    table: &mut FileTable,
    from: &Repo,
    to: &Repo,
    filters: &[TableFilter],
    limit: Option<usize>,
    page_size: usize,
    cancel: &CancellationToken,
) -> Result<Vec<FileKey>> {
    let dataset_name = table.dataset_name().to_string();
    let from_branch = repo_branch(&from.uuid, &dataset_name);
    let to_branch = repo_branch(&to.uuid, &dataset_name);
    let union = union_branch(&from.uuid, &to.uuid, &dataset_name);

    let mut moved = Vec::new();
    let mut retries = 0;
    loop {
        if cancel.is_cancelled() {
            info!(table = %table.schema().name, moved = moved.len(), "sync cancelled between pages");
            break;
        }
        let page_limit = match limit {
            Some(limit) if moved.len() >= limit => break,
            Some(limit) => page_size.min(limit - moved.len()),
            None => page_size,
        };
        let page = diff_page(
            table.dolt().clone(),
            table.schema(),
            &from_branch,
            &to_branch,
            &union,
            filters,
            page_limit,
        )
        .await?;
        if page.is_empty() {
            break;
        }

        match transfer_page(table, from, to, page, &mut moved).await {
            Ok(()) => {
                retries = 0;
                table.flush().await.or_raise(|| ErrorKind::Catalog)?;
            }
            // Transient filestore failures are retried at the page
            // boundary: commit what this page managed, re-query the diff
            // (completed items drop out of it), and go again.
            Err(err) if err.is_retryable() && retries < MAX_PAGE_RETRIES => {
                retries += 1;
                warn!(attempt = retries, "transient failure, re-querying the diff: {err}");
                table.flush().await.or_raise(|| ErrorKind::Catalog)?;
            }
            Err(err) => return Err(err.raise(ErrorKind::Store)),
        }
    }
    Ok(moved)
}

const MAX_PAGE_RETRIES: u32 = 3;

/// Transfer one page of diff rows, recording each moved key as the
/// destination's catalog row is buffered.
async fn transfer_page(
    table: &mut FileTable,
    from: &Repo,
    to: &Repo,
    page: Vec<(FileKey, TableRow)>,
    moved: &mut Vec<FileKey>,
) -> stowage_store::error::Result<()> {
    for (key, row) in page {
        debug!(%key, %row, "moving file");
        let reader = from.store.get_file_object(&key).await?;
        match to.store.put_file_object(reader, &key).await {
            Ok(()) => {}
            // The destination already holds these bytes (content addressing
            // guarantees they are the same bytes); only the catalog row was
            // missing.
            Err(err) if err.is_already_exists() => {
                debug!(%key, "destination already holds the payload")
            }
            Err(err) => return Err(err),
        }
        table
            .insert_file_source(row, key.clone(), to.uuid)
            .await
            .map_err(|err| err.raise(stowage_store::error::ErrorKind::Backend("catalog write during transfer".into())))?;
        moved.push(key);
    }
    Ok(())
}

/// One page of `added` diff rows between `to_branch` and the union branch.
///
/// The union branch is created from `from_branch` on first use and then
/// re-merged with both sides; it only accumulates rows, so it is reused by
/// every subsequent sync between this pair of repositories.
async fn diff_page(
    dolt: DoltHandle,
    schema: &TableSchema,
    from_branch: &str,
    to_branch: &str,
    union: &str,
    filters: &[TableFilter],
    page_limit: usize,
) -> Result<Vec<(FileKey, TableRow)>> {
    let mut dolt = dolt.lock().await;
    dolt.maybe_create_branch(union, from_branch).await.or_raise(|| ErrorKind::Catalog)?;
    let previous = dolt.active_branch().await.or_raise(|| ErrorKind::Catalog)?;
    dolt.checkout(union).await.or_raise(|| ErrorKind::Catalog)?;

    let queried = async {
        dolt.merge(from_branch).await.or_raise(|| ErrorKind::Catalog)?;
        dolt.merge(to_branch).await.or_raise(|| ErrorKind::Catalog)?;

        let sql = schema.diff_sql(filters, Some(page_limit));
        let mut params = vec![to_branch, union];
        params.extend(filters.iter().map(|filter| filter.value.as_str()));
        dolt.query(&sql, &params).await.or_raise(|| ErrorKind::Catalog)
    }
    .await;
    dolt.checkout(&previous).await.or_raise(|| ErrorKind::Catalog)?;
    let rows = queried?;

    let mut page = Vec::with_capacity(rows.len());
    for row in rows {
        let key: String = row.try_get(0).map_err(|_| ErrorKind::Diff("file column"))?;
        let key = FileKey::from_raw(key);
        let diff_type: String = row.try_get(1).map_err(|_| ErrorKind::Diff("diff_type"))?;
        match diff_type.as_str() {
            "added" => {}
            // The same logical item with two different payloads: a broken
            // invariant, not something to paper over.
            "modified" => exn::bail!(ErrorKind::ModifiedConflict(key)),
            _ => continue,
        }
        let mut cells = Vec::with_capacity(schema.key_columns.len());
        for index in 0..schema.key_columns.len() {
            let cell: String =
                row.try_get(2 + index).map_err(|_| ErrorKind::Diff("key column"))?;
            cells.push(cell);
        }
        page.push((key, TableRow::new(cells)));
    }
    Ok(page)
}

/// Push: move every table of `dataset` from the local repository to the
/// remote one.
pub async fn push_dataset(
    dataset: &mut Dataset,
    local: &Repo,
    remote: &Repo,
    filters: &[TableFilter],
    limit: Option<usize>,
    page_size: usize,
    cancel: &CancellationToken,
) -> Result<Vec<FileKey>> {
    // The remote may never have written to this dataset; its branch has to
    // exist before it can be diffed against.
    dataset.ensure_repo_branch(&remote.uuid).await.or_raise(|| ErrorKind::Catalog)?;
    let mut pushed = Vec::new();
    for table in dataset.tables_mut() {
        let remaining = limit.map(|limit| limit.saturating_sub(pushed.len()));
        if remaining == Some(0) {
            break;
        }
        let moved = move_table(table, local, remote, filters, remaining, page_size, cancel).await?;
        pushed.extend(moved);
    }
    Ok(pushed)
}

/// Pull: move every table of `dataset` from the remote repository to the
/// local one, after refreshing the remote's catalog branch if it has a
/// catalog remote configured.
pub async fn pull_dataset(
    dataset: &mut Dataset,
    local: &Repo,
    remote: &Repo,
    filters: &[TableFilter],
    limit: Option<usize>,
    page_size: usize,
    cancel: &CancellationToken,
) -> Result<Vec<FileKey>> {
    match &remote.catalog_remote {
        Some(catalog_remote) => dataset
            .pull_from(&remote.uuid, catalog_remote)
            .await
            .or_raise(|| ErrorKind::Catalog)?,
        None => dataset.ensure_repo_branch(&remote.uuid).await.or_raise(|| ErrorKind::Catalog)?,
    }
    let mut pulled = Vec::new();
    for table in dataset.tables_mut() {
        let remaining = limit.map(|limit| limit.saturating_sub(pulled.len()));
        if remaining == Some(0) {
            break;
        }
        let moved = move_table(table, remote, local, filters, remaining, page_size, cancel).await?;
        pulled.extend(moved);
    }
    Ok(pulled)
}

/// Bidirectional sync: pull first, then push, so both sides converge on the
/// union of their catalogs.
pub async fn sync_dataset(
    dataset: &mut Dataset,
    local: &Repo,
    remote: &Repo,
    filters: &[TableFilter],
    limit: Option<usize>,
    page_size: usize,
    cancel: &CancellationToken,
) -> Result<SyncOutcome> {
    let pulled =
        pull_dataset(dataset, local, remote, filters, limit, page_size, cancel).await?;
    let pushed =
        push_dataset(dataset, local, remote, filters, limit, page_size, cancel).await?;
    Ok(SyncOutcome { pushed, pulled })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_counts() {
        let outcome = SyncOutcome::default();
        assert!(outcome.is_empty());
        let outcome = SyncOutcome {
            pushed: vec![FileKey::from_raw("SHA256E-s1--aa")],
            pulled: vec![],
        };
        assert!(!outcome.is_empty());
        assert_eq!(outcome.total(), 1);
    }
}
