//! `stowage import`: walk files on disk into the local repository.
//!
//! Rows are keyed by the path of each file relative to its import root.
//! Bytes move through a flush hook, so the catalog commits before any
//! source file is touched; an interrupted import leaves every unrecorded
//! file at its original path for the next run to find.

use exn::ResultExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stowage_catalog::TableRow;
use stowage_config::Repo;
use stowage_keys::FileKey;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::cli::ImportArgs;
use crate::commands::App;
use crate::error::{ErrorKind, Result};

pub async fn run(app: &App, args: ImportArgs) -> Result<()> {
    if !args.r#move && !args.copy {
        exn::bail!(ErrorKind::Usage("specify either --move or --copy".into()))
    }

    let repo = Arc::new(app.open_repo(None).await?);
    let dolt = app.open_dolt().await?;
    let mut dataset = app
        .open_dataset(dolt, &args.dataset, &repo, app.batch_size(args.batch_size))
        .await?;

    // Files whose rows are committed but whose bytes have not moved yet.
    let staged: Arc<Mutex<Vec<(PathBuf, FileKey)>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let table = dataset.table_mut(&args.table_name).ok_or_else(|| {
            ErrorKind::Usage(format!("no table '{}' in dataset", args.table_name))
        })?;
        let staged = staged.clone();
        let repo = repo.clone();
        let remove_source = args.r#move;
        table.add_flush_hook(Box::new(move || {
            let staged = staged.clone();
            let repo = repo.clone();
            Box::pin(async move {
                let pending = std::mem::take(&mut *staged.lock().await);
                for (path, key) in pending {
                    store_file(&repo, &path, &key, remove_source)
                        .await
                        .map_err(|err| err.to_string())?;
                }
                Ok(())
            })
        }));
    }

    let mut imported = 0usize;
    for root in &args.paths {
        let files = collect_files(root).await?;
        for path in files {
            let key =
                repo.key_format.from_file(&path, None).await.or_raise(|| ErrorKind::Io)?;
            let row = relative_row(root, &path);
            let table = dataset.table_mut(&args.table_name).ok_or_else(|| {
                ErrorKind::Usage(format!("no table '{}' in dataset", args.table_name))
            })?;
            if table.has_row(&repo.uuid, &row).await.or_raise(|| ErrorKind::Catalog)? {
                debug!(path = %path.display(), "already imported, skipping");
                continue;
            }
            staged.lock().await.push((path, key.clone()));
            table
                .insert_file_source(row, key, repo.uuid)
                .await
                .or_raise(|| ErrorKind::Catalog)?;
            imported += 1;
        }
    }
    dataset.flush().await.or_raise(|| ErrorKind::Catalog)?;
    repo.close().await.or_raise(|| ErrorKind::Store)?;

    println!("Imported {imported} files into dataset '{}'", args.dataset);
    Ok(())
}

/// Copy the bytes in, then (for `--move`) remove the source only after the
/// destination verifiably holds the key.
async fn store_file(
    repo: &Repo,
    path: &Path,
    key: &FileKey,
    remove_source: bool,
) -> stowage_store::error::Result<()> {
    match repo.store.put_file_object(open_reader(path).await?, key).await {
        Ok(()) => {}
        // Content addressing: the bytes are already there, by this key.
        Err(err) if err.is_already_exists() => {
            debug!(%key, "filestore already holds this payload")
        }
        Err(err) => return Err(err),
    }
    if remove_source {
        if repo.store.exists(key).await? {
            tokio::fs::remove_file(path)
                .await
                .map_err(stowage_store::error::ErrorKind::Io)?;
        } else {
            warn!(%key, "destination does not report the key; keeping the source file");
        }
    }
    Ok(())
}

async fn open_reader(path: &Path) -> stowage_store::error::Result<stowage_store::ByteStream> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(stowage_store::error::ErrorKind::Io)?;
    Ok(Box::pin(file))
}

/// Key columns for a file: its path relative to the import root.
fn relative_row(root: &Path, path: &Path) -> TableRow {
    let relative = path.strip_prefix(root).unwrap_or(path);
    TableRow::new(vec![relative.to_string_lossy().into_owned()])
}

/// Regular files under `root`, depth first. Symlinks are skipped.
async fn collect_files(root: &Path) -> Result<Vec<PathBuf>> {
    let metadata = tokio::fs::symlink_metadata(root).await.or_raise(|| ErrorKind::Io)?;
    if metadata.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }
    let mut files = Vec::new();
    let mut directories = vec![root.to_path_buf()];
    while let Some(dir) = directories.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await.or_raise(|| ErrorKind::Io)?;
        while let Some(entry) = entries.next_entry().await.or_raise(|| ErrorKind::Io)? {
            let path = entry.path();
            let file_type = entry.file_type().await.or_raise(|| ErrorKind::Io)?;
            if file_type.is_dir() {
                directories.push(path);
            } else if file_type.is_file() {
                files.push(path);
            }
            // Symlinks are skipped.
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_files_recurses_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("b")).await.unwrap();
        tokio::fs::write(dir.path().join("b/two"), b"2").await.unwrap();
        tokio::fs::write(dir.path().join("a-one"), b"1").await.unwrap();

        let files = collect_files(dir.path()).await.unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a-one"));
        assert!(files[1].ends_with("b/two"));
    }

    #[test]
    fn test_relative_row() {
        let row = relative_row(Path::new("/import"), Path::new("/import/a/b.txt"));
        assert_eq!(row.cells(), ["a/b.txt"]);
    }
}
