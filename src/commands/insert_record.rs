//! `stowage insert-record`: insert one record into the catalog and the
//! filestore. Primarily used for testing.

use exn::ResultExt;
use stowage_catalog::TableRow;

use crate::cli::InsertRecordArgs;
use crate::commands::App;
use crate::error::{ErrorKind, Result};

pub async fn run(app: &App, args: InsertRecordArgs) -> Result<()> {
    let repo = app.open_repo(args.repo.as_deref()).await?;
    let dolt = app.open_dolt().await?;
    let mut dataset =
        app.open_dataset(dolt, &args.dataset, &repo, app.batch_size(None)).await?;

    let extension = (!args.extension.is_empty()).then_some(args.extension.as_str());
    let file_bytes = args.file_bytes.clone().into_bytes();
    let key = repo.key_format.from_bytes(&file_bytes, extension);
    let row: TableRow = args.key_columns.split(',').collect();

    let table = dataset
        .table_mut(&args.table_name)
        .ok_or_else(|| ErrorKind::Usage(format!("no table '{}' in dataset", args.table_name)))?;
    table
        .insert_file_source(row, key.clone(), repo.uuid)
        .await
        .or_raise(|| ErrorKind::Catalog)?;
    let mut cas = repo.cas();
    cas.put_file_bytes(file_bytes, Some(key.clone())).await.or_raise(|| ErrorKind::Store)?;
    dataset.flush().await.or_raise(|| ErrorKind::Catalog)?;
    repo.close().await.or_raise(|| ErrorKind::Store)?;

    println!(
        "Inserted row ({}, {key}) into table '{}' in dataset '{}'",
        args.key_columns.split(',').collect::<Vec<_>>().join(", "),
        args.table_name,
        args.dataset,
    );
    Ok(())
}
