//! `stowage read-table`: print the rows a repository asserts for a table.

use exn::ResultExt;

use crate::cli::ReadTableArgs;
use crate::commands::App;
use crate::error::{ErrorKind, Result};

pub async fn run(app: &App, args: ReadTableArgs) -> Result<()> {
    let repo = app.open_repo(args.repo.as_deref()).await?;
    let dolt = app.open_dolt().await?;
    let dataset = app.open_dataset(dolt, &args.dataset, &repo, app.batch_size(None)).await?;

    let table = dataset
        .table(&args.table_name)
        .ok_or_else(|| ErrorKind::Usage(format!("no table '{}' in dataset", args.table_name)))?;
    let rows =
        table.get_rows(&repo.uuid, &args.filters).await.or_raise(|| ErrorKind::Catalog)?;
    for (key, row) in rows {
        println!("{}, {key}", row.cells().join(", "));
    }
    repo.close().await.or_raise(|| ErrorKind::Store)?;
    Ok(())
}
