//! `stowage push` / `pull` / `sync`: move files between repositories.

use exn::ResultExt;
use stowage_config::Repo;
use tokio_util::sync::CancellationToken;

use crate::cli::MoveArgs;
use crate::commands::App;
use crate::error::{ErrorKind, Result};

struct MoveContext {
    local: Repo,
    remote: Repo,
    dataset: stowage_catalog::Dataset,
    cancel: CancellationToken,
    page_size: usize,
}

async fn open(app: &App, args: &MoveArgs) -> Result<MoveContext> {
    let local = app.open_repo(None).await?;
    let remote = app.open_repo(Some(&args.remote)).await?;
    let dolt = app.open_dolt().await?;
    let page_size = app.batch_size(args.batch_size);
    let dataset = app.open_dataset(dolt, &args.dataset, &local, page_size).await?;

    // Ctrl-C stops the loop between pages; completed pages stay moved.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    Ok(MoveContext { local, remote, dataset, cancel, page_size })
}

async fn close(context: MoveContext) -> Result<()> {
    context.local.close().await.or_raise(|| ErrorKind::Store)?;
    context.remote.close().await.or_raise(|| ErrorKind::Store)?;
    Ok(())
}

pub async fn push(app: &App, args: MoveArgs) -> Result<()> {
    let mut context = open(app, &args).await?;
    let pushed = stowage_sync::push_dataset(
        &mut context.dataset,
        &context.local,
        &context.remote,
        &args.filters,
        args.limit,
        context.page_size,
        &context.cancel,
    )
    .await
    .or_raise(|| ErrorKind::Sync)?;
    println!("Pushed {} files to remote {}", pushed.len(), args.remote);
    close(context).await
}

pub async fn pull(app: &App, args: MoveArgs) -> Result<()> {
    let mut context = open(app, &args).await?;
    let pulled = stowage_sync::pull_dataset(
        &mut context.dataset,
        &context.local,
        &context.remote,
        &args.filters,
        args.limit,
        context.page_size,
        &context.cancel,
    )
    .await
    .or_raise(|| ErrorKind::Sync)?;
    println!("Pulled {} files from remote {}", pulled.len(), args.remote);
    close(context).await
}

pub async fn sync(app: &App, args: MoveArgs) -> Result<()> {
    let mut context = open(app, &args).await?;
    let outcome = stowage_sync::sync_dataset(
        &mut context.dataset,
        &context.local,
        &context.remote,
        &args.filters,
        args.limit,
        context.page_size,
        &context.cancel,
    )
    .await
    .or_raise(|| ErrorKind::Sync)?;
    println!("Pushed {} files to remote {}", outcome.pushed.len(), args.remote);
    println!("Pulled {} files from remote {}", outcome.pulled.len(), args.remote);
    close(context).await
}
