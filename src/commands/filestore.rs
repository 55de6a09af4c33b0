//! `stowage filestore`: direct filestore operations, no catalog involved.

use exn::ResultExt;
use stowage_keys::FileKey;

use crate::cli::{CopyArgs, InsertFileArgs, WhereIsArgs};
use crate::commands::App;
use crate::error::{ErrorKind, Result};

pub async fn insert_file(app: &App, args: InsertFileArgs) -> Result<()> {
    let repo = app.open_repo(args.repo.as_deref()).await?;
    let extension = (!args.extension.is_empty()).then_some(args.extension.as_str());
    let file_bytes = args.file_bytes.into_bytes();
    let key = repo.key_format.from_bytes(&file_bytes, extension);
    let mut cas = repo.cas();
    cas.put_file_bytes(file_bytes, Some(key.clone())).await.or_raise(|| ErrorKind::Store)?;
    repo.close().await.or_raise(|| ErrorKind::Store)?;
    println!("Inserted file with key {key} into filestore of repo '{}'", repo.name);
    Ok(())
}

pub async fn where_is(app: &App, args: WhereIsArgs) -> Result<()> {
    let repo = app.open_repo(Some(&args.repo)).await?;
    let key = FileKey::from_raw(args.file_key);

    let mut locations = Vec::new();
    if repo.store.exists(&key).await.or_raise(|| ErrorKind::Store)? {
        locations.push(serde_json::json!({
            "name": repo.name,
            "uuid": repo.uuid.to_string(),
        }));
    }
    repo.close().await.or_raise(|| ErrorKind::Store)?;
    println!("{}", serde_json::Value::Array(locations));
    Ok(())
}

pub async fn copy(app: &App, args: CopyArgs) -> Result<()> {
    let from = app.open_repo(Some(&args.from_repo)).await?;
    let to = app.open_repo(Some(&args.to_repo)).await?;
    let key = FileKey::from_raw(args.file_key);

    stowage_store::filestore_copy(from.store.as_ref(), to.store.as_ref(), &key)
        .await
        .or_raise(|| ErrorKind::Store)?;
    from.close().await.or_raise(|| ErrorKind::Store)?;
    to.close().await.or_raise(|| ErrorKind::Store)?;
    println!("Copied {key} from '{}' to '{}'", args.from_repo, args.to_repo);
    Ok(())
}
