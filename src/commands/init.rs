//! `stowage init`: set up the local repository.

use exn::ResultExt;
use stowage_config::{FilestoreSpec, RepoSpec};
use uuid::Uuid;

use crate::cli::InitArgs;
use crate::commands::App;
use crate::error::{ErrorKind, Result};

pub async fn run(app: &App, args: InitArgs) -> Result<()> {
    if app.registry.repos.load(&args.name).or_raise(|| ErrorKind::Config)?.is_some() {
        exn::bail!(ErrorKind::Usage(format!("repository '{}' already exists", args.name)))
    }

    let root = args.root.unwrap_or_else(|| app.config.data_dir.join("files"));
    tokio::fs::create_dir_all(&root).await.or_raise(|| ErrorKind::Io)?;

    let spec = RepoSpec {
        name: args.name.clone(),
        uuid: Uuid::new_v4(),
        filestore: FilestoreSpec::Annex { root },
        key_format: Default::default(),
        catalog_remote: None,
    };
    app.registry.repos.save(&spec).or_raise(|| ErrorKind::Config)?;

    if args.init_catalog {
        init_catalog(app).await?;
    }

    println!("Initialized repository '{}' with uuid {}", spec.name, spec.uuid);
    Ok(())
}

/// Run `dolt init` in the configured catalog directory, so a spawned
/// sql-server has something to serve.
async fn init_catalog(app: &App) -> Result<()> {
    let dolt_dir = &app.config.dolt.dolt_dir;
    tokio::fs::create_dir_all(dolt_dir).await.or_raise(|| ErrorKind::Io)?;
    let dolt = which::which("dolt")
        .map_err(|err| ErrorKind::Usage(format!("dolt binary not found: {err}")))?;
    let status = tokio::process::Command::new(dolt)
        .arg("init")
        .current_dir(dolt_dir)
        .status()
        .await
        .or_raise(|| ErrorKind::Io)?;
    if !status.success() {
        exn::bail!(ErrorKind::Usage(format!("dolt init exited with {status}")))
    }
    Ok(())
}
