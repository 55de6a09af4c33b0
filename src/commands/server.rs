//! `stowage server`: expose the local filestore over SFTP.

use exn::ResultExt;
use stowage_sftp::server::ServeOptions;

use crate::cli::ServerArgs;
use crate::commands::App;
use crate::error::{ErrorKind, Result};

pub async fn run(app: &App, args: ServerArgs) -> Result<()> {
    let repo = app.open_repo(None).await?;
    let options = ServeOptions {
        host: args.host,
        port: args.port,
        authorized_keys_dir: args.authorized_keys,
        host_key: args.server_key,
    };
    let serving = stowage_sftp::serve(repo.store.clone(), repo.key_format, &options);
    let result = tokio::select! {
        served = serving => served.or_raise(|| ErrorKind::Sftp),
        interrupted = tokio::signal::ctrl_c() => interrupted.or_raise(|| ErrorKind::Io),
    };
    repo.close().await.or_raise(|| ErrorKind::Store)?;
    result
}
