//! Command implementations and the shared application context.

pub mod create;
pub mod filestore;
pub mod import;
pub mod init;
pub mod insert_record;
pub mod read_table;
pub mod server;
pub mod sync;

use exn::ResultExt;
use std::path::Path;
use stowage_catalog::{Dataset, Dolt, DoltHandle};
use stowage_config::{AppConfig, Registry, Repo};

use crate::error::{ErrorKind, Result};

/// Everything a command needs: settings and the descriptor registry.
pub struct App {
    pub config: AppConfig,
    pub registry: Registry,
}

impl App {
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let config = AppConfig::load(config_file).or_raise(|| ErrorKind::Config)?;
        let registry = config.registry();
        Ok(Self { config, registry })
    }

    /// Open a repository by name, defaulting to the configured local one.
    pub async fn open_repo(&self, name: Option<&str>) -> Result<Repo> {
        let name = name.unwrap_or(&self.config.local_repo);
        let spec = self.registry.repos.must_load(name).or_raise(|| ErrorKind::Config)?;
        Repo::open(&spec).await.or_raise(|| ErrorKind::Store)
    }

    /// Connect to the catalog engine.
    pub async fn open_dolt(&self) -> Result<DoltHandle> {
        let settings = self.config.dolt_settings();
        let dolt = Dolt::connect(&settings).await.or_raise(|| ErrorKind::Catalog)?;
        Ok(dolt.into_handle())
    }

    /// Connect a dataset, ensuring the local repository's branch exists.
    pub async fn open_dataset(
        &self,
        dolt: DoltHandle,
        name: &str,
        local: &Repo,
        batch_size: usize,
    ) -> Result<Dataset> {
        let schema = self.registry.datasets.must_load(name).or_raise(|| ErrorKind::Config)?;
        Dataset::connect(dolt, schema, local.uuid, batch_size)
            .await
            .or_raise(|| ErrorKind::Catalog)
    }

    pub fn batch_size(&self, override_size: Option<usize>) -> usize {
        override_size.unwrap_or(self.config.batch_size)
    }
}
