//! An open repository: a descriptor whose filestore is live.

use stowage_keys::KeyFormat;
use stowage_store::{Cas, StoreHandle};
use tracing::instrument;
use uuid::Uuid;

use crate::error::Result;
use crate::spec::RepoSpec;

pub struct Repo {
    pub name: String,
    pub uuid: Uuid,
    pub store: StoreHandle,
    pub key_format: KeyFormat,
    pub catalog_remote: Option<String>,
}

impl Repo {
    /// Open the repository's filestore.
    #[instrument(skip(spec), fields(repo = %spec.name))]
    pub async fn open(spec: &RepoSpec) -> Result<Self> {
        let store = spec.filestore.open().await?;
        Ok(Self {
            name: spec.name.clone(),
            uuid: spec.uuid,
            store,
            key_format: spec.key_format,
            catalog_remote: spec.catalog_remote.clone(),
        })
    }

    /// Content-addressed wrapper over this repository's store.
    pub fn cas(&self) -> Cas {
        Cas::new(self.store.clone(), self.key_format)
    }

    /// Flush and release the filestore. Call on every exit path.
    pub async fn close(&self) -> stowage_store::error::Result<()> {
        self.store.close().await
    }
}
