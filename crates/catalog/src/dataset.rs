//! A dataset: the set of file tables that are version controlled together.

use std::collections::HashMap;
use tracing::instrument;
use uuid::Uuid;

use crate::db::DoltHandle;
use crate::error::Result;
use crate::schema::{DatasetSchema, repo_branch};
use crate::table::FileTable;

pub struct Dataset {
    name: String,
    dolt: DoltHandle,
    schema: DatasetSchema,
    tables: HashMap<String, FileTable>,
}

impl Dataset {
    /// Build the dataset's tables and make sure the local repository's
    /// catalog branch exists (forked from `empty_table_ref`).
    #[instrument(skip(dolt, schema), fields(dataset = %schema.name))]
    pub async fn connect(
        dolt: DoltHandle,
        schema: DatasetSchema,
        local_repo: Uuid,
        batch_size: usize,
    ) -> Result<Self> {
        {
            let mut conn = dolt.lock().await;
            let branch = repo_branch(&local_repo, &schema.name);
            conn.maybe_create_branch(&branch, &schema.empty_table_ref).await?;
        }
        let tables = schema
            .tables
            .iter()
            .map(|table| {
                (
                    table.name.clone(),
                    FileTable::new(
                        dolt.clone(),
                        table.clone(),
                        schema.name.clone(),
                        schema.empty_table_ref.clone(),
                        batch_size,
                    ),
                )
            })
            .collect();
        Ok(Self { name: schema.name.clone(), dolt, schema, tables })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &DatasetSchema {
        &self.schema
    }

    pub fn dolt(&self) -> &DoltHandle {
        &self.dolt
    }

    pub fn table(&self, name: &str) -> Option<&FileTable> {
        self.tables.get(name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut FileTable> {
        self.tables.get_mut(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &FileTable> {
        self.tables.values()
    }

    pub fn tables_mut(&mut self) -> impl Iterator<Item = &mut FileTable> {
        self.tables.values_mut()
    }

    /// Make sure a peer repository's branch for this dataset exists, so it
    /// can be diffed against before its first write.
    pub async fn ensure_repo_branch(&self, repo: &Uuid) -> Result<()> {
        let mut conn = self.dolt.lock().await;
        let branch = repo_branch(repo, &self.name);
        conn.maybe_create_branch(&branch, &self.schema.empty_table_ref).await
    }

    /// Pull a peer repository's branch for this dataset from its catalog
    /// remote.
    pub async fn pull_from(&self, repo: &Uuid, catalog_remote: &str) -> Result<()> {
        let mut conn = self.dolt.lock().await;
        let branch = repo_branch(repo, &self.name);
        conn.pull_branch(&branch, catalog_remote).await
    }

    /// Flush every table's buffered rows.
    pub async fn flush(&mut self) -> Result<()> {
        for table in self.tables.values_mut() {
            table.flush().await?;
        }
        Ok(())
    }
}
