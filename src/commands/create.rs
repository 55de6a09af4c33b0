//! `stowage create`: write repository and dataset descriptors.

use exn::ResultExt;
use stowage_catalog::{DatasetSchema, TableSchema};
use stowage_config::{FilestoreSpec, RepoSpec};
use uuid::Uuid;

use crate::cli::{CreateDatasetArgs, CreateRepoArgs};
use crate::commands::App;
use crate::error::{ErrorKind, Result};

pub fn repo(app: &App, args: CreateRepoArgs) -> Result<()> {
    if app.registry.repos.load(&args.name).or_raise(|| ErrorKind::Config)?.is_some() {
        exn::bail!(ErrorKind::Usage(format!("repository '{}' already exists", args.name)))
    }
    let root = || {
        args.root
            .clone()
            .ok_or_else(|| ErrorKind::Usage(format!("--root is required for kind '{}'", args.kind)))
    };
    let filestore = match args.kind.as_str() {
        "annex" => FilestoreSpec::Annex { root: root()? },
        "kv" => FilestoreSpec::Kv { path: root()? },
        "memory" => FilestoreSpec::Memory,
        other => exn::bail!(ErrorKind::Usage(format!("unknown filestore kind '{other}'"))),
    };
    let spec = RepoSpec {
        name: args.name,
        uuid: args.uuid.unwrap_or_else(Uuid::new_v4),
        filestore,
        key_format: Default::default(),
        catalog_remote: None,
    };
    app.registry.repos.save(&spec).or_raise(|| ErrorKind::Config)?;
    println!("Created repo '{}' with uuid {}", spec.name, spec.uuid);
    Ok(())
}

pub fn dataset(app: &App, args: CreateDatasetArgs) -> Result<()> {
    if app.registry.datasets.load(&args.name).or_raise(|| ErrorKind::Config)?.is_some() {
        exn::bail!(ErrorKind::Usage(format!("dataset '{}' already exists", args.name)))
    }
    let tables = args
        .tables
        .iter()
        .map(|spec| parse_table_spec(spec))
        .collect::<Result<Vec<_>>>()?;
    let schema = DatasetSchema { name: args.name, tables, empty_table_ref: args.empty_table_ref };
    app.registry.datasets.save(&schema).or_raise(|| ErrorKind::Config)?;
    println!("Created dataset '{}' with {} tables", schema.name, schema.tables.len());
    Ok(())
}

/// `name:file_column:key_col[,key_col...]`
fn parse_table_spec(spec: &str) -> Result<TableSchema> {
    let parts: Vec<&str> = spec.split(':').collect();
    let [name, file_column, key_columns] = parts.as_slice() else {
        exn::bail!(ErrorKind::Usage(format!(
            "invalid table spec '{spec}' (expected name:file_column:key_col[,key_col...])"
        )))
    };
    let key_columns: Vec<String> =
        key_columns.split(',').filter(|col| !col.is_empty()).map(str::to_string).collect();
    if key_columns.is_empty() {
        exn::bail!(ErrorKind::Usage(format!("table spec '{spec}' names no key columns")))
    }
    Ok(TableSchema {
        name: name.to_string(),
        file_column: file_column.to_string(),
        key_columns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_table_spec() {
        let schema = parse_table_spec("submissions:file_key:source,id,part").unwrap();
        assert_eq!(schema.name, "submissions");
        assert_eq!(schema.file_column, "file_key");
        assert_eq!(schema.key_columns, ["source", "id", "part"]);
    }

    #[test]
    fn test_parse_table_spec_rejects_bad_shapes() {
        assert!(parse_table_spec("just-a-name").is_err());
        assert!(parse_table_spec("name:file:").is_err());
        assert!(parse_table_spec("a:b:c:d").is_err());
    }
}
