//! Command-line surface. Every command is a thin translation onto the
//! library crates.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use stowage_catalog::TableFilter;

#[derive(Parser)]
#[command(name = "stowage", version, about)]
pub struct Cli {
    /// Path to a JSON config file (defaults + STOWAGE_* env otherwise).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Initialize the local repository (and optionally the catalog).
    Init(InitArgs),
    /// Write a new descriptor.
    Create {
        #[command(subcommand)]
        command: CreateCommand,
    },
    /// Insert a single record into the catalog and the filestore.
    InsertRecord(InsertRecordArgs),
    /// Print the rows a repository asserts for a table.
    ReadTable(ReadTableArgs),
    /// Import files from disk into the local repository.
    Import(ImportArgs),
    /// Move files this repository has and the remote lacks.
    Push(MoveArgs),
    /// Move files the remote has and this repository lacks.
    Pull(MoveArgs),
    /// Push and pull in one run.
    Sync(MoveArgs),
    /// Serve the local filestore over SFTP.
    Server(ServerArgs),
    /// Operate on filestores directly, bypassing the catalog.
    Filestore {
        #[command(subcommand)]
        command: FilestoreCommand,
    },
}

#[derive(Subcommand)]
pub enum CreateCommand {
    /// Describe a new repository.
    Repo(CreateRepoArgs),
    /// Describe a new dataset.
    Dataset(CreateDatasetArgs),
}

#[derive(Subcommand)]
pub enum FilestoreCommand {
    /// Insert one payload, computing its key.
    InsertFile(InsertFileArgs),
    /// List the repositories that hold a key.
    WhereIs(WhereIsArgs),
    /// Copy one key's payload between repositories.
    Copy(CopyArgs),
}

#[derive(Args)]
pub struct InitArgs {
    /// Name for the local repository descriptor.
    #[arg(long, default_value = "local")]
    pub name: String,
    /// Filestore root; defaults to `<data_dir>/files`.
    #[arg(long)]
    pub root: Option<PathBuf>,
    /// Also run `dolt init` in the configured dolt directory.
    #[arg(long)]
    pub init_catalog: bool,
}

#[derive(Args)]
pub struct CreateRepoArgs {
    pub name: String,
    /// Backend kind for the repository's filestore.
    #[arg(long, default_value = "annex", value_parser = ["annex", "memory", "kv"])]
    pub kind: String,
    /// Root path for path-based backends.
    #[arg(long)]
    pub root: Option<PathBuf>,
    /// Stable identity; generated when omitted.
    #[arg(long)]
    pub uuid: Option<uuid::Uuid>,
}

#[derive(Args)]
pub struct CreateDatasetArgs {
    pub name: String,
    /// Branch containing the table definitions but no rows.
    #[arg(long)]
    pub empty_table_ref: String,
    /// Table spec `name:file_column:key_col[,key_col...]`; repeatable.
    #[arg(long = "table", required = true)]
    pub tables: Vec<String>,
}

#[derive(Args)]
pub struct InsertRecordArgs {
    #[arg(long)]
    pub dataset: String,
    #[arg(long)]
    pub table_name: String,
    /// Key-column values, comma separated.
    #[arg(long)]
    pub key_columns: String,
    /// Payload, as a UTF-8 string.
    #[arg(long)]
    pub file_bytes: String,
    #[arg(long, default_value = "txt")]
    pub extension: String,
    /// Insert into this repository instead of the local one.
    #[arg(long)]
    pub repo: Option<String>,
}

#[derive(Args)]
pub struct ReadTableArgs {
    #[arg(long)]
    pub dataset: String,
    #[arg(long)]
    pub table_name: String,
    /// Read this repository's branch instead of the local one.
    #[arg(long)]
    pub repo: Option<String>,
    /// Equality filter `column=value`; repeatable.
    #[arg(long = "where")]
    pub filters: Vec<TableFilter>,
}

#[derive(Args)]
pub struct ImportArgs {
    #[arg(long)]
    pub dataset: String,
    #[arg(long)]
    pub table_name: String,
    /// Remove sources after the destination verifiably holds the bytes.
    #[arg(long, conflicts_with = "copy")]
    pub r#move: bool,
    /// Leave sources in place.
    #[arg(long)]
    pub copy: bool,
    /// Rows per catalog batch.
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Files or directories to import.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

#[derive(Args)]
pub struct MoveArgs {
    #[arg(long)]
    pub dataset: String,
    /// Peer repository descriptor name.
    #[arg(long)]
    pub remote: String,
    /// Equality filter `column=value` on the rows moved; repeatable.
    #[arg(long = "where")]
    pub filters: Vec<TableFilter>,
    /// Stop after this many files.
    #[arg(long)]
    pub limit: Option<usize>,
    /// Page size (also the catalog batch size).
    #[arg(long)]
    pub batch_size: Option<usize>,
}

#[derive(Args)]
pub struct ServerArgs {
    #[arg(long, default_value = "localhost")]
    pub host: String,
    #[arg(long, default_value_t = 22)]
    pub port: u16,
    /// Directory of authorized public keys (`*.pub`).
    #[arg(long)]
    pub authorized_keys: PathBuf,
    /// The server's host key file.
    #[arg(long)]
    pub server_key: PathBuf,
}

#[derive(Args)]
pub struct InsertFileArgs {
    /// Payload, as a UTF-8 string.
    #[arg(long)]
    pub file_bytes: String,
    #[arg(long, default_value = "txt")]
    pub extension: String,
    #[arg(long)]
    pub repo: Option<String>,
}

#[derive(Args)]
pub struct WhereIsArgs {
    #[arg(long)]
    pub file_key: String,
    /// Limit the search to one repository.
    #[arg(long)]
    pub repo: String,
}

#[derive(Args)]
pub struct CopyArgs {
    #[arg(long)]
    pub file_key: String,
    #[arg(long = "from")]
    pub from_repo: String,
    #[arg(long = "to")]
    pub to_repo: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_insert_record() {
        let cli = Cli::try_parse_from([
            "stowage",
            "insert-record",
            "--dataset",
            "test",
            "--table-name",
            "test_table",
            "--key-columns",
            "test_key1",
            "--file-bytes",
            "file_content_1",
        ])
        .unwrap();
        match cli.command {
            Command::InsertRecord(args) => {
                assert_eq!(args.dataset, "test");
                assert_eq!(args.extension, "txt");
                assert!(args.repo.is_none());
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn test_parse_push_with_filters() {
        let cli = Cli::try_parse_from([
            "stowage", "push", "--dataset", "art", "--remote", "mirror", "--where",
            "source=e621", "--limit", "10",
        ])
        .unwrap();
        match cli.command {
            Command::Push(args) => {
                assert_eq!(args.filters.len(), 1);
                assert_eq!(args.filters[0].column, "source");
                assert_eq!(args.limit, Some(10));
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn test_import_move_conflicts_with_copy() {
        let result = Cli::try_parse_from([
            "stowage", "import", "--dataset", "d", "--table-name", "t", "--move", "--copy",
            "some/path",
        ]);
        assert!(result.is_err());
    }
}
