//! `stowage`: content-addressed file archiving with a version-controlled
//! catalog.

mod cli;
mod commands;
mod error;

use clap::Parser;
use cli::{Cli, Command, CreateCommand, FilestoreCommand};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("error: {}", error::render(&err));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> error::Result<()> {
    let app = commands::App::load(cli.config.as_deref())?;
    match cli.command {
        Command::Init(args) => commands::init::run(&app, args).await,
        Command::Create { command: CreateCommand::Repo(args) } => {
            commands::create::repo(&app, args)
        }
        Command::Create { command: CreateCommand::Dataset(args) } => {
            commands::create::dataset(&app, args)
        }
        Command::InsertRecord(args) => commands::insert_record::run(&app, args).await,
        Command::ReadTable(args) => commands::read_table::run(&app, args).await,
        Command::Import(args) => commands::import::run(&app, args).await,
        Command::Push(args) => commands::sync::push(&app, args).await,
        Command::Pull(args) => commands::sync::pull(&app, args).await,
        Command::Sync(args) => commands::sync::sync(&app, args).await,
        Command::Server(args) => commands::server::run(&app, args).await,
        Command::Filestore { command: FilestoreCommand::InsertFile(args) } => {
            commands::filestore::insert_file(&app, args).await
        }
        Command::Filestore { command: FilestoreCommand::WhereIs(args) } => {
            commands::filestore::where_is(&app, args).await
        }
        Command::Filestore { command: FilestoreCommand::Copy(args) } => {
            commands::filestore::copy(&app, args).await
        }
    }
}
