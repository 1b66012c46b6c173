use anyhow::{Context, Result};
use clap::Parser as _;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

use kbase_core::config::Config;
use kbase_pipeline::KnowledgeBase;

mod cli;
mod commands;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "kbase_core=debug,kbase_embed=debug,kbase_vector=debug,kbase_pipeline=debug,kbase=debug,info"
    } else {
        "info"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match &cli.config_dir {
        Some(dir) => Config::load_from(dir),
        None => Config::load(),
    }
    .context("loading configuration")?;
    let settings = config.settings().context("reading settings")?;
    let kb = KnowledgeBase::open(&settings).context("opening knowledge base")?;

    match cli.command {
        Commands::Ingest { paths, collection, name } => {
            commands::ingest(&kb, &paths, collection.as_deref(), name.as_deref()).await?;
        }
        Commands::Query { question, collection, k, json } => {
            commands::query(&kb, &question, collection.as_deref(), k, json).await?;
        }
        Commands::Ask { question, collection, k } => {
            commands::ask(&kb, &question, collection.as_deref(), k).await?;
        }
        Commands::DeleteSource { source_file, collection } => {
            let removed = kb.delete_by_source(&source_file, collection.as_deref()).await?;
            if removed == 0 {
                println!("No chunks from {source_file} found");
            } else {
                println!("Deleted {removed} chunks from {source_file}");
            }
        }
        Commands::Collections => {
            let names = kb.list_collections().await?;
            if names.is_empty() {
                println!("No collections yet");
            }
            for name in names {
                println!("{name}");
            }
        }
        Commands::Sources { collection } => {
            for source in kb.list_sources(collection.as_deref()).await? {
                println!("{source}");
            }
        }
        Commands::Count { collection } => {
            println!("{}", kb.count(collection.as_deref()).await?);
        }
        Commands::Clear { collection } => {
            let removed = kb.clear_collection(collection.as_deref()).await?;
            println!("Removed {removed} chunks");
        }
        Commands::Drop { collection, yes } => {
            let name = collection.as_deref().unwrap_or(kb.default_collection()).to_string();
            if yes || commands::confirm(&format!("Delete every document in collection '{name}'?"))? {
                kb.drop_collection(Some(&name)).await?;
                println!("Collection '{name}' recreated empty");
            } else {
                println!("Cancelled");
            }
        }
        Commands::Reset { yes } => {
            let root = settings.storage_root.display().to_string();
            if yes || commands::confirm(&format!("Irrecoverably delete everything under {root}?"))? {
                kb.reset_storage().await?;
                println!("Storage at {root} reset");
            } else {
                println!("Cancelled");
            }
        }
    }

    Ok(())
}
