use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kbase")]
#[command(about = "Personal knowledge base: ingest documents, then search or ask them", long_about = None)]
pub struct Cli {
    #[arg(long, global = true, help = "Directory holding config.toml (defaults to the working directory)")]
    pub config_dir: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Log debug output to stderr")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Ingest files, or every supported file under a directory")]
    Ingest {
        #[arg(required = true, help = "Files or directories to ingest")]
        paths: Vec<PathBuf>,

        #[arg(short, long, help = "Target collection (defaults to the configured one)")]
        collection: Option<String>,

        #[arg(long, help = "Source name to record instead of the file name (single file only)")]
        name: Option<String>,
    },

    #[command(about = "Show the chunks nearest to a question")]
    Query {
        question: String,

        #[arg(short, long)]
        collection: Option<String>,

        #[arg(short, long, help = "Number of results (defaults to top_k)")]
        k: Option<usize>,

        #[arg(long, help = "Print results as JSON")]
        json: bool,
    },

    #[command(about = "Answer a question from the knowledge base")]
    Ask {
        question: String,

        #[arg(short, long)]
        collection: Option<String>,

        #[arg(short, long)]
        k: Option<usize>,
    },

    #[command(about = "Delete every chunk ingested from a source file")]
    DeleteSource {
        source_file: String,

        #[arg(short, long)]
        collection: Option<String>,
    },

    #[command(about = "List collections")]
    Collections,

    #[command(about = "List the source files stored in a collection")]
    Sources {
        #[arg(short, long)]
        collection: Option<String>,
    },

    #[command(about = "Count the chunks in a collection")]
    Count {
        #[arg(short, long)]
        collection: Option<String>,
    },

    #[command(about = "Remove every chunk from a collection, keeping the collection")]
    Clear {
        #[arg(short, long)]
        collection: Option<String>,
    },

    #[command(about = "Delete a collection and recreate it empty")]
    Drop {
        #[arg(short, long)]
        collection: Option<String>,

        #[arg(short, long, help = "Skip the confirmation prompt")]
        yes: bool,
    },

    #[command(about = "Delete the whole storage root and start over")]
    Reset {
        #[arg(short, long, help = "Skip the confirmation prompt")]
        yes: bool,
    },
}
