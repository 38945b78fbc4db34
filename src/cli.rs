use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Embed and store the messages of a conversation
    Ingest {
        /// Conversation id the messages belong to
        #[clap(short, long)]
        conversation: String,

        /// JSON array of messages. Reads stdin when omitted
        #[clap(short, long)]
        file: Option<PathBuf>,

        /// JSON object attached to every stored message
        #[clap(short, long)]
        annotations: Option<String>,
    },

    /// Find stored messages similar to a query
    Search {
        query: String,

        /// Number of results (defaults to semantic_store.default_top_k)
        #[clap(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// Show store statistics
    Stats {},

    /// Rank messages by priority
    Priority {
        /// JSON array of messages. Reads stdin when omitted
        #[clap(short, long)]
        file: Option<PathBuf>,
    },
}
