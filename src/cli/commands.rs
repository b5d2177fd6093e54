use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chatrelay")]
#[command(author, version, about = "Streaming chat backend for local language models", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        /// Address to bind, overrides `server.bind`
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Inspect or remove stored conversations
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
}

#[derive(Subcommand)]
pub enum HistoryAction {
    /// List conversations, most recent first
    List,

    /// Print every message of one conversation
    Show { chat_id: String },

    /// Delete a conversation and its uploaded images
    Delete { chat_id: String },
}
