//! Command-line interface.

pub mod commands;
pub mod context;
pub mod output;

use clap::{Parser, Subcommand};

use crate::models::OutputFormat;

/// Agentic retrieval over local documents: index, search, and gather context
/// with external tools.
#[derive(Debug, Parser)]
#[command(name = "arag")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[arg(
        long,
        short = 'f',
        global = true,
        help = "Output format: text, json, or markdown"
    )]
    pub format: Option<OutputFormat>,

    #[arg(long, short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Check embedding server, vector store and tool servers
    Status,

    /// Manage the index (add, delete, clear)
    #[command(subcommand)]
    Index(commands::IndexCommand),

    /// Hybrid search over a collection
    Search(commands::SearchArgs),

    /// Gather context for a question, calling tools when retrieval falls short
    Ask(commands::AskArgs),

    /// List tools exposed by the configured tool servers
    Tools,

    /// Manage configuration
    #[command(subcommand)]
    Config(commands::ConfigCommand),
}
