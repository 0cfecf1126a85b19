//! CLI command definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Hotwire - hot-reloaded plugin dispatch from the terminal
#[derive(Parser)]
#[command(name = "hotwire")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path (toml, yaml, json, ...)
    #[arg(short = 'c', long, global = true, env = "HOTWIRE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Plugin root, overriding the configuration file
    #[arg(short = 'p', long, global = true)]
    pub plugin_root: Option<PathBuf>,

    /// Echo framework, error and plugin logs to the terminal
    #[arg(long, global = true)]
    pub show_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Serve events read from stdin, one `user[@group]: text` per line
    Run {
        /// Watch the plugin root for changes
        #[arg(short, long)]
        watch: bool,
    },

    /// Dispatch a single message and print the replies
    Dispatch {
        /// Message content
        text: String,

        /// Sender id
        #[arg(short, long, default_value = "console")]
        user: String,

        /// Group id; omitted for a direct chat
        #[arg(short, long)]
        group: Option<String>,

        /// Treat the sender as an owner
        #[arg(long)]
        owner: bool,

        /// Print the dispatch report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List loaded plugin files
    List,

    /// Load a plugin file without registering it and show its declarations
    Check {
        /// Plugin file
        file: PathBuf,
    },

    /// List dashboard pages declared by plugins
    Routes,
}
