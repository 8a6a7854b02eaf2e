//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - serve: run the chat server (the default)
//! - tools: assemble and print the tool set

use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use swapchat::config::Config;

/// Swapchat - tool-augmented chat server for swaps and wallet analytics
#[derive(Parser, Debug)]
#[command(name = "swapchat")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Fold command-line overrides into the loaded config
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(Commands::Serve { bind: Some(bind) }) = &self.command {
            info!("Bind address overridden on the command line: {}", bind);
            config.server.bind = bind.clone();
        }
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the chat server
    Serve {
        /// Address to bind, overriding server.bind
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Assemble the tool set once and print it
    Tools {
        /// Access token for registries that authenticate per session
        #[arg(short, long)]
        token: Option<String>,
    },
}
