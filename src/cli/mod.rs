//! CLI module for swapchat - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands to run the chat server
//! and to inspect the tool set a request would see.

pub mod commands;

pub use commands::Cli;
