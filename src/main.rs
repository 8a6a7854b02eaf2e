use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::sync::Arc;

mod cli;

use cli::Cli;
use cli::commands::Commands;
use swapchat::assembler::{RequestContext, ToolSetAssembler};
use swapchat::config::{Config, Credentials};
use swapchat::identity::Session;
use swapchat::server::{self, AppState};

fn setup_logging(config: &Config, verbose: bool) {
    let default_level = if verbose {
        "debug".to_string()
    } else {
        config.log_level.clone().unwrap_or_else(|| "info".to_string())
    };

    // RUST_LOG wins over the configured level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();
}

async fn run_application(cli: &Cli, mut config: Config) -> Result<()> {
    cli.apply_overrides(&mut config);
    match &cli.command {
        None | Some(Commands::Serve { .. }) => handle_serve_command(config).await,
        Some(Commands::Tools { token }) => handle_tools_command(token.as_deref(), &config).await,
    }
}

async fn handle_serve_command(config: Config) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    let addr = config.bind_addr()?;

    let credentials = Credentials::from_env(&config);
    info!("Credentials: {:?}", credentials);

    let state = Arc::new(AppState::from_config(&config, &credentials)?);
    println!("{} http://{}", "Serving on".green(), addr);
    server::serve(state, addr).await
}

async fn handle_tools_command(token: Option<&str>, config: &Config) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    let credentials = Credentials::from_env(config);
    let assembler = ToolSetAssembler::from_config(config, &credentials).context("Failed to build tool sources")?;

    let ctx = RequestContext {
        session: token.map(Session::with_token),
        wallet_address: None,
    };
    let (tools, leases) = assembler.assemble(&ctx).await.into_parts();

    let direct = assembler.direct_tools();
    println!("{} ({} tools)", "Tool set".cyan().bold(), tools.len());
    for tool in tools.iter() {
        let is_direct = direct.get(tool.name()).is_some_and(|d| Arc::ptr_eq(&d, tool));
        let origin = if is_direct { "direct" } else { "remote" };
        println!("  {} {} {}", tool.name().green(), format!("[{}]", origin).dimmed(), tool.description());
    }
    if tools.is_empty() {
        println!("  {}", "No tools available".yellow());
    }

    leases.release().await;
    assembler.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging once the level is known
    setup_logging(&config, cli.is_verbose());

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, config).await.context("Application failed")?;

    Ok(())
}
