//! Hotwire CLI - run, inspect and exercise a plugin root

mod cli;
mod commands;
mod context;
mod output;

use clap::Parser;
use cli::{Cli, Commands};
use context::CliContext;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_command_async(cli))
}

async fn run_command_async(cli: Cli) -> anyhow::Result<()> {
    let ctx = CliContext::new(cli.config.as_deref(), cli.plugin_root, cli.show_logs)?;

    match cli.command {
        Commands::Run { watch } => {
            commands::run::run(ctx, watch).await?;
        }

        Commands::Dispatch {
            text,
            user,
            group,
            owner,
            json,
        } => {
            commands::dispatch::run(&ctx, &text, &user, group.as_deref(), owner, json).await?;
        }

        Commands::List => {
            commands::list::run(&ctx).await?;
        }

        Commands::Check { file } => {
            commands::check::run(&ctx, &file)?;
        }

        Commands::Routes => {
            commands::routes::run(&ctx).await?;
        }
    }

    Ok(())
}
