mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, bind, port, rotate_token } => {
            commands::serve(config, bind, port, rotate_token).await
        }
        Command::Status => commands::status(cli.url, cli.token).await,
        Command::Get { resource_id } => commands::get(cli.url, cli.token, resource_id).await,
        Command::Put { resource_id, json_file, api_version } => {
            commands::put(cli.url, cli.token, resource_id, json_file, api_version).await
        }
        Command::Operation { id } => commands::operation(cli.url, cli.token, id).await,
    }
}
