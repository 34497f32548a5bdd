// powledger node and wallet CLI

use clap::Parser;
use powledger::{Cli, CliHandler};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let config = match cli.node_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = CliHandler::new(config).handle(cli.command).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
