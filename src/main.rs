//! msk-fusion CLI entry point.

use clap::Parser;

use msk_fusion::cli::{commands, Cli, Commands};
use msk_fusion::infrastructure::logging::{LogConfig, LoggerImpl};
use msk_fusion::ConfigLoader;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(err) => msk_fusion::cli::handle_error(err, cli.json),
    };

    let _logger = match LoggerImpl::init(&LogConfig::from(&config.logging)) {
        Ok(logger) => logger,
        Err(err) => msk_fusion::cli::handle_error(err, cli.json),
    };

    let result = match cli.command {
        Commands::Run(args) => commands::run::execute(args, &config, cli.json).await,
        Commands::Verify(args) => commands::verify::execute(args, cli.json).await,
        Commands::Lattice(args) => commands::lattice::execute(args, cli.json).await,
        Commands::Graph(args) => commands::graph::execute(args, &config, cli.json).await,
    };

    if let Err(err) = result {
        msk_fusion::cli::handle_error(err, cli.json);
    }
}
