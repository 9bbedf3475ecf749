mod cli;
mod commands;
mod config;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = cli::Cli::parse();

    match cli.command {
        cli::Commands::Process {
            images,
            output,
            no_faces,
            no_plates,
            photo_id,
        } => {
            let config = config::load_config(cli.config.as_deref())?;
            let options = commands::ProcessOptions {
                output,
                blur_faces: !no_faces,
                blur_plates: !no_plates,
                photo_id,
            };
            commands::process(&config, images, options)
        }
        cli::Commands::Config(cli::ConfigCommands::Init { path, force }) => {
            commands::config_init(path.or(cli.config), force)
        }
    }
}
