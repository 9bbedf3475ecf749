use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "veil-worker")]
#[command(about = "Blur faces and license plates in photos", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (default: ./veil.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Redact one or more images and print the final job records as JSON
    Process {
        /// Input images
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Output path (only valid with a single input image)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Leave faces unblurred
        #[arg(long)]
        no_faces: bool,

        /// Leave license plates unblurred
        #[arg(long)]
        no_plates: bool,

        /// Photo record to mark as processed (only valid with a single input image)
        #[arg(long)]
        photo_id: Option<i64>,
    },

    /// Manage the config file
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Write a default config file
    Init {
        /// Target path (default: ./veil.json)
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
