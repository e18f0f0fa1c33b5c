use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP job service
    Serve {
        /// Address to listen on, overrides the configuration file
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Print the dimensions and frame count of a video file
    Probe {
        /// Input video file
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Edit a single video locally and wait for the result
    Edit {
        /// Input video file
        #[arg(short, long)]
        input: PathBuf,

        /// Editing prompt
        #[arg(short, long)]
        prompt: String,

        /// Prompt used for inversion, defaults to the editing prompt
        #[arg(long)]
        inversion_prompt: Option<String>,
    },

    /// Write the default configuration to a file
    InitConfig {
        /// Output configuration file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,
    },
}
