use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "unbag", about = "Extract multi-channel timestamped logs into per-message files", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List channels, payload kinds, message counts and time span of a log
    Inspect {
        /// Path to the .jsonl log
        log: String,
    },

    /// Show registered export routines and processors
    Formats {},

    /// Run an export described by a run configuration file
    Export {
        /// Path to the .jsonl log
        log: String,
        /// Path to the run configuration (JSON)
        #[arg(long = "config")]
        config: String,
        /// Override the configured output directory
        #[arg(long = "output-dir")]
        output_dir: Option<String>,
        /// Override the configured naming pattern
        #[arg(long = "naming")]
        naming: Option<String>,
        /// Override the configured CPU percentage (0 forces sequential)
        #[arg(long = "cpu-percentage")]
        cpu_percentage: Option<u32>,
        /// Show progress (enabled by default)
        #[arg(long = "progress", action = ArgAction::SetTrue, default_value_t = true)]
        progress: bool,
    },
}
