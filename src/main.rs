use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

mod cli;
mod config;
mod error;
mod export;
mod inspect;
mod message;
mod naming;
mod processors;
mod registry;
mod resample;
mod routines;
mod source;

use cli::{Cli, Commands};
use config::RunConfig;
use export::Exporter;
use registry::Registry;
use source::JsonlSource;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Inspect { log } => {
            let source = JsonlSource::open(&log)?;
            inspect::inspect_source(&source)
        }
        Commands::Formats {} => inspect::print_formats(&Registry::with_builtins()),
        Commands::Export { log, config, output_dir, naming, cpu_percentage, progress } => {
            let source = JsonlSource::open(&log)?;
            let mut run_config = RunConfig::load(&config)
                .with_context(|| format!("failed to load run config: {config}"))?;
            if let Some(dir) = output_dir {
                run_config.output_dir = dir.into();
            }
            if let Some(pattern) = naming {
                run_config.naming = pattern;
            }
            if let Some(cpu) = cpu_percentage {
                run_config.cpu_percentage = cpu;
            }

            let registry = Registry::with_builtins();
            let summary = Exporter::new(&registry).show_progress(progress).run(&source, &run_config)?;

            for (channel, count) in &summary.exported {
                println!("{channel}: {count} exported");
            }
            for (channel, count) in &summary.discarded {
                println!("{channel}: {count} frames discarded");
            }
            for failure in &summary.errors {
                eprintln!("error: {failure}");
            }
            if !summary.success {
                bail!("export finished with fatal group errors");
            }
            Ok(())
        }
    }
}
