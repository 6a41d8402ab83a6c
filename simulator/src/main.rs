use anyhow::Context;
use backend::bridge::serve;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use workflow::config::SimulatorConfig;
use workflow::runner::Runner;

mod backend;
mod generator;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Mock pose backend and headless workout driver")]
struct Args {
    /// Load backend and driver settings from YAML
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve synthetic landmarks over /ws until Ctrl+C
    Serve {
        #[arg(long)]
        bind: Option<SocketAddr>,
        /// Seed for the landmark generator
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Calibrate every pose, hold each one and print a JSON summary
    Drive {
        #[arg(long)]
        endpoint: Option<String>,
        /// Hold duration applied to every pose
        #[arg(long)]
        hold_secs: Option<u32>,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SimulatorConfig::load(path)?,
        None => SimulatorConfig::default(),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("creating tokio runtime")?;

    match args.command {
        Command::Serve { bind, seed } => {
            if let Some(bind) = bind {
                config.backend.bind = bind;
            }
            if let Some(seed) = seed {
                config.backend.generator.seed = seed;
            }
            runtime.block_on(async {
                let handle = serve(config.backend)?;
                println!("Mock backend on {} (Ctrl+C to stop)", handle.endpoint());
                signal::ctrl_c().await.context("awaiting Ctrl+C to exit")?;
                println!("Received {} frames", handle.state.images_received());
                handle.shutdown().await;
                Ok::<(), anyhow::Error>(())
            })?;
        }
        Command::Drive {
            endpoint,
            hold_secs,
        } => {
            if let Some(endpoint) = endpoint {
                config.drive.workout.endpoint = endpoint;
            }
            if hold_secs.is_some() {
                config.drive.hold_seconds = hold_secs;
            }
            config
                .drive
                .workout
                .validate()
                .context("validating driver settings")?;
            let runner = Runner::new(config.drive);
            let summary = runtime.block_on(runner.execute())?;
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("encoding drive summary")?
            );
        }
    }

    Ok(())
}
