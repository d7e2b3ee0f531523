use std::path::PathBuf;

use clap::{Parser, Subcommand};
use handoff_core::config::Config;

mod demo;

#[derive(Parser)]
#[command(name = "handoff")]
#[command(version, about = "Recording hand-off core: dispatcher, reclaimer and status stream")]
struct Cli {
    /// Config file (missing file = defaults)
    #[arg(short, long, global = true, default_value = "handoff.toml")]
    config: PathBuf,

    /// Enable debug logging (RUST_LOG wins when set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an in-memory pipeline against a simulated agent and stream one record's status
    Demo(demo::DemoArgs),

    /// Print the effective configuration (file + env overrides) as JSON
    Config,
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose {
        "info,handoff_core=debug,handoff_cli=debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load(&cli.config)?;

    match cli.command {
        Command::Demo(args) => demo::run(config, args).await?,
        Command::Config => {
            // api_key は表示しない
            let mut shown = config;
            if !shown.agent.api_key.is_empty() {
                shown.agent.api_key = "********".to_string();
            }
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
    }
    Ok(())
}
