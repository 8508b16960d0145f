//! monobuild CLI entrypoint.

use clap::Parser;
use std::path::PathBuf;

mod commands;
mod config;
mod handlers;
mod telemetry;

use commands::Commands;
use config::BuildConfig;
use telemetry::LogFormat;

#[derive(Parser)]
#[command(name = "monobuild")]
#[command(author, version, about = "Dependency-ordered monorepo builds", long_about = None)]
struct Cli {
    /// Config file (default: ./monobuild.yaml, then the user config)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `monobuild_scheduler=trace`
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.log_level.as_deref(), cli.log_format);

    let config = BuildConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Validate { graph } => handlers::validate(&config, graph.as_deref())?,
        Commands::Units { runtime } => handlers::units(&config, runtime)?,
        Commands::Show { unit } => handlers::show(&config, &unit)?,
        Commands::Plan => handlers::plan(&config)?,
        Commands::Build {
            units,
            max_concurrency,
            json,
        } => handlers::build(&config, units, max_concurrency, json).await?,
        Commands::Schema { for_config } => handlers::schema(for_config)?,
    }

    Ok(())
}
