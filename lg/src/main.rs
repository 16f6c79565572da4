use std::io::IsTerminal;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::info;

use loadgate::cli::{Cli, Command, OutputFormat};
use loadgate::config::Config;
use loadgate::{ReplayReport, Script, replay};

fn setup_logging(log_level: Option<&str>) -> Result<()> {
    let filter = match log_level {
        Some(level) => tracing_subscriber::EnvFilter::try_new(level).context("Invalid log level")?,
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_env_filter(filter)
        .init();

    info!("Logging initialized (level: {:?})", log_level);
    Ok(())
}

fn print_report(title: &str, report: &ReplayReport, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string(report).context("Failed to serialize report")?);
        return Ok(());
    }

    println!("{}", title.bold());
    for transition in &report.transitions {
        let elapsed = format!("{:>6}ms", transition.elapsed_ms).dimmed();
        let state = if transition.state.busy {
            transition.state.to_string().yellow()
        } else {
            transition.state.to_string().green()
        };
        println!("  {} {}", elapsed, state);
    }

    let metrics = &report.metrics;
    println!(
        "  {} submitted={} deduplicated={} transitions={} elided={} cancel-promotions={}",
        "metrics".cyan(),
        metrics.requests_submitted,
        metrics.requests_deduplicated,
        metrics.transitions,
        metrics.idle_elided,
        metrics.cancel_promotions
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate()?;

    info!("loadgate starting");

    match cli.command {
        Command::Demo { format } => {
            let report = replay(&Script::anti_flicker(), &config.coordinator).await?;
            print_report("busy A, idle, busy B within one tick", &report, format)?;

            let report = replay(&Script::cancel_window(), &config.coordinator).await?;
            print_report("busy with a 400ms cancel window", &report, format)?;
        }
        Command::Replay { script, format } => {
            let loaded = Script::load(&script)?;
            let report = replay(&loaded, &config.coordinator).await?;
            print_report(&script.display().to_string(), &report, format)?;
        }
        Command::Config => {
            let yaml = serde_yaml::to_string(&config).context("Failed to serialize config")?;
            print!("{}", yaml);
        }
    }

    Ok(())
}
