//! Command handlers.

use crate::config::BuildConfig;
use anyhow::{Context, Result, anyhow, bail};
use console::style;
use monobuild_core::graph::{GraphDescriptor, Runtime};
use monobuild_core::ids::UnitId;
use monobuild_core::output::{BuildReport, UnitOutcome};
use monobuild_core::record::UnitState;
use monobuild_runner::Workspace;
use monobuild_scheduler::{DagBuilder, Scheduler, SchedulerConfig};
use std::path::Path;

fn load_graph(path: &Path) -> Result<GraphDescriptor> {
    GraphDescriptor::from_path(path)
        .with_context(|| format!("Failed to load graph {}", path.display()))
}

/// Check the graph and that every target and runtime it uses is configured.
pub fn validate(config: &BuildConfig, graph_path: Option<&Path>) -> Result<()> {
    let path = graph_path.unwrap_or(&config.graph);
    let graph = load_graph(path)?;
    let dag = DagBuilder::new().build(&graph)?;

    let registry = config.runner.registry();
    let missing_targets = registry.missing_targets(&graph);
    let missing_runtimes = registry.missing_runtimes(&graph);

    for (unit, target) in &missing_targets {
        println!(
            "{} Unit {} uses unconfigured target {}",
            style("✗").red(),
            style(unit).bold(),
            style(target).yellow()
        );
    }
    for runtime in &missing_runtimes {
        println!(
            "{} Runtime {} has no install command",
            style("✗").red(),
            style(runtime).yellow()
        );
    }
    if !missing_targets.is_empty() || !missing_runtimes.is_empty() {
        bail!("{} is not buildable with the current config", path.display());
    }

    println!(
        "{} Graph {} is valid",
        style("✓").green(),
        style(path.display()).bold()
    );
    println!("  Units: {}", dag.len());
    println!("  Roots: {}", dag.roots().len());
    Ok(())
}

pub fn units(config: &BuildConfig, runtime: Option<Runtime>) -> Result<()> {
    let graph = load_graph(&config.graph)?;
    for unit in graph.list_units(runtime) {
        println!("{}", unit);
    }
    Ok(())
}

pub fn show(config: &BuildConfig, unit: &str) -> Result<()> {
    let graph = load_graph(&config.graph)?;
    let unit_config = graph.config_for(&UnitId::new(unit))?;
    print!("{}", serde_yaml::to_string(unit_config)?);
    Ok(())
}

pub fn plan(config: &BuildConfig) -> Result<()> {
    let graph = load_graph(&config.graph)?;
    let dag = DagBuilder::new().build(&graph)?;
    let layers = dag.layers()?;

    for line in render_layers(&layers) {
        println!("{}", line);
    }
    Ok(())
}

fn render_layers(layers: &[Vec<&UnitId>]) -> Vec<String> {
    layers
        .iter()
        .enumerate()
        .map(|(i, units)| {
            let names: Vec<&str> = units.iter().map(|u| u.as_str()).collect();
            format!("{:>3}. {}", i + 1, names.join(", "))
        })
        .collect()
}

pub async fn build(
    config: &BuildConfig,
    units: Vec<String>,
    max_concurrency: Option<usize>,
    json: bool,
) -> Result<()> {
    let graph = load_graph(&config.graph)?;
    let scheduler: Scheduler<Workspace> =
        Scheduler::new(graph, config.runner.registry(), config.source_root.clone()).with_config(
            SchedulerConfig {
                max_concurrency: max_concurrency.or(config.max_concurrency),
            },
        );

    let requested: Vec<UnitId> = units.into_iter().map(UnitId::from).collect();
    tracing::debug!(
        graph = %config.graph.display(),
        source_root = %config.source_root.display(),
        requested = requested.len(),
        "Starting build"
    );
    let outcome = if requested.is_empty() {
        scheduler.build_graph_with_report().await?
    } else {
        scheduler.build_units_with_report(&requested).await?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.report)?);
    } else {
        print_summary(&outcome.report);
    }

    match outcome.result {
        Ok(output) => {
            if !json {
                for (unit, workspace) in output.iter() {
                    println!(
                        "  {} {}",
                        style(unit).bold(),
                        style(workspace.path.display()).dim()
                    );
                }
            }
            Ok(())
        }
        Err(err) => Err(anyhow!(err).context("Build failed")),
    }
}

fn print_summary(report: &BuildReport) {
    println!(
        "{} Build {} ({} units, {})",
        if report.success {
            style("✓").green()
        } else {
            style("✗").red()
        },
        style(report.build_id).dim(),
        report.units.len(),
        format_duration(report.duration_ms)
    );
    for outcome in &report.units {
        println!("{}", summary_line(outcome));
    }
    if !report.success {
        println!(
            "  {} done, {} failed, {} skipped",
            report.count(UnitState::Done),
            report.failed_units().len(),
            report.units.iter().filter(|u| u.skipped).count()
        );
    }
}

fn summary_line(outcome: &UnitOutcome) -> String {
    let marker = match outcome.state {
        UnitState::Done => style("✓").green(),
        UnitState::Failed if outcome.skipped => style("-").yellow(),
        UnitState::Failed => style("✗").red(),
        UnitState::Pending | UnitState::Running => style("?").dim(),
    };
    let duration = outcome
        .duration_ms
        .map(format_duration)
        .unwrap_or_default();
    let mut line = format!("  {} {:<40} {:>8}", marker, outcome.unit.as_str(), duration);
    if let Some(error) = outcome.error.as_ref().filter(|_| !outcome.skipped) {
        let first = error.lines().next().unwrap_or_default();
        line.push_str(&format!("\n      {}", style(first).red()));
    }
    line
}

fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}

pub fn schema(for_config: bool) -> Result<()> {
    let schema = if for_config {
        schemars::schema_for!(BuildConfig)
    } else {
        schemars::schema_for!(GraphDescriptor)
    };
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
