//! Terminal rendering of events, reports and probes.

use async_trait::async_trait;
use colored::Colorize;
use kindstack::core::{Outcome, RunState, SequenceReport};
use kindstack::environment::EnvironmentStatus;
use kindstack::events::{names, EventSink};
use kindstack::sequencer::InventoryItem;
use kindstack::tools::PrerequisiteReport;

/// Prints one line per stage transition.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleEventSink;

impl ConsoleEventSink {
    fn print(event_type: &str, data: Option<&serde_json::Value>) {
        let Some(data) = data else {
            return;
        };
        let stage = data["stage"].as_str().unwrap_or("?");
        let reason = data["reason"].as_str().unwrap_or_default();

        match event_type {
            names::STAGE_STARTED => println!("{} {}", "→".blue(), stage.bold()),
            names::STAGE_PROGRESS => {
                println!("  {}", data["message"].as_str().unwrap_or_default().dimmed());
            }
            names::STAGE_COMPLETED => println!("{} {stage}", "✓".green()),
            names::STAGE_DEGRADED => println!("{} {stage}: {}", "⚠".yellow(), reason.yellow()),
            names::STAGE_FAILED => println!("{} {stage}: {}", "✗".red(), reason.red()),
            names::STAGE_SKIPPED if !reason.is_empty() => {
                println!("{} {stage} ({})", "-".dimmed(), reason.dimmed());
            }
            names::STAGE_INTERRUPTED => println!("{} {stage} interrupted", "✗".red()),
            _ => {}
        }
    }
}

#[async_trait]
impl EventSink for ConsoleEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        Self::print(event_type, data.as_ref());
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        Self::print(event_type, data.as_ref());
    }
}

fn outcome_mark(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Success => "✓".green().to_string(),
        Outcome::Degraded(_) => "⚠".yellow().to_string(),
        Outcome::Failure(_) | Outcome::Interrupted => "✗".red().to_string(),
        Outcome::Skipped(_) | Outcome::NotRun => "-".dimmed().to_string(),
    }
}

/// Prints the per-stage summary and the final run state.
pub fn print_report(report: &SequenceReport) {
    println!();
    println!("{}", format!("{} summary", report.sequence).bold());
    for record in &report.records {
        let mut line = format!(
            "  {} {:<16} {}",
            outcome_mark(&record.outcome),
            record.name,
            record.outcome.label()
        );
        if let Some(reason) = record.outcome.reason() {
            line.push_str(&format!(": {reason}"));
        }
        println!("{line}");
    }
    let state = report.state.to_string();
    let state = match report.state {
        RunState::Completed => state.green(),
        RunState::CompletedWithWarnings => state.yellow(),
        _ => state.red(),
    };
    println!("{} {state}", "Result:".bold());
}

/// Prints the environment snapshot.
pub fn print_status(status: &EnvironmentStatus) {
    println!();
    if status.cluster_present {
        println!(
            "{} cluster {} ({}/{} nodes ready)",
            if status.nodes_ready == status.nodes_total && status.nodes_total > 0 {
                "✓".green()
            } else {
                "⚠".yellow()
            },
            status.cluster.bold(),
            status.nodes_ready,
            status.nodes_total
        );
    } else {
        println!("{} cluster {} not found", "✗".red(), status.cluster.bold());
    }

    for svc in &status.services {
        if !svc.enabled {
            println!("  {} {:<12} disabled", "-".dimmed(), svc.stage);
            continue;
        }
        let mark = if svc.is_healthy() { "✓".green() } else { "✗".red() };
        let release = svc.release_status.as_deref().unwrap_or("not installed");
        println!("  {mark} {:<12} {}/{} {release}", svc.stage, svc.namespace, svc.release);
        for deployment in &svc.deployments {
            let detail = deployment.status.map_or_else(
                || "missing".to_string(),
                |s| format!("{}/{} available", s.available, s.desired),
            );
            println!("      deployment {} {detail}", deployment.name);
        }
        if let Some(endpoint) = &svc.endpoint {
            match (endpoint.http_status, &endpoint.error) {
                (Some(code), _) => println!("      {} -> HTTP {code}", endpoint.url),
                (None, Some(error)) => println!("      {} -> {}", endpoint.url, error.red()),
                (None, None) => println!("      {} -> no response", endpoint.url),
            }
        }
    }

    for error in &status.errors {
        println!("{} {error}", "⚠".yellow());
    }
}

/// Prints what a teardown would remove.
pub fn print_inventory(items: &[InventoryItem]) {
    println!("{}", "Cleanup inventory".bold());
    for item in items {
        let state = match (&item.error, item.present) {
            (Some(error), _) => format!("unknown ({error})").yellow().to_string(),
            (None, true) => "present".green().to_string(),
            (None, false) => "absent".dimmed().to_string(),
        };
        println!("  {:<24} {state}", item.name);
    }
}

/// Prints the prerequisite check.
pub fn print_prerequisites(report: &PrerequisiteReport) {
    for tool in &report.tools {
        if tool.found {
            println!("{} {}", "✓".green(), tool.tool);
        } else {
            println!("{} {}: {}", "✗".red(), tool.tool, tool.hint.dimmed());
        }
    }
    match (report.docker_running, &report.docker_error) {
        (true, _) => println!("{} docker daemon running", "✓".green()),
        (false, Some(error)) => println!("{} docker daemon: {}", "✗".red(), error.red()),
        (false, None) => println!("{} docker daemon not running", "✗".red()),
    }
}
