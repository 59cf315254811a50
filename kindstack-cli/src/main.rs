//! Kindstack CLI
//!
//! Provisions, inspects and tears down the local Kind development
//! environment.

mod output;

use anyhow::{Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use kindstack::cancellation::CancellationToken;
use kindstack::config::EnvConfig;
use kindstack::environment::Environment;
use kindstack::events::EventSink;
use kindstack::sequencer::TeardownScope;
use kindstack::tools::{check_prerequisites, ProcessRunner};
use output::ConsoleEventSink;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "kindstack", version)]
#[command(about = "Provision a local Kind development environment", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = "KINDSTACK_CONFIG")]
    config: Option<PathBuf>,

    /// Print reports as JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create the cluster and install every service
    Start,
    /// Tear the environment down
    Clean(CleanArgs),
    /// Show the state of the cluster and its services
    Status,
    /// Check that docker, kind, kubectl and helm are available
    #[command(name = "check-prerequisites")]
    CheckPrerequisites,
}

#[derive(Debug, Args)]
#[command(group(
    ArgGroup::new("scope")
        .args(["cluster_only", "config_only", "docker_only", "all", "status"])
        .multiple(false)
))]
struct CleanArgs {
    /// Remove only the Helm releases and the kind cluster
    #[arg(long)]
    cluster_only: bool,
    /// Remove only the kubeconfig entries
    #[arg(long)]
    config_only: bool,
    /// Remove only leftover docker containers, volumes and the network
    #[arg(long)]
    docker_only: bool,
    /// Remove everything (default)
    #[arg(long)]
    all: bool,
    /// List what would be removed without removing anything
    #[arg(long)]
    status: bool,
    /// Skip the confirmation prompt
    #[arg(short, long)]
    force: bool,
}

impl CleanArgs {
    fn scope(&self) -> TeardownScope {
        if self.cluster_only {
            TeardownScope::ClusterOnly
        } else if self.config_only {
            TeardownScope::ConfigOnly
        } else if self.docker_only {
            TeardownScope::ResourcesOnly
        } else {
            TeardownScope::All
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kindstack=info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

fn interrupt_notice(reason: &str) -> String {
    format!("{} {reason}; stopping at the next wait", "⚠".yellow())
}

/// Returns a token cancelled on Ctrl-C.
///
/// The notice goes to stderr so a `--json` report on stdout stays parseable.
fn interrupt_token() -> Arc<CancellationToken> {
    let token = Arc::new(CancellationToken::new());
    token.on_cancel(|reason| eprintln!("{}", interrupt_notice(reason)));
    let handle = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received");
            handle.cancel("interrupted by user");
        }
    });
    token
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N]: ");
    std::io::stdout().flush()?;
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(matches!(input.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn sink(json: bool) -> Arc<dyn EventSink> {
    if json {
        Arc::new(kindstack::events::NoOpEventSink)
    } else {
        Arc::new(ConsoleEventSink)
    }
}

async fn start(env: &Environment, json: bool) -> Result<i32> {
    let token = interrupt_token();
    let plan = env
        .provisioning_plan(token, sink(json))
        .context("invalid provisioning plan")?;
    info!(cluster = %env.config().cluster_name, stages = plan.stage_count(), "Provisioning");

    let report = plan.run().await;
    let status = env.status().await;
    if json {
        let doc = serde_json::json!({ "report": report, "status": status });
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        output::print_report(&report);
        output::print_status(&status);
    }
    Ok(report.exit_code())
}

async fn clean(env: &Environment, args: &CleanArgs, json: bool) -> Result<i32> {
    let scope = args.scope();
    if args.status {
        let items = env.inventory(scope).await;
        if json {
            println!("{}", serde_json::to_string_pretty(&items)?);
        } else {
            output::print_inventory(&items);
        }
        return Ok(0);
    }

    if !args.force {
        let items = env.inventory(scope).await;
        if !json {
            output::print_inventory(&items);
        }
        if items.iter().all(|item| !item.present && item.error.is_none()) {
            println!("{} nothing to clean", "✓".green());
            return Ok(0);
        }
        if !confirm("Remove these resources?")? {
            println!("Aborted");
            return Ok(1);
        }
    }

    let report = env
        .teardown_plan(interrupt_token(), sink(json))
        .run(scope)
        .await
        .context("invalid teardown plan")?;
    if json {
        println!("{}", report.to_json()?);
    } else {
        output::print_report(&report);
    }
    Ok(report.exit_code())
}

async fn status(env: &Environment, json: bool) -> Result<i32> {
    let status = env.status().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        output::print_status(&status);
    }
    Ok(i32::from(!status.is_healthy()))
}

async fn prerequisites(json: bool) -> Result<i32> {
    let report = check_prerequisites(Arc::new(ProcessRunner::new())).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        output::print_prerequisites(&report);
    }
    Ok(i32::from(!report.is_satisfied()))
}

fn environment(config: Option<&Path>) -> Result<Environment> {
    let config = EnvConfig::load(config).with_context(|| match config {
        Some(path) => format!("failed to load configuration from {}", path.display()),
        None => "invalid default configuration".to_string(),
    })?;
    Ok(Environment::new(Arc::new(config), Arc::new(ProcessRunner::new())))
}

async fn run(cli: Cli) -> Result<i32> {
    let config = cli.config.as_deref();
    match &cli.command {
        Commands::Start => start(&environment(config)?, cli.json).await,
        Commands::Clean(args) => clean(&environment(config)?, args, cli.json).await,
        Commands::Status => status(&environment(config)?, cli.json).await,
        Commands::CheckPrerequisites => prerequisites(cli.json).await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let code = run(cli).await?;
    std::process::exit(code);
}
