//! Hivemind CLI
//!
//! Commands:
//! - `hivemind update [NAMES...]` - Bring artifacts up to their latest revision
//! - `hivemind switch <NAME> <REV>` - Make a specific revision current
//! - `hivemind versions <NAME>` - List known versions of an artifact
//! - `hivemind status` - Show the current revision of every artifact
//! - `hivemind bind <NAME> <REMOTE>` - Bind an artifact to a repository
//! - `hivemind unbind <NAME>` - Remove a binding

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use hivemind_core::{
    filter_versions, init_tracing, short_revision, CancellationToken, HivemindConfig,
    ProgressEvent, ProgressSink, RepositoryBinding, UpdateOutcome, UpdatePipeline,
};
use tokio::sync::mpsc;
use tracing::{warn, Level};

#[derive(Parser)]
#[command(name = "hivemind")]
#[command(author, version = env!("CARGO_PKG_VERSION"), about = "Versioned knowledge artifacts for tracked repositories", long_about = None)]
struct Cli {
    /// Data root holding repos, experts and the registry
    #[arg(long, global = true, env = "HIVEMIND_ROOT")]
    root: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Update artifacts to the latest upstream revision
    Update {
        /// Artifacts to update (all bound artifacts when omitted)
        names: Vec<String>,
    },

    /// Switch an artifact to a specific revision, tag or branch
    Switch {
        /// Artifact name
        name: String,

        /// Revision, tag or branch to make current
        revision: String,
    },

    /// List versions known for an artifact
    Versions {
        /// Artifact name
        name: String,

        /// Keep only versions whose label or revision matches
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Show every artifact with its current revision
    Status,

    /// Bind an artifact name to a repository
    Bind {
        /// Artifact name
        name: String,

        /// Repository URL or path
        remote: String,

        /// Branch or tag to clone
        #[arg(long = "ref")]
        ref_name: Option<String>,

        /// Revision to check out after cloning
        #[arg(long)]
        commit: Option<String>,
    },

    /// Remove an artifact binding
    Unbind {
        /// Artifact name
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let root = cli.root.unwrap_or_else(default_root);
    let config = HivemindConfig::load(&root)
        .with_context(|| format!("Failed to load configuration from {}", root.display()))?;
    let pipeline = UpdatePipeline::from_config(&config);

    match cli.command {
        Commands::Update { names } => cmd_update(&pipeline, names, cli.json).await,
        Commands::Switch { name, revision } => {
            cmd_switch(&pipeline, &name, &revision, cli.json).await
        }
        Commands::Versions { name, filter } => {
            cmd_versions(&pipeline, &name, filter.as_deref(), cli.json).await
        }
        Commands::Status => cmd_status(&pipeline, cli.json),
        Commands::Bind {
            name,
            remote,
            ref_name,
            commit,
        } => cmd_bind(&pipeline, &name, &remote, ref_name, commit),
        Commands::Unbind { name } => cmd_unbind(&pipeline, &name),
    }
}

fn default_root() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".hivemind"),
        None => PathBuf::from(".hivemind"),
    }
}

/// Print progress events until every sender is gone.
fn spawn_progress_printer(
    mut rx: mpsc::UnboundedReceiver<ProgressEvent>,
    json: bool,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if json {
                if let Ok(line) = serde_json::to_string(&event) {
                    println!("{}", line);
                }
            } else {
                println!(
                    "[{}] {:<18} {} ({:.1}s)",
                    event.artifact,
                    event.phase,
                    event.message,
                    event.elapsed.as_secs_f64()
                );
            }
        }
    })
}

/// Cancel every token on Ctrl-C.
fn spawn_interrupt_handler(tokens: Vec<CancellationToken>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling {} attempt(s)", tokens.len());
            for token in &tokens {
                token.cancel();
            }
        }
    })
}

fn print_outcome(outcome: &UpdateOutcome) {
    let revision = |rev: &Option<String>| {
        rev.as_deref()
            .map(short_revision)
            .unwrap_or("none")
            .to_string()
    };
    if outcome.already_current {
        println!(
            "{}: already at {}",
            outcome.artifact,
            revision(&outcome.new_revision)
        );
    } else if outcome.success {
        let note = if outcome.reused_analysis {
            " (reused analysis)"
        } else {
            ""
        };
        println!(
            "{}: {} -> {}{}",
            outcome.artifact,
            revision(&outcome.old_revision),
            revision(&outcome.new_revision),
            note
        );
    } else if outcome.cancelled {
        println!("{}: cancelled", outcome.artifact);
    } else {
        println!(
            "{}: failed: {}",
            outcome.artifact,
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
}

fn report_outcomes(outcomes: &[UpdateOutcome], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcomes)?);
    } else {
        for outcome in outcomes {
            print_outcome(outcome);
        }
    }
    // Cancellation is reported above but is not a failure.
    let failed = outcomes
        .iter()
        .filter(|o| !o.success && !o.cancelled)
        .count();
    if failed > 0 {
        bail!("{} of {} attempt(s) failed", failed, outcomes.len());
    }
    Ok(())
}

async fn cmd_update(pipeline: &UpdatePipeline, names: Vec<String>, json: bool) -> Result<()> {
    let names = if names.is_empty() {
        pipeline
            .registry()
            .list()
            .context("Failed to read repository registry")?
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    } else {
        names
    };
    if names.is_empty() {
        println!("No artifacts bound. Run 'hivemind bind' first.");
        return Ok(());
    }

    let (sink, rx) = ProgressSink::channel();
    let printer = spawn_progress_printer(rx, json);

    let tokens: Vec<CancellationToken> = names.iter().map(|_| CancellationToken::new()).collect();
    let interrupt = spawn_interrupt_handler(tokens.clone());

    let mut tasks = Vec::with_capacity(names.len());
    for (name, token) in names.into_iter().zip(tokens) {
        let pipeline = pipeline.clone();
        let sink = sink.clone();
        tasks.push(tokio::spawn(async move {
            pipeline.update(&name, &token, &sink).await
        }));
    }
    drop(sink);

    let mut outcomes = Vec::with_capacity(tasks.len());
    for task in tasks {
        outcomes.push(task.await.context("Update task panicked")?);
    }
    interrupt.abort();
    let _ = printer.await;

    report_outcomes(&outcomes, json)
}

async fn cmd_switch(
    pipeline: &UpdatePipeline,
    name: &str,
    revision: &str,
    json: bool,
) -> Result<()> {
    let (sink, rx) = ProgressSink::channel();
    let printer = spawn_progress_printer(rx, json);
    let token = CancellationToken::new();
    let interrupt = spawn_interrupt_handler(vec![token.clone()]);

    let outcome = pipeline.switch(name, revision, &token, &sink).await;
    drop(sink);
    interrupt.abort();
    let _ = printer.await;

    report_outcomes(std::slice::from_ref(&outcome), json)
}

async fn cmd_versions(
    pipeline: &UpdatePipeline,
    name: &str,
    filter: Option<&str>,
    json: bool,
) -> Result<()> {
    let versions = pipeline
        .catalog()
        .list(name)
        .await
        .with_context(|| format!("Failed to list versions of '{}'", name))?;
    let versions = match filter {
        Some(query) => filter_versions(&versions, query),
        None => versions,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&versions)?);
        return Ok(());
    }

    if versions.is_empty() {
        println!("No versions found for '{}'", name);
        return Ok(());
    }

    for version in &versions {
        let marker = if version.is_active {
            "*"
        } else if version.analyzed {
            "+"
        } else {
            " "
        };
        let date = version
            .date
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{} {}  {:<8} {:<16}  {}",
            marker,
            short_revision(&version.revision),
            version.kind.as_str(),
            date,
            version.label
        );
    }
    Ok(())
}

fn cmd_status(pipeline: &UpdatePipeline, json: bool) -> Result<()> {
    let summaries = pipeline
        .store()
        .summaries()
        .context("Failed to read version store")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    if summaries.is_empty() {
        println!("No artifacts analyzed yet.");
        return Ok(());
    }

    for summary in &summaries {
        println!(
            "{:<24} {:<14} {} version(s)",
            summary.name,
            summary
                .current_revision
                .as_deref()
                .map(short_revision)
                .unwrap_or("-"),
            summary.version_count
        );
    }
    Ok(())
}

fn cmd_bind(
    pipeline: &UpdatePipeline,
    name: &str,
    remote: &str,
    ref_name: Option<String>,
    commit: Option<String>,
) -> Result<()> {
    let mut binding = RepositoryBinding::new(remote);
    if let Some(ref_name) = ref_name {
        binding = binding.with_ref(ref_name);
    }
    if let Some(commit) = commit {
        binding = binding.with_pinned_revision(commit);
    }
    pipeline
        .registry()
        .bind(name, binding)
        .with_context(|| format!("Failed to bind '{}'", name))?;
    println!("Bound '{}' to {}", name, remote);
    Ok(())
}

fn cmd_unbind(pipeline: &UpdatePipeline, name: &str) -> Result<()> {
    let removed = pipeline
        .registry()
        .unbind(name)
        .with_context(|| format!("Failed to unbind '{}'", name))?;
    match removed {
        Some(_) => println!("Unbound '{}'", name),
        None => println!("'{}' was not bound", name),
    }
    Ok(())
}
