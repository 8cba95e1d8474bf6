//! gypsum CLI
//!
//! Entry point for the `gypsum` command-line tool.

use clap::{Args, Parser, Subcommand};
use gypsum::config::{EffectiveConfig, GypsumConfig, QueueBackend, StoreBackend, TOKEN_ENV};
use gypsum::latest::{self, ScanOptions};
use gypsum::queue::{FsJobQueue, GithubJobQueue};
use gypsum::{
    logging, ExitCode, GypsumError, JobQueue, PublishOptions, Publisher, PurgeOptions, Purger,
    SchemaRegistry, SystemClock,
};
use gypsum_protocol::{FinalizeRequest, ProjectPaths};
use gypsum_store::{FsObjectStore, ObjectStore};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gypsum")]
#[command(about = "Publish, index and purge versioned document sets", version)]
struct Cli {
    /// Path to the configuration file (default: ./gypsum.toml if present)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Override store.root
    #[arg(long, global = true)]
    store_root: Option<PathBuf>,

    /// Use the filesystem queue in this directory
    #[arg(long, global = true)]
    queue_dir: Option<PathBuf>,

    /// Override publish.schema_dir
    #[arg(long, global = true)]
    schema_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Finalize an uploaded version
    Publish(PublishArgs),

    /// Delete incomplete and expired versions named by open purge jobs
    Purge,

    /// Recompute a project's latest pointers from its published versions
    Latest {
        /// Project name
        project: String,
    },

    /// Print the effective configuration and its sources
    CheckConfig,
}

#[derive(Args)]
struct PublishArgs {
    /// Queue record holding the finalize request
    #[arg(long, conflicts_with_all = ["project", "version", "timestamp"])]
    issue: Option<u64>,

    /// Project name
    #[arg(long, requires_all = ["version", "timestamp"])]
    project: Option<String>,

    /// Version name
    #[arg(long)]
    version: Option<String>,

    /// Declared upload time, epoch milliseconds
    #[arg(long)]
    timestamp: Option<i64>,

    /// JSON file with the project permissions
    #[arg(long)]
    permissions: Option<PathBuf>,

    /// Replace existing permissions
    #[arg(long)]
    overwrite_permissions: bool,
}

/// Failure of the CLI itself, before any protocol work starts.
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Gypsum(#[from] GypsumError),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Usage(_) => ExitCode::Usage,
            CliError::Gypsum(e) => e.exit_code(),
        }
    }
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli) {
        Ok(code) => code.into(),
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code().into()
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, CliError> {
    let effective = EffectiveConfig::load(cli.config.as_deref(), cli_overrides(&cli))
        .map_err(|e| CliError::Usage(e.to_string()))?;
    let config = &effective.config;

    match cli.command {
        Commands::CheckConfig => {
            print_json(&json!({
                "config": effective.merged,
                "sources": effective.sources,
            }))?;
            Ok(ExitCode::Success)
        }
        Commands::Publish(args) => run_publish(config, args),
        Commands::Purge => run_purge(config),
        Commands::Latest { project } => run_latest(config, &project),
    }
}

fn cli_overrides(cli: &Cli) -> Option<Value> {
    let mut overrides = json!({});
    if let Some(ref root) = cli.store_root {
        overrides["store"] = json!({ "root": root });
    }
    if let Some(ref dir) = cli.queue_dir {
        overrides["queue"] = json!({ "backend": "fs", "dir": dir });
    }
    if let Some(ref dir) = cli.schema_dir {
        overrides["publish"] = json!({ "schema_dir": dir });
    }
    let empty = overrides.as_object().map_or(true, |o| o.is_empty());
    (!empty).then_some(overrides)
}

fn run_publish(config: &GypsumConfig, args: PublishArgs) -> Result<ExitCode, CliError> {
    let store = open_store(config)?;
    let queue = open_queue(config)?;
    let schemas = SchemaRegistry::from_dir(&config.publish.schema_dir);
    let clock = SystemClock;
    let publisher = Publisher::new(store.as_ref(), queue.as_ref(), &schemas, &clock).with_options(
        PublishOptions {
            concurrency: config.publish.concurrency,
            page_size: config.list.page_size,
        },
    );

    let outcome = match args.issue {
        Some(id) => publisher.run_finalize_job(id)?,
        None => publisher.publish(&direct_request(args)?)?,
    };

    print_json(&json!({
        "project": outcome.project,
        "version": outcome.version,
        "index_time": outcome.index_time.to_rfc3339(),
        "documents": outcome.documents,
        "expiry_job_id": outcome.expiry_job_id,
        "permissions_written": outcome.permissions_written,
        "latest_all_updated": outcome.latest_all_updated,
        "latest_persistent_updated": outcome.latest_persistent_updated,
    }))?;
    Ok(ExitCode::Success)
}

fn direct_request(args: PublishArgs) -> Result<FinalizeRequest, CliError> {
    let (Some(project), Some(version), Some(timestamp)) = (args.project, args.version, args.timestamp)
    else {
        return Err(CliError::Usage(
            "either --issue or --project, --version and --timestamp are required".to_string(),
        ));
    };

    let permissions = match args.permissions {
        Some(path) => {
            let bytes = fs::read(&path).map_err(|e| {
                CliError::Usage(format!("cannot read {}: {}", path.display(), e))
            })?;
            let value: Value = serde_json::from_slice(&bytes).map_err(|e| {
                CliError::Usage(format!("invalid permissions in {}: {}", path.display(), e))
            })?;
            Some(value)
        }
        None => None,
    };

    Ok(FinalizeRequest {
        project,
        version,
        timestamp,
        overwrite_permissions: args.overwrite_permissions,
        permissions,
    })
}

fn run_purge(config: &GypsumConfig) -> Result<ExitCode, CliError> {
    let store = open_store(config)?;
    let queue = open_queue(config)?;
    let clock = SystemClock;
    let summary = Purger::new(store.as_ref(), queue.as_ref(), &clock)
        .with_options(PurgeOptions {
            concurrency: config.purge.concurrency,
            page_size: config.list.page_size,
        })
        .run()?;

    let deleted: Vec<Value> = summary
        .deleted
        .iter()
        .map(|d| {
            json!({
                "project": d.project,
                "version": d.version,
                "objects": d.objects,
                "jobs": d.jobs,
            })
        })
        .collect();
    let failures: Vec<Value> = summary
        .failures
        .iter()
        .map(|f| {
            let report = f.error.report();
            json!({ "job": f.job, "kind": report.kind.as_str(), "message": report.message })
        })
        .collect();

    print_json(&json!({
        "scanned": summary.scanned,
        "voided": summary.voided,
        "deferred": summary.deferred,
        "deleted": deleted,
        "recomputed": summary.recomputed,
        "failures": failures,
    }))?;
    Ok(summary.exit_code())
}

fn run_latest(config: &GypsumConfig, project: &str) -> Result<ExitCode, CliError> {
    let store = open_store(config)?;
    let paths = ProjectPaths::new(project).map_err(GypsumError::from)?;
    let scan = ScanOptions {
        concurrency: config.purge.concurrency,
        page_size: config.list.page_size,
    };
    let recomputed =
        latest::recompute(store.as_ref(), &paths, &BTreeSet::new(), scan).map_err(GypsumError::from)?;

    print_json(&json!({
        "project": project,
        "latest": recomputed.all,
        "latest_persistent": recomputed.persistent,
    }))?;
    Ok(ExitCode::Success)
}

fn open_store(config: &GypsumConfig) -> Result<Box<dyn ObjectStore>, CliError> {
    match config.store.backend {
        StoreBackend::Fs => {
            let store = FsObjectStore::new(&config.store.root).map_err(GypsumError::from)?;
            Ok(Box::new(store))
        }
    }
}

fn open_queue(config: &GypsumConfig) -> Result<Box<dyn JobQueue>, CliError> {
    let queue = &config.queue;
    match queue.backend {
        QueueBackend::Github => {
            let repository = queue
                .repository
                .as_deref()
                .ok_or_else(|| CliError::Usage("queue.repository is not set".to_string()))?;
            let token = std::env::var(TOKEN_ENV)
                .map_err(|_| CliError::Usage(format!("{} is not set", TOKEN_ENV)))?;
            let github = GithubJobQueue::connect(&queue.api_url, repository, &token)
                .map_err(GypsumError::from)?;
            Ok(Box::new(github))
        }
        QueueBackend::Fs => {
            let dir = queue
                .dir
                .as_deref()
                .ok_or_else(|| CliError::Usage("queue.dir is not set".to_string()))?;
            let fs_queue = FsJobQueue::new(dir).map_err(GypsumError::from)?;
            Ok(Box::new(fs_queue))
        }
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| CliError::Usage(format!("cannot serialize output: {}", e)))?;
    println!("{}", text);
    Ok(())
}
