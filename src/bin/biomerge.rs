//! biomerge CLI: fold configured biological sources into one graph.
//!
//! Usage:
//!   biomerge run <config>
//!   biomerge resume <config>
//!   biomerge status <config>
//!   biomerge ontology <config>

use biomerge::pipeline::load_base_registry;
use biomerge::{
    Manifest, OpenStore, Pipeline, PipelineConfig, RunMode, RunStatus, SqliteStore, StateStore,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "biomerge",
    version,
    about = "Ontology-driven harmonization of biological databases"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every source from scratch
    Run {
        /// Pipeline config (YAML)
        config: PathBuf,
    },
    /// Continue a previous run, reusing completed sources
    Resume {
        /// Pipeline config (YAML)
        config: PathBuf,
    },
    /// Show the recorded state of each source
    Status {
        /// Pipeline config (YAML)
        config: PathBuf,
    },
    /// Print the base ontology with core types as YAML
    Ontology {
        /// Pipeline config (YAML)
        config: PathBuf,
    },
}

fn load_config(path: &Path) -> Result<PipelineConfig, String> {
    PipelineConfig::load(path).map_err(|e| format!("Failed to load config: {}", e))
}

fn cmd_run(config_path: &Path, mode: RunMode) -> i32 {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let pipeline = match Pipeline::open(config) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to create tokio runtime: {}", e);
            return 1;
        }
    };

    rt.block_on(async {
        let token = pipeline.cancellation_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling current source");
                token.cancel();
            }
        });

        match pipeline.run(mode).await {
            Ok(manifest) => {
                print_summary(&manifest);
                let all_completed = manifest
                    .runs
                    .iter()
                    .all(|run| matches!(run.status, RunStatus::Completed | RunStatus::Skipped));
                if all_completed {
                    0
                } else {
                    2
                }
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        }
    })
}

fn print_summary(manifest: &Manifest) {
    println!(
        "{:<24}  {:<10}  {:>9}  {:>9}  {:>9}",
        "SOURCE", "STATUS", "EMITTED", "REJECTED", "CONFLICTS"
    );
    println!("{}", "-".repeat(71));
    for run in &manifest.runs {
        println!(
            "{:<24}  {:<10}  {:>9}  {:>9}  {:>9}",
            run.adapter_name,
            run.status.to_string(),
            run.records_emitted,
            run.records_rejected,
            run.conflicts
        );
        if let Some(error) = &run.error {
            println!("    {}", error);
        }
    }
    println!();
    println!(
        "{} entities, {} relations, schema revision {}",
        manifest.entity_count, manifest.relation_count, manifest.schema_revision
    );
}

fn cmd_status(config_path: &Path) -> i32 {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let db_path = config.state_db_path();
    if !db_path.exists() {
        println!("No runs recorded.");
        return 0;
    }
    let store = match SqliteStore::open(&db_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: Failed to open database: {}", e);
            return 1;
        }
    };
    let runs = match store.load_runs() {
        Ok(runs) => runs,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    if runs.is_empty() {
        println!("No runs recorded.");
        return 0;
    }
    println!(
        "{:>3}  {:<24}  {:<10}  {:>9}  {:<25}",
        "#", "SOURCE", "STATUS", "EMITTED", "FINISHED"
    );
    println!("{}", "-".repeat(79));
    for run in runs {
        let finished = run
            .finished_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>3}  {:<24}  {:<10}  {:>9}  {:<25}",
            run.sequence_index,
            run.adapter_name,
            run.status.to_string(),
            run.records_emitted,
            finished
        );
    }
    0
}

fn cmd_ontology(config_path: &Path) -> i32 {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let registry = match load_base_registry(&config) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match biomerge::ontology::render_document(&registry) {
        Ok(yaml) => {
            print!("{}", yaml);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Run { config } => cmd_run(&config, RunMode::Fresh),
        Commands::Resume { config } => cmd_run(&config, RunMode::Resume),
        Commands::Status { config } => cmd_status(&config),
        Commands::Ontology { config } => cmd_ontology(&config),
    };
    std::process::exit(code);
}
