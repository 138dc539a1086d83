//! mantra CLI tool
//!
//! Command-line driver for compiling and indexing quiz trees with mantra-core.
//!
//! ## Commands
//!
//! - `sync`: Rescan the source and destination trees and rewrite the index
//! - `list`: Print the index, grouped by category
//! - `compile <id>...`: Compile tests and wait for them (`--all-stale` picks every Creatable or
//!   Updatable test)
//! - `status <id>`: Index flags and job log of one test
//! - `parse <file>`: Print the questions of one document as JSON without writing anything
//! - `clean <id>`: Remove the output of an orphaned test
//!
//! Settings come from `mantra.toml` in the directory given with `--dir` (default: the current
//! directory). Set `RUST_LOG` to change the log level.

use clap::{Parser, Subcommand};
use mantra_core::{
    config::TomlConfigProvider,
    index::{TestId, TestIndexEntry},
    jobs::CompileRequest,
    service::Mantra,
    MantraError,
};
use std::{path::PathBuf, time::Duration};

#[derive(Parser)]
#[command(name = "mantra")]
#[command(author, version, about = "Compile markdown quiz trees into question records", long_about = None)]
struct Cli {
    /// Directory holding mantra.toml
    #[arg(short, long, default_value = ".", global = true)]
    dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rescan both trees and rewrite the index
    Sync,

    /// Print the index
    List {
        /// Only tests of this category
        #[arg(long)]
        category: Option<String>,
    },

    /// Compile tests and wait for the jobs to finish
    Compile {
        /// Test ids to compile
        ids: Vec<TestId>,

        /// Compile every Creatable or Updatable test
        #[arg(long)]
        all_stale: bool,

        /// Seconds to wait for each job
        #[arg(long, default_value = "300")]
        timeout: u64,
    },

    /// Show index flags and the job log of one test
    Status {
        id: TestId,
    },

    /// Print the questions of one document as JSON
    Parse {
        file: PathBuf,
    },

    /// Remove the output of an orphaned test
    Clean {
        id: TestId,
    },
}

fn print_entry(entry: &TestIndexEntry) {
    let status = entry
        .status()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string());
    let errors = if entry.has_errors() { " !" } else { "" };
    println!(
        "  {} {:<10}{} {:>3}q  score {:>3}  {}",
        entry.test_id,
        status,
        errors,
        entry.numq,
        entry.score,
        entry.src_file.display()
    );
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mantra = Mantra::from_provider(&TomlConfigProvider::in_dir(&cli.dir))?;

    match cli.command {
        Commands::Sync => {
            let index = mantra.sync()?;
            println!("{} tests indexed in {:?}", index.len(), mantra.config().index_path());
        }

        Commands::List { category } => {
            let index = mantra.index();
            for (name, entries) in index.by_category() {
                if category.as_deref().is_some_and(|wanted| wanted != name) {
                    continue;
                }
                println!("{}", if name.is_empty() { "(orphaned)" } else { name });
                for entry in entries {
                    print_entry(entry);
                }
            }
        }

        Commands::Compile {
            ids,
            all_stale,
            timeout,
        } => {
            let mut requests = if all_stale {
                mantra.compile_stale()?
            } else {
                Vec::new()
            };
            for id in &ids {
                requests.push(mantra.request_compile(id)?);
            }
            if requests.is_empty() {
                println!("Nothing to compile");
            }
            let mut failed = 0;
            for request in &requests {
                if let CompileRequest::Joined(id) = request {
                    println!("{id}: already being compiled, waiting");
                }
                let id = request.test_id();
                if !mantra.wait(id, Duration::from_secs(timeout)) {
                    println!("{id}: still running after {timeout}s");
                    continue;
                }
                let report = mantra.query_status(id)?;
                match report.error {
                    Some(e) => {
                        failed += 1;
                        println!("{id}: failed: {e}");
                    }
                    None => println!(
                        "{id}: {}",
                        report.status.map(|s| s.to_string()).unwrap_or_default()
                    ),
                }
            }
            if failed > 0 {
                return Err(MantraError::Custom(format!("{failed} compiles failed")).into());
            }
        }

        Commands::Status { id } => {
            let report = mantra.query_status(&id)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Parse { file } => {
            let doc = mantra.parse_file(&file)?;
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }

        Commands::Clean { id } => {
            mantra.remove_orphan(&id)?;
            println!("{id}: removed");
        }
    }
    Ok(())
}
