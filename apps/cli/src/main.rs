//! Symgrab CLI - symbol file retriever
//!
//! Resolves each module's debug identity from its executable headers and
//! downloads the matching PDBs from a symbol store.

mod output;
mod progress;

use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use symgrab_core::pe::read_debug_identity;
use symgrab_core::{DownloadEngine, EngineConfig, SymbolStore};
use symgrab_types::FileResource;

/// Symgrab - Symbol store downloader
#[derive(Parser)]
#[command(name = "symgrab")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Destination directory for retrieved symbol files
    destination: PathBuf,

    /// `|`-delimited list of executable modules to resolve
    modules: String,

    /// Symbol store base URL
    #[arg(
        long,
        env = "SYMGRAB_SERVER",
        default_value = symgrab_core::DEFAULT_SYMBOL_SERVER
    )]
    server: String,

    /// Output format
    #[arg(long, default_value = "human")]
    output: output::OutputFormat,

    /// Keep files already completed when the session is canceled
    #[arg(long)]
    keep_on_cancel: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "symgrab=debug"
    } else {
        "symgrab=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    let store = SymbolStore::new(&cli.server)?;
    let resources = resolve_modules(&store, &cli.modules);
    if resources.is_empty() {
        bail!("none of the modules carry a usable debug identity");
    }

    let config = EngineConfig {
        download_location: cli.destination.clone(),
        track_total_size: true,
        delete_completed_files_after_cancel: !cli.keep_on_cancel,
        ..EngineConfig::default()
    };
    let engine = Arc::new(DownloadEngine::new(config));
    engine.set_resources(resources)?;

    let events = engine.subscribe();
    engine.start()?;

    // Ctrl-C requests a cooperative cancel; the session cleans up per
    // its policy and still reports a summary.
    let stopper = Arc::clone(&engine);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = stopper.stop();
        }
    });

    let outcome = progress::render(&engine, events).await;
    output::print_summary(&engine, outcome, cli.output)?;

    let failures = engine.failed_resources();
    if !failures.is_empty() && failures.len() >= engine.resources().len() {
        bail!("no resources could be retrieved");
    }
    Ok(())
}

/// Extract each module's debug identity and turn it into a store resource.
/// Modules without an identity are skipped with a warning.
fn resolve_modules(store: &SymbolStore, modules: &str) -> Vec<FileResource> {
    let mut resources = Vec::new();
    for module in modules.split('|').map(str::trim).filter(|m| !m.is_empty()) {
        match read_debug_identity(module) {
            Ok(identity) => match store.resource_url(&identity) {
                Some(url) => resources.push(FileResource::new(url)),
                None => warn!(module, "module has no debug identity record"),
            },
            Err(e) => warn!(module, error = %e, "failed to read module"),
        }
    }
    resources
}
