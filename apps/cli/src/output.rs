//! Output formatting utilities

use anyhow::Result;
use console::style;

use crate::progress::SessionOutcome;
use symgrab_core::DownloadEngine;
use symgrab_types::format_size_binary;

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Print the end-of-session summary in the requested format.
pub fn print_summary(
    engine: &DownloadEngine,
    outcome: SessionOutcome,
    format: OutputFormat,
) -> Result<()> {
    let failures = engine.failed_resources();

    match format {
        OutputFormat::Json => {
            let summary = serde_json::json!({
                "canceled": outcome == SessionOutcome::Canceled,
                "downloaded_bytes": engine.total_progress(),
                "total_bytes": engine.total_size().ok(),
                "failures": failures,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        OutputFormat::Human => {
            if outcome == SessionOutcome::Canceled {
                println!(
                    "{} session canceled after {}",
                    style("○").dim(),
                    format_size_binary(engine.total_progress())
                );
            } else {
                println!(
                    "{} retrieved {} of symbol data",
                    style("✓").green().bold(),
                    format_size_binary(engine.total_progress())
                );
            }
            if !failures.is_empty() {
                println!("{} unresolved:", style(failures.len()).red().bold());
                for (name, reason) in &failures {
                    println!("  {} {}", style(name).cyan(), reason);
                }
            }
        }
    }

    Ok(())
}
