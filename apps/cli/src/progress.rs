//! Progress bar for a transfer session

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast;

use symgrab_core::DownloadEngine;
use symgrab_types::{EngineEvent, SessionState};

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    Canceled,
}

/// Drive a progress bar from engine events until the session returns to
/// idle, returning how it ended.
pub async fn render(
    engine: &DownloadEngine,
    mut events: broadcast::Receiver<EngineEvent>,
) -> SessionOutcome {
    let bar = ProgressBar::new(engine.total_size().unwrap_or(0));
    bar.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}",
            )
            .unwrap()
            .progress_chars("█▓▒░  "),
    );

    let mut outcome = SessionOutcome::Completed;
    loop {
        match events.recv().await {
            Ok(event) => match event {
                EngineEvent::SizeCalculationStarted => {
                    bar.set_message("probing resource sizes");
                }
                EngineEvent::CalculatingSize { index } => {
                    bar.set_message(format!("probing resource {index}"));
                }
                EngineEvent::SizeCalculationComplete => {
                    bar.set_length(engine.total_size().unwrap_or(0));
                }
                EngineEvent::ResourceAttempting { name } => {
                    bar.set_message(name);
                }
                EngineEvent::Progress { total_progress, .. } => {
                    bar.set_position(total_progress);
                }
                EngineEvent::ResourceSucceeded { name } => {
                    bar.println(format!("{} {}", style("✓").green().bold(), name));
                }
                EngineEvent::ResourceFailed { name, reason } => {
                    bar.println(format!(
                        "{} {}: {}",
                        style("✗").red().bold(),
                        name,
                        reason
                    ));
                }
                EngineEvent::Paused => {
                    bar.set_message(format!("{}", style("paused").yellow()));
                }
                EngineEvent::Completed => {
                    outcome = SessionOutcome::Completed;
                    bar.finish_with_message("complete");
                }
                EngineEvent::Canceled => {
                    outcome = SessionOutcome::Canceled;
                    bar.abandon_with_message(format!("{}", style("canceled").dim()));
                }
                EngineEvent::StateChanged {
                    state: SessionState::Idle,
                } => break,
                _ => {}
            },
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    outcome
}
