//! The download engine: session lifecycle, the worker loop and the
//! per-resource retrieval protocol.
//!
//! One engine instance drives at most one session at a time; resources
//! are processed strictly in list order by a single background task.
//! The controlling context interacts through `start`/`pause`/`resume`/
//! `stop` and the event subscription; all of those are safe to call from
//! a different task than the worker.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::broadcast;
use tokio_util::io::StreamReader;
use tracing::{info, warn};

use symgrab_types::{underscore_variant, EngineEvent, FileResource, SessionState};

use crate::engine::probe::{self, ProbeHit, SizeProbe};
use crate::engine::session::SessionShared;
use crate::engine::transfer::{copy_chunked, TransferSettings};
use crate::error::SymgrabError;
use crate::expand::{decompressed_sibling, Decompressor, ExpandTool, DEFAULT_EXPAND_COMMAND};
use crate::sink::{ErrorSink, TracingSink};

/// Default transfer chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Default number of chunk reads per speed-measurement window.
pub const DEFAULT_STOPWATCH_CYCLES: u32 = 5;

/// Client identifier sent with every store request.
pub const DEFAULT_USER_AGENT: &str = "Microsoft-Symbol-Server/6.13.0009.1140";

/// Engine configuration, applied per session at `start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root directory resources are materialized under.
    pub download_location: PathBuf,
    /// Transfer chunk size in bytes.
    pub chunk_size: usize,
    /// Chunk reads per speed-measurement window.
    pub stopwatch_cycles: u32,
    /// On cancel, also delete the files already completed this session.
    pub delete_completed_files_after_cancel: bool,
    /// Probe every resource's size before transferring, enabling the
    /// total-size and total-percentage accessors.
    pub track_total_size: bool,
    /// User-Agent header for store requests.
    pub user_agent: String,
    /// Upper bound on one decompression run, in seconds.
    pub decompress_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            download_location: PathBuf::from("symcache"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            stopwatch_cycles: DEFAULT_STOPWATCH_CYCLES,
            delete_completed_files_after_cancel: true,
            track_total_size: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            decompress_timeout_secs: 600,
        }
    }
}

/// Sequential symbol download engine with a pausable, cancelable session.
pub struct DownloadEngine {
    config: EngineConfig,
    client: Client,
    shared: Arc<SessionShared>,
    event_tx: broadcast::Sender<EngineEvent>,
    decompressor: Arc<dyn Decompressor>,
    sink: Arc<dyn ErrorSink>,
}

impl DownloadEngine {
    pub fn new(config: EngineConfig) -> Self {
        let expand = ExpandTool::new(
            DEFAULT_EXPAND_COMMAND,
            Duration::from_secs(config.decompress_timeout_secs),
        );
        Self::with_collaborators(config, Arc::new(expand), Arc::new(TracingSink))
    }

    /// Build an engine with explicit collaborators instead of the OS
    /// expand tool and the tracing sink.
    pub fn with_collaborators(
        config: EngineConfig,
        decompressor: Arc<dyn Decompressor>,
        sink: Arc<dyn ErrorSink>,
    ) -> Self {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .build()
            .expect("Failed to create HTTP client");
        let (event_tx, _) = broadcast::channel(1024);
        let shared = Arc::new(SessionShared::default());
        shared
            .delete_completed_after_cancel
            .store(config.delete_completed_files_after_cancel, Ordering::Release);

        Self {
            config,
            client,
            shared,
            event_tx,
            decompressor,
            sink,
        }
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }

    // ========================================================================
    // Session control
    // ========================================================================

    /// Replace the resource list. Rejected while a session is active.
    pub fn set_resources(&self, resources: Vec<FileResource>) -> Result<(), SymgrabError> {
        if self.shared.is_busy() {
            return Err(SymgrabError::InvalidState(
                "cannot change the resource list during a session".to_string(),
            ));
        }
        *self.shared.resources.lock() = resources;
        Ok(())
    }

    /// Current resource list.
    pub fn resources(&self) -> Vec<FileResource> {
        self.shared.resources.lock().clone()
    }

    /// Start a session: reset counters and spawn the worker task.
    pub fn start(&self) -> Result<(), SymgrabError> {
        self.shared
            .transition(&[SessionState::Idle], SessionState::Running)
            .map_err(|state| {
                SymgrabError::InvalidState(format!("cannot start a session while {state:?}"))
            })?;

        self.shared.reset_counters();
        self.shared.paused.store(false, Ordering::Release);
        self.shared.cancel_requested.store(false, Ordering::Release);
        self.shared.delete_completed_after_cancel.store(
            self.config.delete_completed_files_after_cancel,
            Ordering::Release,
        );

        let worker = SessionWorker {
            config: self.config.clone(),
            client: self.client.clone(),
            shared: Arc::clone(&self.shared),
            event_tx: self.event_tx.clone(),
            decompressor: Arc::clone(&self.decompressor),
            sink: Arc::clone(&self.sink),
        };
        tokio::spawn(worker.run());

        self.emit(EngineEvent::Started);
        self.emit(EngineEvent::BusyChanged { busy: true });
        self.emit(EngineEvent::StateChanged {
            state: SessionState::Running,
        });
        Ok(())
    }

    /// Pause the running session between chunk reads.
    pub fn pause(&self) -> Result<(), SymgrabError> {
        self.shared
            .transition(&[SessionState::Running], SessionState::Paused)
            .map_err(|state| {
                SymgrabError::InvalidState(format!("cannot pause while {state:?}"))
            })?;
        self.shared.paused.store(true, Ordering::Release);
        self.emit(EngineEvent::Paused);
        self.emit(EngineEvent::StateChanged {
            state: SessionState::Paused,
        });
        Ok(())
    }

    /// Resume a paused session.
    pub fn resume(&self) -> Result<(), SymgrabError> {
        self.shared
            .transition(&[SessionState::Paused], SessionState::Running)
            .map_err(|state| {
                SymgrabError::InvalidState(format!("cannot resume while {state:?}"))
            })?;
        self.shared.paused.store(false, Ordering::Release);
        self.emit(EngineEvent::Resumed);
        self.emit(EngineEvent::StateChanged {
            state: SessionState::Running,
        });
        Ok(())
    }

    /// Request cancellation of the session. The worker checks the flag
    /// between chunks and between resources.
    pub fn stop(&self) -> Result<(), SymgrabError> {
        self.shared
            .transition(
                &[SessionState::Running, SessionState::Paused],
                SessionState::CancelRequested,
            )
            .map_err(|state| {
                SymgrabError::InvalidState(format!("cannot stop while {state:?}"))
            })?;
        self.shared.cancel_requested.store(true, Ordering::Release);
        self.shared.paused.store(false, Ordering::Release);
        self.emit(EngineEvent::CancelRequested);
        self.emit(EngineEvent::StateChanged {
            state: SessionState::CancelRequested,
        });
        Ok(())
    }

    /// Request cancellation, overriding the cleanup policy for this stop.
    pub fn stop_and(&self, delete_completed_files: bool) -> Result<(), SymgrabError> {
        self.shared
            .delete_completed_after_cancel
            .store(delete_completed_files, Ordering::Release);
        self.stop()
    }

    // ========================================================================
    // Telemetry accessors
    // ========================================================================

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn is_busy(&self) -> bool {
        self.shared.is_busy()
    }

    pub fn is_paused(&self) -> bool {
        self.shared.is_paused()
    }

    fn require_size_tracking(&self) -> Result<(), SymgrabError> {
        if self.config.track_total_size {
            Ok(())
        } else {
            Err(SymgrabError::InvalidState(
                "size pre-calculation is disabled for this session".to_string(),
            ))
        }
    }

    /// Total expected size of the session. Only valid when size
    /// pre-calculation is enabled.
    pub fn total_size(&self) -> Result<u64, SymgrabError> {
        self.require_size_tracking()?;
        Ok(self.shared.total_size.load(Ordering::Acquire))
    }

    pub fn total_progress(&self) -> u64 {
        self.shared.total_progress.load(Ordering::Acquire)
    }

    pub fn current_file_progress(&self) -> u64 {
        self.shared.current_file_progress.load(Ordering::Acquire)
    }

    pub fn current_file_size(&self) -> u64 {
        self.shared.current_file_size.load(Ordering::Acquire)
    }

    /// Instantaneous transfer speed in bytes per second.
    pub fn speed(&self) -> u64 {
        self.shared.speed.load(Ordering::Acquire)
    }

    /// Completed share of the whole session, rounded to two decimals.
    /// Only valid when size pre-calculation is enabled.
    pub fn total_percentage(&self) -> Result<f64, SymgrabError> {
        let total = self.total_size()?;
        if total == 0 {
            return Ok(0.0);
        }
        Ok(round2(
            self.total_progress() as f64 / total as f64 * 100.0,
        ))
    }

    /// Completed share of the current file, rounded to two decimals.
    pub fn current_file_percentage(&self) -> f64 {
        let size = self.current_file_size();
        if size == 0 {
            return 0.0;
        }
        round2(self.current_file_progress() as f64 / size as f64 * 100.0)
    }

    /// Resources that could not be located, by name, with the reason.
    pub fn failed_resources(&self) -> HashMap<String, String> {
        self.shared.failures.lock().clone()
    }

    /// The resource the session is currently processing.
    pub fn current_resource(&self) -> Option<FileResource> {
        let index = self.shared.current_index.load(Ordering::Acquire);
        self.shared.resources.lock().get(index).cloned()
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ============================================================================
// Worker
// ============================================================================

/// The single background task processing one session.
struct SessionWorker {
    config: EngineConfig,
    client: Client,
    shared: Arc<SessionShared>,
    event_tx: broadcast::Sender<EngineEvent>,
    decompressor: Arc<dyn Decompressor>,
    sink: Arc<dyn ErrorSink>,
}

impl SessionWorker {
    fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }

    async fn run(self) {
        if self.config.track_total_size {
            self.calculate_total_size().await;
        }

        if let Err(e) = fs::create_dir_all(&self.config.download_location).await {
            self.sink
                .record("download location", &e.to_string());
        }

        let count = self.shared.resources.lock().len();
        let mut index = 0;
        while index < count && !self.shared.is_cancel_requested() {
            self.shared.current_index.store(index, Ordering::Release);
            let resource = match self.shared.resources.lock().get(index).cloned() {
                Some(resource) => resource,
                None => break,
            };

            if let Err(e) = self.download_resource(index, &resource).await {
                // Transport errors skip the resource; the session goes on.
                self.sink.record(&resource.name, &e.to_string());
                self.emit(EngineEvent::ResourceFailed {
                    name: resource.name.clone(),
                    reason: e.to_string(),
                });
            }
            self.emit(EngineEvent::ResourceStopped {
                name: resource.name.clone(),
            });

            if self.shared.is_cancel_requested() {
                self.emit(EngineEvent::DeletingFilesAfterCancel);
                self.cleanup_after_cancel(index).await;
            } else {
                index += 1;
            }
        }

        self.finish();
    }

    /// Probe every resource with the HEAD tiers and sum the sizes.
    async fn calculate_total_size(&self) {
        self.emit(EngineEvent::SizeCalculationStarted);
        let resources = self.shared.resources.lock().clone();
        let mut total: u64 = 0;
        for (i, resource) in resources.iter().enumerate() {
            self.emit(EngineEvent::CalculatingSize { index: i + 1 });
            match probe::probe_size(&self.client, resource).await {
                Ok(SizeProbe::Found(size)) => total += size,
                Ok(SizeProbe::Absent(reason)) => {
                    self.shared.record_failure(&resource.name, reason);
                }
                Err(e) => self.sink.record(&resource.name, &e.to_string()),
            }
        }
        self.shared.total_size.store(total, Ordering::Release);
        self.emit(EngineEvent::SizeCalculationComplete);
    }

    async fn download_resource(
        &self,
        index: usize,
        resource: &FileResource,
    ) -> Result<(), SymgrabError> {
        self.shared.current_file_progress.store(0, Ordering::Release);
        self.shared.current_file_size.store(0, Ordering::Release);
        self.emit(EngineEvent::ResourceAttempting {
            name: resource.name.clone(),
        });

        let settings = TransferSettings {
            chunk_size: self.config.chunk_size,
            stopwatch_cycles: self.config.stopwatch_cycles,
        };

        match probe::locate(&self.client, resource).await? {
            ProbeHit::Absent { reason } => {
                warn!(name = %resource.name, %reason, "resource not found on any tier");
                self.shared.record_failure(&resource.name, reason.clone());
                self.emit(EngineEvent::ResourceFailed {
                    name: resource.name.clone(),
                    reason,
                });
                Ok(())
            }

            ProbeHit::LocalCopy { path, size } => {
                info!(name = %resource.name, source = %path.display(), "using local copy");
                let dir = self.resource_dir(resource);
                fs::create_dir_all(&dir).await?;
                self.shared.current_file_size.store(size, Ordering::Release);

                let dest = dir.join(&resource.name);
                let mut reader = fs::File::open(&path).await?;
                let mut writer = fs::File::create(&dest).await?;
                self.emit(EngineEvent::ResourceStarted {
                    name: resource.name.clone(),
                });
                copy_chunked(
                    &mut reader,
                    &mut writer,
                    size,
                    &resource.name,
                    &self.shared,
                    &self.event_tx,
                    settings,
                )
                .await?;

                if !self.shared.is_cancel_requested() {
                    self.emit(EngineEvent::ResourceSucceeded {
                        name: resource.name.clone(),
                    });
                }
                Ok(())
            }

            ProbeHit::Direct { response, size } => {
                self.stream_to_disk(resource, response, size, false, settings)
                    .await
            }

            ProbeHit::Compressed { response, size } => {
                // Remember the compressed naming on the session's entry.
                if let Some(entry) = self.shared.resources.lock().get_mut(index) {
                    entry.mark_compressed();
                }
                self.stream_to_disk(resource, response, size, true, settings)
                    .await
            }
        }
    }

    /// Stream a located response body into the resource's destination
    /// file, then run decompression when the source was compressed.
    async fn stream_to_disk(
        &self,
        resource: &FileResource,
        response: reqwest::Response,
        size: u64,
        compressed: bool,
        settings: TransferSettings,
    ) -> Result<(), SymgrabError> {
        let dir = self.resource_dir(resource);
        fs::create_dir_all(&dir).await?;
        self.shared.current_file_size.store(size, Ordering::Release);

        let local_name = if compressed {
            underscore_variant(&resource.name)
        } else {
            resource.name.clone()
        };
        let dest = dir.join(&local_name);

        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        let mut reader = StreamReader::new(stream);
        let mut writer = fs::File::create(&dest).await?;

        self.emit(EngineEvent::ResourceStarted {
            name: local_name.clone(),
        });
        copy_chunked(
            &mut reader,
            &mut writer,
            size,
            &local_name,
            &self.shared,
            &self.event_tx,
            settings,
        )
        .await?;
        drop(writer);

        if self.shared.is_cancel_requested() {
            return Ok(());
        }

        if compressed {
            match self.decompressor.decompress(&dest).await {
                Ok(expanded) => {
                    info!(target_path = %expanded.display(), "expanded compressed resource");
                    if let Err(e) = fs::remove_file(&dest).await {
                        self.sink.record(&local_name, &e.to_string());
                    }
                }
                Err(e) => {
                    // Compressed file is retained for a manual retry.
                    self.sink.record(&local_name, &e.to_string());
                }
            }
        }

        self.emit(EngineEvent::ResourceSucceeded { name: local_name });
        Ok(())
    }

    /// Delete session files per the cleanup policy: everything completed
    /// so far, or only the current partial file.
    async fn cleanup_after_cancel(&self, current: usize) {
        let delete_completed = self
            .shared
            .delete_completed_after_cancel
            .load(Ordering::Acquire);
        let resources = self.shared.resources.lock().clone();
        let start = if delete_completed { 0 } else { current };
        for resource in resources.iter().take(current + 1).skip(start) {
            remove_resource_files(&self.config.download_location, resource).await;
        }
    }

    fn resource_dir(&self, resource: &FileResource) -> PathBuf {
        self.config
            .download_location
            .join(&resource.name)
            .join(&resource.identity_folder)
    }

    /// Terminal notifications fire in a fixed order: the terminal state,
    /// stopped, busy-changed, state-changed.
    fn finish(&self) {
        let canceled = self.shared.is_cancel_requested();
        let terminal = if canceled {
            SessionState::Canceled
        } else {
            SessionState::Completed
        };
        self.shared.set_state(terminal);
        self.shared.paused.store(false, Ordering::Release);

        self.emit(if canceled {
            EngineEvent::Canceled
        } else {
            EngineEvent::Completed
        });
        self.emit(EngineEvent::Stopped);
        self.shared.set_state(SessionState::Idle);
        self.emit(EngineEvent::BusyChanged { busy: false });
        self.emit(EngineEvent::StateChanged {
            state: SessionState::Idle,
        });
        info!(canceled, "session finished");
    }
}

/// Remove a resource's materialized files. A compressed resource may have
/// left both the underscored artifact and its expanded sibling; its
/// directory is named after the original (expanded) file name.
async fn remove_resource_files(location: &Path, resource: &FileResource) {
    let dir_name = if resource.compressed {
        decompressed_sibling(Path::new(&resource.name))
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| resource.name.clone())
    } else {
        resource.name.clone()
    };
    let dir = location.join(&dir_name).join(&resource.identity_folder);
    for candidate in [&resource.name, &dir_name] {
        let _ = fs::remove_file(dir.join(candidate)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn engine(config: EngineConfig) -> DownloadEngine {
        DownloadEngine::new(config)
    }

    fn sample_resources() -> Vec<FileResource> {
        vec![
            FileResource::new("https://sym.example.com/a.pdb/AAAA1/a.pdb"),
            FileResource::new("https://sym.example.com/b.pdb/BBBB1/b.pdb"),
        ]
    }

    #[tokio::test]
    async fn lifecycle_operations_require_valid_states() {
        let engine = engine(EngineConfig::default());
        assert!(engine.pause().unwrap_err().is_invalid_state());
        assert!(engine.resume().unwrap_err().is_invalid_state());
        assert!(engine.stop().unwrap_err().is_invalid_state());
    }

    #[tokio::test]
    async fn size_accessors_require_tracking() {
        let engine = engine(EngineConfig {
            track_total_size: false,
            ..EngineConfig::default()
        });
        assert!(engine.total_size().unwrap_err().is_invalid_state());
        assert!(engine.total_percentage().unwrap_err().is_invalid_state());
    }

    #[tokio::test]
    async fn total_percentage_reads_counters() {
        let engine = engine(EngineConfig {
            track_total_size: true,
            ..EngineConfig::default()
        });
        assert_eq!(engine.total_percentage().unwrap(), 0.0);

        engine.shared.total_size.store(6000, Ordering::Release);
        engine.shared.total_progress.store(6000, Ordering::Release);
        assert_eq!(engine.total_percentage().unwrap(), 100.0);

        engine.shared.total_progress.store(1500, Ordering::Release);
        assert_eq!(engine.total_percentage().unwrap(), 25.0);
    }

    #[tokio::test]
    async fn current_file_percentage_handles_unknown_size() {
        let engine = engine(EngineConfig::default());
        assert_eq!(engine.current_file_percentage(), 0.0);
        engine.shared.current_file_size.store(2000, Ordering::Release);
        engine
            .shared
            .current_file_progress
            .store(500, Ordering::Release);
        assert_eq!(engine.current_file_percentage(), 25.0);
    }

    #[tokio::test]
    async fn resource_list_is_locked_while_busy() {
        let engine = engine(EngineConfig::default());
        engine.set_resources(sample_resources()).unwrap();

        engine.shared.set_state(SessionState::Running);
        let err = engine.set_resources(Vec::new()).unwrap_err();
        assert!(err.is_invalid_state());
        assert_eq!(engine.resources().len(), 2);

        engine.shared.set_state(SessionState::Idle);
        engine.set_resources(Vec::new()).unwrap();
        assert!(engine.resources().is_empty());
    }

    #[tokio::test]
    async fn start_is_rejected_while_busy() {
        let engine = engine(EngineConfig::default());
        engine.shared.set_state(SessionState::Running);
        assert!(engine.start().unwrap_err().is_invalid_state());
    }

    #[tokio::test]
    async fn stop_and_overrides_cleanup_policy() {
        let engine = engine(EngineConfig {
            delete_completed_files_after_cancel: true,
            ..EngineConfig::default()
        });
        engine.shared.set_state(SessionState::Running);
        engine.stop_and(false).unwrap();
        assert!(!engine
            .shared
            .delete_completed_after_cancel
            .load(Ordering::Acquire));
        assert_eq!(engine.state(), SessionState::CancelRequested);
    }

    #[tokio::test]
    async fn empty_session_completes_with_ordered_terminal_events() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(EngineConfig {
            download_location: dir.path().to_path_buf(),
            ..EngineConfig::default()
        });
        let mut events = engine.subscribe();
        engine.start().unwrap();

        let mut seen = Vec::new();
        loop {
            let event = timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("session did not finish")
                .expect("event channel closed");
            let is_last = matches!(
                event,
                EngineEvent::StateChanged {
                    state: SessionState::Idle
                }
            );
            seen.push(event);
            if is_last {
                break;
            }
        }

        let tail: Vec<String> = seen
            .iter()
            .rev()
            .take(4)
            .map(|e| format!("{e:?}"))
            .collect();
        assert_eq!(tail[3], "Completed");
        assert_eq!(tail[2], "Stopped");
        assert!(tail[1].starts_with("BusyChanged"));
        assert!(tail[0].starts_with("StateChanged"));

        assert_eq!(engine.state(), SessionState::Idle);
        assert!(!engine.is_busy());
    }

    #[tokio::test]
    async fn cleanup_removes_partial_and_completed_files() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path();

        let completed = FileResource::new("https://sym.example.com/a.pdb/AAAA1/a.pdb");
        let mut compressed = FileResource::new("https://sym.example.com/b.pdb/BBBB1/b.pdb");
        compressed.mark_compressed();

        for (folder, file) in [
            ("a.pdb/AAAA1", "a.pdb"),
            ("b.pdb/BBBB1", "b.pd_"),
            ("b.pdb/BBBB1", "b.pdb"),
        ] {
            let folder_dir = location.join(folder);
            fs::create_dir_all(&folder_dir).await.unwrap();
            fs::write(folder_dir.join(file), b"data").await.unwrap();
        }

        // Partial-only cleanup keeps the completed file.
        remove_resource_files(location, &compressed).await;
        assert!(location.join("a.pdb/AAAA1/a.pdb").exists());
        assert!(!location.join("b.pdb/BBBB1/b.pd_").exists());
        assert!(!location.join("b.pdb/BBBB1/b.pdb").exists());

        remove_resource_files(location, &completed).await;
        assert!(!location.join("a.pdb/AAAA1/a.pdb").exists());
    }
}
