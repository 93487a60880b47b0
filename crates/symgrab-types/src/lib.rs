//! Shared types for Symgrab
//!
//! This crate contains the data structures shared between the download
//! engine and the CLI front end.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Debug Identity
// ============================================================================

/// The debug identity extracted from an executable's CodeView record.
///
/// An executable without a matching record yields an empty identity; callers
/// must check [`DebugIdentity::is_empty`] before building a store path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugIdentity {
    /// File name of the matching PDB (for example `kernel32.pdb`).
    pub pdb_name: String,
    /// PDB age, formatted as uppercase hex with no padding.
    pub age: String,
    /// The 128-bit signature GUID of the PDB.
    pub guid: Uuid,
}

impl DebugIdentity {
    pub fn new(pdb_name: String, age: String, guid: Uuid) -> Self {
        Self {
            pdb_name,
            age,
            guid,
        }
    }

    /// True when no CodeView record was found for the module.
    pub fn is_empty(&self) -> bool {
        self.pdb_name.is_empty()
    }

    /// The symbol-store directory segment: 32 uppercase hex digits of the
    /// GUID followed by the hex age.
    pub fn identity_folder(&self) -> String {
        format!(
            "{}{}",
            self.guid.simple().to_string().to_uppercase(),
            self.age
        )
    }
}

// ============================================================================
// File Resources
// ============================================================================

/// A candidate remote resource to retrieve from the symbol store.
///
/// `name` and `identity_folder` are derived from `remote_path`; the path
/// itself is never rewritten after construction. Only `name` and
/// `compressed` change, when the compressed-variant probe succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileResource {
    pub remote_path: String,
    /// Local file name: the last path segment.
    pub name: String,
    /// Store directory segment encoding GUID+age: the second-to-last segment.
    pub identity_folder: String,
    /// Set when only the compressed variant exists on the store.
    pub compressed: bool,
}

impl FileResource {
    pub fn new(remote_path: impl Into<String>) -> Self {
        let remote_path = remote_path.into();
        let name = remote_path
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let identity_folder = remote_path
            .rsplit('/')
            .nth(1)
            .unwrap_or_default()
            .to_string();

        Self {
            remote_path,
            name,
            identity_folder,
            compressed: false,
        }
    }

    /// Record that only the compressed variant exists: the local name takes
    /// the store's underscore convention.
    pub fn mark_compressed(&mut self) {
        self.name = underscore_variant(&self.name);
        self.compressed = true;
    }
}

/// The store's compressed-file naming convention: the final character is
/// dropped and an underscore appended (`foo.pdb` becomes `foo.pd_`).
pub fn underscore_variant(name: &str) -> String {
    let mut variant: String = name.chars().take(name.chars().count().saturating_sub(1)).collect();
    variant.push('_');
    variant
}

// ============================================================================
// Session State
// ============================================================================

/// Lifecycle state of a transfer session.
///
/// `Paused` is only reachable from `Running`; `CancelRequested` from
/// `Running` or `Paused`. After a terminal `Completed` or `Canceled` the
/// engine returns to `Idle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Running,
    Paused,
    CancelRequested,
    Completed,
    Canceled,
}

impl SessionState {
    /// A session is considered busy from start until its terminal event.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            SessionState::Running | SessionState::Paused | SessionState::CancelRequested
        )
    }
}

// ============================================================================
// Engine Events
// ============================================================================

/// Events emitted by the download engine to its subscribers.
///
/// Per resource the order is attempting, started, progress*,
/// succeeded/failed, stopped. Per session the terminal event fires first,
/// then `Stopped`, `BusyChanged` and `StateChanged`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EngineEvent {
    Started,
    Paused,
    Resumed,
    CancelRequested,
    DeletingFilesAfterCancel,
    Completed,
    Canceled,
    Stopped,
    BusyChanged {
        busy: bool,
    },
    StateChanged {
        state: SessionState,
    },
    SizeCalculationStarted,
    CalculatingSize {
        /// 1-based index of the resource being probed.
        index: usize,
    },
    SizeCalculationComplete,
    ResourceAttempting {
        name: String,
    },
    ResourceStarted {
        name: String,
    },
    ResourceSucceeded {
        name: String,
    },
    ResourceFailed {
        name: String,
        reason: String,
    },
    ResourceStopped {
        name: String,
    },
    Progress {
        name: String,
        total_progress: u64,
        file_progress: u64,
        file_size: u64,
        /// Instantaneous transfer speed in bytes per second.
        speed: u64,
    },
}

// ============================================================================
// Size Formatting
// ============================================================================

const SIZE_DECIMALS: usize = 2;

/// Format a byte count with binary (1024-based) unit prefixes.
pub fn format_size_binary(size: u64) -> String {
    format_size(size, 1024.0, &["B", "KB", "MB", "GB", "TB", "PB"])
}

/// Format a byte count with decimal (1000-based) unit prefixes.
pub fn format_size_decimal(size: u64) -> String {
    format_size(size, 1000.0, &["B", "kB", "MB", "GB", "TB", "PB"])
}

fn format_size(size: u64, step: f64, units: &[&str]) -> String {
    let mut value = size as f64;
    let mut unit = 0;
    while value >= step && unit < units.len() - 1 {
        value /= step;
        unit += 1;
    }
    if unit == 0 {
        format!("{}{}", size, units[unit])
    } else {
        format!("{:.*}{}", SIZE_DECIMALS, value, units[unit])
    }
}
