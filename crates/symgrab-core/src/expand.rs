//! Decompression collaborator.
//!
//! Compressed store artifacts are expanded by an OS utility invoked as a
//! child process. The wait is bounded; on timeout the attempt is abandoned
//! and the compressed file retained.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::error::SymgrabError;

/// Default decompression command (the SDK `expand` utility).
pub const DEFAULT_EXPAND_COMMAND: &str = "expand";

/// Default upper bound on one decompression run.
pub const DEFAULT_EXPAND_TIMEOUT: Duration = Duration::from_secs(600);

/// Turns a compressed store artifact into its uncompressed sibling.
#[async_trait]
pub trait Decompressor: Send + Sync {
    /// Produce the uncompressed sibling of `compressed` and return its
    /// path. The caller deletes the compressed original on success.
    async fn decompress(&self, compressed: &Path) -> Result<PathBuf, SymgrabError>;
}

/// Default [`Decompressor`] driving the OS expand utility.
#[derive(Debug, Clone)]
pub struct ExpandTool {
    command: String,
    timeout: Duration,
}

impl ExpandTool {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

impl Default for ExpandTool {
    fn default() -> Self {
        Self::new(DEFAULT_EXPAND_COMMAND, DEFAULT_EXPAND_TIMEOUT)
    }
}

#[async_trait]
impl Decompressor for ExpandTool {
    async fn decompress(&self, compressed: &Path) -> Result<PathBuf, SymgrabError> {
        let target = decompressed_sibling(compressed);
        info!(source = %compressed.display(), target = %target.display(), "expanding");

        let run = Command::new(&self.command)
            .arg(compressed)
            .arg(&target)
            .status();
        let status = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| {
                SymgrabError::Decompression(format!(
                    "{} timed out after {:?}",
                    self.command, self.timeout
                ))
            })?
            .map_err(SymgrabError::Io)?;

        if status.success() {
            Ok(target)
        } else {
            Err(SymgrabError::Decompression(format!(
                "{} exited with {}",
                self.command, status
            )))
        }
    }
}

/// The uncompressed sibling of a compressed artifact: the file name with
/// its final character replaced by `b` (`foo.pd_` becomes `foo.pdb`).
pub fn decompressed_sibling(compressed: &Path) -> PathBuf {
    let name = compressed
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut sibling: String = name
        .chars()
        .take(name.chars().count().saturating_sub(1))
        .collect();
    sibling.push('b');
    compressed.with_file_name(sibling)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_replaces_final_character() {
        assert_eq!(
            decompressed_sibling(Path::new("/tmp/sym/foo.pd_")),
            PathBuf::from("/tmp/sym/foo.pdb")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_run_returns_target_path() {
        // `true` ignores its arguments and exits 0.
        let tool = ExpandTool::new("true", Duration::from_secs(5));
        let target = tool.decompress(Path::new("/tmp/sym/foo.pd_")).await.unwrap();
        assert_eq!(target, PathBuf::from("/tmp/sym/foo.pdb"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_is_a_decompression_error() {
        let tool = ExpandTool::new("false", Duration::from_secs(5));
        let err = tool
            .decompress(Path::new("/tmp/sym/foo.pd_"))
            .await
            .unwrap_err();
        assert!(matches!(err, SymgrabError::Decompression(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 60\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let tool = ExpandTool::new(script.display().to_string(), Duration::from_millis(50));
        let err = tool
            .decompress(Path::new("/tmp/sym/foo.pd_"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn missing_command_is_an_io_error() {
        let tool = ExpandTool::new("symgrab-no-such-tool", Duration::from_secs(5));
        let err = tool
            .decompress(Path::new("/tmp/sym/foo.pd_"))
            .await
            .unwrap_err();
        assert!(matches!(err, SymgrabError::Io(_)));
    }
}
