//! The store's three-tier probe strategy.
//!
//! A resource is looked up directly, then as the underscore-suffixed
//! compressed variant, then through the store's `file.ptr` indirection
//! which names a locally reachable copy. Only 200 and 404 have defined
//! handling; any other status is a generic failure carrying the status
//! text verbatim.

use std::path::PathBuf;

use reqwest::{Client, Response, StatusCode};

use symgrab_types::{underscore_variant, FileResource};

use crate::error::SymgrabError;

/// Sentinel file name used by the store's file-pointer indirection.
const FILE_POINTER_NAME: &str = "file.ptr";

/// Prefix of a file-pointer body that references a local path.
const FILE_POINTER_PREFIX: &str = "PATH:";

/// Outcome of the GET-tier probe used by the transfer pass.
pub(crate) enum ProbeHit {
    /// The resource exists at its direct path.
    Direct { response: Response, size: u64 },
    /// Only the compressed variant exists.
    Compressed { response: Response, size: u64 },
    /// A file pointer redirected to a locally reachable copy.
    LocalCopy { path: PathBuf, size: u64 },
    /// All tiers exhausted; carries the diagnostic reason.
    Absent { reason: String },
}

/// Outcome of the HEAD-tier probe used by size pre-calculation.
pub(crate) enum SizeProbe {
    Found(u64),
    Absent(String),
}

/// Rewrite a remote path to the compressed-variant convention.
pub(crate) fn compressed_path(path: &str) -> String {
    underscore_variant(path)
}

/// Rewrite a remote path to its containing directory's file pointer.
pub(crate) fn file_pointer_path(path: &str) -> String {
    match path.rfind('/') {
        Some(pos) => format!("{}/{}", &path[..pos], FILE_POINTER_NAME),
        None => FILE_POINTER_NAME.to_string(),
    }
}

/// Parse a file-pointer body into the local path it references.
pub(crate) fn parse_file_pointer(body: &str) -> Option<PathBuf> {
    let path = body.strip_prefix(FILE_POINTER_PREFIX)?.trim();
    if path.is_empty() {
        None
    } else {
        Some(PathBuf::from(path))
    }
}

fn content_length(response: &Response) -> u64 {
    response
        .headers()
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn status_reason(status: StatusCode) -> String {
    format!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    )
    .trim_end()
    .to_string()
}

/// Run the GET tiers for one resource, returning the located source to
/// stream from or the diagnostic reason when every tier misses.
pub(crate) async fn locate(
    client: &Client,
    resource: &FileResource,
) -> Result<ProbeHit, SymgrabError> {
    let response = client.get(&resource.remote_path).send().await?;
    match response.status() {
        StatusCode::OK => {
            let size = content_length(&response);
            return Ok(ProbeHit::Direct { response, size });
        }
        StatusCode::NOT_FOUND => {}
        status => {
            return Ok(ProbeHit::Absent {
                reason: status_reason(status),
            })
        }
    }

    let response = client
        .get(compressed_path(&resource.remote_path))
        .send()
        .await?;
    match response.status() {
        StatusCode::OK => {
            let size = content_length(&response);
            return Ok(ProbeHit::Compressed { response, size });
        }
        StatusCode::NOT_FOUND => {}
        status => {
            return Ok(ProbeHit::Absent {
                reason: status_reason(status),
            })
        }
    }

    let response = client
        .get(file_pointer_path(&resource.remote_path))
        .send()
        .await?;
    if response.status() != StatusCode::OK {
        return Ok(ProbeHit::Absent {
            reason: status_reason(response.status()),
        });
    }

    let body = response.text().await?;
    match resolve_local_copy(&body).await {
        Some((path, size)) => Ok(ProbeHit::LocalCopy { path, size }),
        None => Ok(ProbeHit::Absent {
            reason: format!("No matching PDBs found - {}", body.trim()),
        }),
    }
}

/// Run the HEAD tiers for one resource, returning its reported size.
pub(crate) async fn probe_size(
    client: &Client,
    resource: &FileResource,
) -> Result<SizeProbe, SymgrabError> {
    let response = client.head(&resource.remote_path).send().await?;
    match response.status() {
        StatusCode::OK => return Ok(SizeProbe::Found(content_length(&response))),
        StatusCode::NOT_FOUND => {}
        status => return Ok(SizeProbe::Absent(status_reason(status))),
    }

    let response = client
        .head(compressed_path(&resource.remote_path))
        .send()
        .await?;
    match response.status() {
        StatusCode::OK => return Ok(SizeProbe::Found(content_length(&response))),
        StatusCode::NOT_FOUND => {}
        status => return Ok(SizeProbe::Absent(status_reason(status))),
    }

    let response = client
        .get(file_pointer_path(&resource.remote_path))
        .send()
        .await?;
    if response.status() != StatusCode::OK {
        return Ok(SizeProbe::Absent(status_reason(response.status())));
    }

    let body = response.text().await?;
    match resolve_local_copy(&body).await {
        Some((_, size)) => Ok(SizeProbe::Found(size)),
        None => Ok(SizeProbe::Absent(format!(
            "No matching PDBs found - {}",
            body.trim()
        ))),
    }
}

/// Resolve a file-pointer body to an existing local file and its length.
async fn resolve_local_copy(body: &str) -> Option<(PathBuf, u64)> {
    let path = parse_file_pointer(body)?;
    let meta = tokio::fs::metadata(&path).await.ok()?;
    if meta.is_file() {
        Some((path, meta.len()))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressed_path_applies_underscore_convention() {
        assert_eq!(
            compressed_path("https://sym.example.com/foo.pdb/1234/foo.pdb"),
            "https://sym.example.com/foo.pdb/1234/foo.pd_"
        );
    }

    #[test]
    fn file_pointer_path_replaces_final_segment() {
        assert_eq!(
            file_pointer_path("https://sym.example.com/foo.pdb/1234/foo.pdb"),
            "https://sym.example.com/foo.pdb/1234/file.ptr"
        );
    }

    #[test]
    fn parses_path_reference() {
        assert_eq!(
            parse_file_pointer("PATH:/var/symcache/foo.pdb\r\n"),
            Some(PathBuf::from("/var/symcache/foo.pdb"))
        );
    }

    #[test]
    fn rejects_non_path_bodies() {
        assert_eq!(parse_file_pointer("MSG: no symbols here"), None);
        assert_eq!(parse_file_pointer(""), None);
        assert_eq!(parse_file_pointer("PATH:"), None);
    }

    #[test]
    fn status_reason_is_verbatim_status_text() {
        assert_eq!(
            status_reason(StatusCode::INTERNAL_SERVER_ERROR),
            "500 Internal Server Error"
        );
        assert_eq!(status_reason(StatusCode::NOT_FOUND), "404 Not Found");
    }

    #[tokio::test]
    async fn local_copy_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("foo.pdb");
        tokio::fs::write(&file, b"symbols").await.unwrap();

        let body = format!("PATH:{}", file.display());
        let (path, size) = resolve_local_copy(&body).await.unwrap();
        assert_eq!(path, file);
        assert_eq!(size, 7);

        let missing = format!("PATH:{}", dir.path().join("gone.pdb").display());
        assert!(resolve_local_copy(&missing).await.is_none());
    }
}
