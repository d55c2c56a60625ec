//! On-disk storage for files shared into channels.
//!
//! Files land in `<root>/<YYYY-MM-DD>/<unix>_<name><ext>` and are served
//! back under `/uploads/`.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{debug, info};

use crate::error::ServerError;

/// Content types accepted for upload.
const ALLOWED_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/bmp",
    "text/plain",
    "application/pdf",
    "application/zip",
    "application/x-zip-compressed",
    "application/rar",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
];

/// Verify that a resolved path stays within the expected base directory.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, ServerError> {
    // Canonicalize base; target may not exist yet so normalize manually
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let mut resolved = canonical_base.clone();
    for component in target
        .strip_prefix(base)
        .or_else(|_| target.strip_prefix(&canonical_base))
        .unwrap_or(target)
        .components()
    {
        match component {
            Component::Normal(c) => resolved.push(c),
            Component::ParentDir => {
                return Err(ServerError::BadRequest("Path traversal detected".to_string()));
            }
            _ => {}
        }
    }
    if !resolved.starts_with(&canonical_base) {
        return Err(ServerError::BadRequest("Path traversal detected".to_string()));
    }
    Ok(resolved)
}

/// A file written by [`UploadStore::save`].
#[derive(Debug, Clone)]
pub struct StoredUpload {
    /// Public URL path, `/uploads/<date>/<stored name>`.
    pub url: String,
    pub path: PathBuf,
    pub size: usize,
}

#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
    max_size: usize,
}

impl UploadStore {
    pub async fn new(root: PathBuf, max_size: usize) -> Result<Self, ServerError> {
        fs::create_dir_all(&root).await.map_err(|e| {
            ServerError::Upload(format!(
                "Failed to create upload directory '{}': {}",
                root.display(),
                e
            ))
        })?;

        info!(path = %root.display(), "Upload store initialized");

        Ok(Self { root, max_size })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Write `data` under today's directory. `original_name` is only used
    /// to derive the stored name; it is sanitized first.
    pub async fn save(
        &self,
        original_name: &str,
        data: &[u8],
        now: DateTime<Utc>,
    ) -> Result<StoredUpload, ServerError> {
        if data.len() > self.max_size {
            return Err(ServerError::PayloadTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let date_dir = now.format("%Y-%m-%d").to_string();
        let (base, ext) = split_extension(original_name);
        let stored_name = format!("{}_{}{}", now.timestamp(), sanitize(base), sanitize(ext));

        let dir = ensure_within(&self.root, &self.root.join(&date_dir))?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| ServerError::Upload(format!("Failed to create {date_dir}: {e}")))?;

        let path = ensure_within(&self.root, &dir.join(&stored_name))?;
        fs::write(&path, data)
            .await
            .map_err(|e| ServerError::Upload(format!("Failed to write {stored_name}: {e}")))?;

        debug!(path = %path.display(), size = data.len(), "Stored upload");

        Ok(StoredUpload {
            url: format!("/uploads/{date_dir}/{stored_name}"),
            path,
            size: data.len(),
        })
    }
}

/// Pick the content type for an upload and check it against the allow-list.
/// The declared type wins; without one the extension decides.
pub fn resolve_content_type(declared: Option<&str>, file_name: &str) -> Result<String, ServerError> {
    let content_type = match declared.map(str::trim).filter(|t| !t.is_empty()) {
        Some(declared) => declared.to_string(),
        None => {
            let (_, ext) = split_extension(file_name);
            let guessed = match ext.to_ascii_lowercase().as_str() {
                ".jpg" | ".jpeg" => "image/jpeg",
                ".png" => "image/png",
                ".gif" => "image/gif",
                ".pdf" => "application/pdf",
                ".txt" => "text/plain",
                ".zip" => "application/zip",
                ".doc" => "application/msword",
                ".docx" => {
                    "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
                }
                ".xls" => "application/vnd.ms-excel",
                ".xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                other => {
                    return Err(ServerError::UnsupportedFileType(format!(
                        "unknown extension '{other}'"
                    )))
                }
            };
            guessed.to_string()
        }
    };

    if !ALLOWED_TYPES.contains(&content_type.as_str()) {
        return Err(ServerError::UnsupportedFileType(content_type));
    }
    Ok(content_type)
}

/// Split `name` into base and extension (with its dot). A name without a
/// dot in its last segment has an empty extension.
fn split_extension(name: &str) -> (&str, &str) {
    let segment_start = name.rfind(['/', '\\']).map_or(0, |i| i + 1);
    match name[segment_start..].rfind('.') {
        Some(dot) => name.split_at(segment_start + dot),
        None => (name, ""),
    }
}

fn sanitize(part: &str) -> String {
    part.replace(' ', "_")
        .replace("..", "")
        .replace(['/', '\\'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    async fn test_store() -> (UploadStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::new(dir.path().join("uploads"), 1024)
            .await
            .unwrap();
        (store, dir)
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_save_layout() {
        let (store, _dir) = test_store().await;
        let stored = store.save("my cat.png", b"png-bytes", noon()).await.unwrap();

        assert_eq!(stored.url, "/uploads/2024-05-01/1714564800_my_cat.png");
        assert_eq!(stored.size, 9);
        assert_eq!(std::fs::read(&stored.path).unwrap(), b"png-bytes");
        assert!(stored.path.starts_with(store.root().canonicalize().unwrap()));
    }

    #[tokio::test]
    async fn test_traversal_names_stay_inside() {
        let (store, _dir) = test_store().await;
        let stored = store
            .save("../../etc/passwd.txt", b"x", noon())
            .await
            .unwrap();
        assert_eq!(
            stored.url,
            "/uploads/2024-05-01/1714564800___etc_passwd.txt"
        );
        assert!(stored.path.starts_with(store.root().canonicalize().unwrap()));
    }

    #[tokio::test]
    async fn test_oversized_rejected() {
        let (store, _dir) = test_store().await;
        let data = vec![0u8; 2048];
        assert!(matches!(
            store.save("big.zip", &data, noon()).await,
            Err(ServerError::PayloadTooLarge { size: 2048, max: 1024 })
        ));
    }

    #[test]
    fn test_content_type_resolution() {
        assert_eq!(
            resolve_content_type(Some("image/png"), "x.bin").unwrap(),
            "image/png"
        );
        assert_eq!(resolve_content_type(None, "Report.PDF").unwrap(), "application/pdf");
        assert_eq!(resolve_content_type(Some(""), "notes.txt").unwrap(), "text/plain");
        assert!(resolve_content_type(None, "script.sh").is_err());
        assert!(resolve_content_type(Some("application/x-msdownload"), "a.exe").is_err());
        assert!(resolve_content_type(None, "noextension").is_err());
    }

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("a.tar.gz"), ("a.tar", ".gz"));
        assert_eq!(split_extension("README"), ("README", ""));
        assert_eq!(split_extension("dir.d/file"), ("dir.d/file", ""));
    }
}
