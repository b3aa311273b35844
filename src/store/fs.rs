//! Filesystem-backed content store over the staging directory.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{ContentStore, StoreError};
use crate::types::StagedAttachment;

/// Content store that reads staged attachments from a local directory.
///
/// References are relative paths produced by the upload step. Anything that
/// would escape the staging root (absolute paths, `..` components) is
/// treated as not found rather than resolved.
#[derive(Debug, Clone)]
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    /// Create a store rooted at the staging directory.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Join a reference onto the staging root, rejecting traversal.
    fn staged_path(&self, reference: &str) -> Option<PathBuf> {
        let relative = Path::new(reference);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe || reference.is_empty() {
            return None;
        }
        Some(self.root.join(relative))
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn resolve(&self, reference: &str) -> Result<StagedAttachment, StoreError> {
        let path = self
            .staged_path(reference)
            .ok_or_else(|| StoreError::NotFound(reference.to_owned()))?;

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(StoreError::NotFound(reference.to_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(reference.to_owned()));
            }
            Err(e) => return Err(StoreError::Io(e)),
        };

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| StoreError::NotFound(reference.to_owned()))?;

        let content_type = content_type_for(&file_name)
            .ok_or_else(|| StoreError::UnsupportedType(reference.to_owned()))?;

        debug!(reference, content_type, "attachment resolved");
        Ok(StagedAttachment {
            path,
            file_name,
            content_type: content_type.to_owned(),
            size_bytes: metadata.len(),
        })
    }
}

/// Determine a MIME type from the file extension, lowercased.
///
/// Covers the media types the upload allow-list admits. Returns `None` for
/// anything else, which delivery reports as an unsupported type.
fn content_type_for(file_name: &str) -> Option<&'static str> {
    let extension = Path::new(file_name).extension()?.to_str()?.to_lowercase();
    let content_type = match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "3gp" => "video/3gpp",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "amr" => "audio/amr",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "csv" => "text/csv",
        "txt" => "text/plain",
        _ => return None,
    };
    Some(content_type)
}
