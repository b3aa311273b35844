//! Content store boundary: resolving opaque attachment references to staged
//! files.
//!
//! Attachments are referenced by an opaque identifier produced by an upload
//! step outside this crate. Size and MIME-type admission happen there; the
//! store re-checks only that the file exists and its type is determinable.

pub mod fs;

use async_trait::async_trait;

use crate::types::StagedAttachment;

pub use fs::FsContentStore;

/// Errors from content-store resolution.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No staged file exists for the reference.
    #[error("not found")]
    NotFound(String),

    /// The staged file's content type could not be determined.
    #[error("unsupported type")]
    UnsupportedType(String),

    /// Filesystem access failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolves opaque content references to staged attachment files.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Resolve a reference to its staged file.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when no file exists for the reference,
    /// [`StoreError::UnsupportedType`] when its content type cannot be
    /// determined.
    async fn resolve(&self, reference: &str) -> Result<StagedAttachment, StoreError>;
}
