use std::path::PathBuf;

use crate::kind::ExtensionKind;

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Failures surfaced by the source loader and the extension registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("malformed source {}: {message}", .path.display())]
    MalformedSource { path: PathBuf, message: String },

    #[error("failed to load source {}: {message}", .path.display())]
    SourceLoadFailure { path: PathBuf, message: String },

    #[error("unsupported source format: {} (expected .json, .yaml, .yml, .toml or .py)", .path.display())]
    UnsupportedSourceFormat { path: PathBuf },

    #[error("invalid {kind} definition: {message}")]
    ValidationFailure { kind: ExtensionKind, message: String },

    #[error("{kind} with {field} = {value} already exists (use --overwrite to replace it)")]
    DuplicateKey {
        kind: ExtensionKind,
        field: &'static str,
        value: String,
    },

    #[error("can't find {kind}: {name}")]
    NotFound { kind: ExtensionKind, name: String },

    #[error("{operation} is not supported for {kind}")]
    UnsupportedOperation {
        kind: ExtensionKind,
        operation: &'static str,
    },

    #[error("stored {kind} row is invalid: {message}")]
    InvalidStoredData { kind: ExtensionKind, message: String },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl RegistryError {
    pub fn validation(kind: ExtensionKind, message: impl Into<String>) -> Self {
        Self::ValidationFailure {
            kind,
            message: message.into(),
        }
    }

    pub fn is_unsupported_operation(&self) -> bool {
        matches!(self, Self::UnsupportedOperation { .. })
    }
}
