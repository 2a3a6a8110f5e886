use thiserror::Error;

/// Result type for scan operations
pub type Result<T> = std::result::Result<T, ScanError>;

/// Errors that can occur while reading documents
#[derive(Error, Debug)]
pub enum ScanError {
    /// Tree-sitter could not be configured for Python
    #[error("Tree-sitter error: {0}")]
    TreeSitterError(String),

    /// The notebook JSON does not have the expected shape
    #[error("Invalid notebook: {0}")]
    InvalidNotebook(String),

    /// IO error occurred
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Malformed JSON
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl ScanError {
    /// Create a tree-sitter error
    pub fn tree_sitter(msg: impl Into<String>) -> Self {
        Self::TreeSitterError(msg.into())
    }

    /// Create an invalid notebook error
    pub fn invalid_notebook(msg: impl Into<String>) -> Self {
        Self::InvalidNotebook(msg.into())
    }
}
