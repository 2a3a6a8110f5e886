use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EnvError>;

/// Errors raised while provisioning environments.
///
/// A restart request is not an error; see [`crate::ProvisionOutcome`].
#[derive(Error, Debug)]
pub enum EnvError {
    /// No installer exists for this OS/architecture
    #[error("Unsupported platform: {0} (only Linux and macOS are supported)")]
    UnsupportedPlatform(String),

    /// conda is not on PATH and installing it was not requested
    #[error("conda is not installed; allow k2s to install it under {}", .0.display())]
    CondaMissing(PathBuf),

    /// An external tool exited with a non-zero status
    #[error("`{command}` failed with {}:\n{stderr}", exit_label(.code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// An external tool could not be started
    #[error("Failed to start `{command}`: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "a signal".to_string(),
    }
}

impl EnvError {
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}
