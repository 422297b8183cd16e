//! Error types for the director container lifecycle.

use std::time::Duration;

/// Result type alias for director-box operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing the director container.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Not Found
    // =========================================================================
    /// Container does not exist on the backend.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Image does not exist locally or in the registry.
    #[error("image not found: {0}")]
    ImageNotFound(String),

    // =========================================================================
    // Container Lifecycle Errors
    // =========================================================================
    /// Container create failed.
    #[error("failed to create container '{name}': {reason}")]
    CreateFailed { name: String, reason: String },

    /// Container start failed.
    #[error("failed to start container '{name}': {reason}")]
    StartFailed { name: String, reason: String },

    /// Container stop failed.
    #[error("failed to stop container '{name}': {reason}")]
    StopFailed { name: String, reason: String },

    /// Container, volume or network removal failed.
    #[error("failed to delete {resource} '{name}': {reason}")]
    DeleteFailed {
        resource: &'static str,
        name: String,
        reason: String,
    },

    /// Command inside the container exited non-zero or could not run.
    #[error("exec failed in container '{container}' (exit code {exit_code:?}): {stderr}")]
    ExecFailed {
        container: String,
        exit_code: Option<i64>,
        stderr: String,
    },

    /// Any other backend API failure, tagged with the operation.
    #[error("{backend} {operation} failed: {reason}")]
    Runtime {
        backend: &'static str,
        operation: &'static str,
        reason: String,
    },

    // =========================================================================
    // Readiness Errors
    // =========================================================================
    /// Director did not report healthy within the wait budget.
    #[error("director did not become ready within {waited:?}: {last_error}")]
    ReadinessTimeout { waited: Duration, last_error: String },

    /// Container stopped before the director became ready.
    #[error("container '{name}' exited before becoming ready (exit code {exit_code:?})")]
    ContainerExited { name: String, exit_code: Option<i64> },

    // =========================================================================
    // Image/Registry Errors
    // =========================================================================
    /// Failed to parse image reference.
    #[error("invalid image reference '{reference}': {reason}")]
    InvalidImageReference { reference: String, reason: String },

    /// Registry request failed (unreachable, auth, protocol).
    #[error("registry {operation} for '{reference}' failed: {reason}")]
    Registry {
        operation: &'static str,
        reference: String,
        reason: String,
    },

    /// Layer blob could not be read as a tar stream.
    #[error("failed to scan layer {digest}: {reason}")]
    LayerExtractionFailed { digest: String, reason: String },

    /// The requested file is absent from every layer of the image.
    #[error("file '{path}' not found in any layer of {reference}")]
    FileNotFoundInImage { reference: String, path: String },

    /// Manifest diff could not be computed.
    #[error("failed to diff manifests: {0}")]
    ManifestDiff(String),

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    /// Director API call failed.
    #[error("director {operation} failed: {reason}")]
    Director {
        operation: &'static str,
        reason: String,
    },

    /// No answer could be read for a confirmation prompt.
    #[error("aborted by user")]
    UserAborted,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    // =========================================================================
    // Cancellation / Timeouts
    // =========================================================================
    /// Operation was cancelled by its caller.
    #[error("operation cancelled")]
    Cancelled,

    /// Operation timed out.
    #[error("operation timed out after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    // =========================================================================
    // I/O and Encoding
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML (de)serialization error.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Returns true for the absent-resource variants, so callers can take a
    /// create path instead of failing.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ContainerNotFound(_)
                | Self::ImageNotFound(_)
                | Self::FileNotFoundInImage { .. }
        )
    }

    /// Returns true if the error is a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
