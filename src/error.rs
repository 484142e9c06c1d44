use thiserror::Error;

/// Failures that can occur inside a single scheduled cycle.
///
/// None of these terminate the process; the controller logs them and the
/// next scheduled fire is the recovery path. Only configuration errors at
/// startup are fatal, and those travel as `anyhow::Error` out of
/// `Config::from_env`.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("telemetry store fetch failed: {0}")]
    Fetch(#[from] StoreError),

    #[error("sample has no usable flow value")]
    Validation,

    #[error("notification send failed for {recipient}: {message}")]
    Dispatch { recipient: String, message: String },

    #[error("audit write failed: {0}")]
    Audit(String),
}

/// Errors from the remote telemetry store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response from store: {0}")]
    BadResponse(String),
}
