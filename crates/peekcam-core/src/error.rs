use thiserror::Error;

/// Failures surfaced by the capture backend and the stream manager.
///
/// Every variant is recorded on the manager as its last error and handed back
/// to the caller; none of them is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("permission to access {0} was denied")]
    PermissionDenied(String),

    #[error("no {0} device is available")]
    DeviceNotFound(String),

    /// The requested device id is no longer present.
    #[error("requested device '{device_id}' is no longer available")]
    Overconstrained { device_id: String },

    #[error("device enumeration failed: {0}")]
    Enumeration(String),

    /// A newer acquisition started while this one was in flight.
    #[error("acquisition #{version} was superseded by a newer request")]
    Superseded { version: u64 },

    #[error("media stream manager is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum PeekcamError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PeekcamError>;
