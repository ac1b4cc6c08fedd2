use thiserror::Error;

#[derive(Error, Debug)]
pub enum StudioError {
    #[error("Failed to connect to Chrome: {0}")]
    ConnectionFailed(String),

    #[error("Failed to launch Chrome: {0}")]
    LaunchFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Unknown page: {0}")]
    PageNotFound(String),

    #[error("Invalid page name: {0}")]
    InvalidPageName(String),

    #[error("Recording error: {0}")]
    Recording(String),

    #[error("Video encoder error: {0}")]
    Encoder(String),

    #[error("Vision API error: {0}")]
    Vision(String),

    #[error("CDP error: {0}")]
    CdpError(#[from] chromiumoxide::error::CdpError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, StudioError>;
