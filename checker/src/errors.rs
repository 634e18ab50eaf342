use hyper::StatusCode;
use sources::ArchiveError;
use thiserror::Error;

/// Result type alias for checker operations
pub type Result<T, E = CheckerError> = std::result::Result<T, E>;

/// Errors that stop a check request before any metric is produced.
///
/// Failures to fetch either config side are not errors at this level; they
/// become a `CheckStatus` in the rendered metric.
#[derive(Error, Debug)]
pub enum CheckerError {
    #[error("URL parameter 'target' is missing")]
    MissingTarget,

    #[error("cannot extract site from hostname: {0}")]
    InvalidTarget(String),

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("cannot create archive provider: {0}")]
    ProviderConstruction(ArchiveError),

    #[error("cannot render metrics: {0}")]
    Exposition(#[from] prometheus::Error),

    #[error("Failed to read request body: {0}")]
    RequestBodyError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CheckerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CheckerError::MissingTarget
            | CheckerError::InvalidTarget(_)
            | CheckerError::RequestBodyError(_) => StatusCode::BAD_REQUEST,
            CheckerError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            CheckerError::ProviderConstruction(_)
            | CheckerError::Exposition(_)
            | CheckerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
