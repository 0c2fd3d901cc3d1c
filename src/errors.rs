// =============================================================================
// Service-level sentinel errors
// =============================================================================
//
// Well-known failure conditions live here as a closed enum; everything else
// travels as `anyhow::Error` with context and is mapped to a generic internal
// problem at the handler boundary. The HTTP layer owns the mapping from these
// sentinels to RFC 7807 responses (see `api::problem`).
// =============================================================================

use thiserror::Error;

/// Closed set of well-known service failures.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("a pipeline is already running")]
    AlreadyRunning,

    #[error("pipeline not found: {0}")]
    PipelineNotFound(String),

    #[error("pipeline is not running: {0}")]
    PipelineNotRunning(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("license is bound to a different machine")]
    LicenseMachineMismatch,

    #[error("license has expired")]
    LicenseExpired,

    #[error("license key not found")]
    LicenseNotFound,

    #[error("license is already activated")]
    LicenseAlreadyActivated,

    #[error("license registry unreachable: {0}")]
    RegistryUnreachable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    /// Stable machine-readable code carried in problem+json bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyRunning => "PIPELINE_ALREADY_RUNNING",
            Self::PipelineNotFound(_) => "PIPELINE_NOT_FOUND",
            Self::PipelineNotRunning(_) => "PIPELINE_NOT_RUNNING",
            Self::FileNotFound(_) => "FILE_NOT_FOUND",
            Self::InvalidInput(_) => "VALIDATION_FAILED",
            Self::LicenseMachineMismatch => "LICENSE_MACHINE_MISMATCH",
            Self::LicenseExpired => "LICENSE_EXPIRED",
            Self::LicenseNotFound => "LICENSE_NOT_FOUND",
            Self::LicenseAlreadyActivated => "LICENSE_ALREADY_ACTIVATED",
            Self::RegistryUnreachable(_) => "LICENSE_NETWORK_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
