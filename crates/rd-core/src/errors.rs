use thiserror::Error;

/// Result codes for [`crate::capture::CaptureEngine::initialize`] and friends.
/// Mirrors platform error mapping (e.g. `DXGI_ERROR_NOT_CURRENTLY_AVAILABLE` →
/// `AccessDenied`) without leaking any platform type through the contract.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture backend failed to initialize")]
    Initialization,

    #[error("capture config is invalid")]
    InvalidConfig,

    #[error("no display available")]
    NoDisplay,

    #[error("access to the desktop session was denied")]
    AccessDenied,

    #[error("capture call timed out")]
    Timeout,

    #[error("unknown capture error")]
    Unknown,

    #[error("capture backend not supported on this platform")]
    NotSupported,

    #[error("capture engine already started")]
    AlreadyStarted,

    #[error("capture engine already initialized")]
    AlreadyInitialized,
}

pub type CaptureResult = Result<(), CaptureError>;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("service descriptor '{0}' already registered")]
    DuplicateDescriptor(String),

    #[error("service descriptor '{0}' not found")]
    NotFound(String),
}

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("failed to bind discovery socket: {0}")]
    BindFailed(std::io::Error),

    #[error("failed to open broadcast socket: {0}")]
    BroadcastSocketFailed(std::io::Error),
}
