use thiserror::Error;

/// Camera permission failures. Recovering requires a change in OS settings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    #[error("Camera access denied")]
    Denied,

    #[error("Camera access restricted by policy")]
    Restricted,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SetupError {
    #[error("No suitable camera device found")]
    NoDevice,

    #[error("Camera input was rejected by the capture session")]
    InvalidInput,

    #[error("Photo output was rejected by the capture session")]
    InvalidOutput,

    #[error("No supported photo codec is available")]
    CodecUnavailable,

    #[error("Camera access has not been granted")]
    NotAuthorized,

    #[error("Capture session has not been configured")]
    NotConfigured,

    #[error("Capture session failed to start after {attempts} attempts")]
    StartFailed { attempts: u32 },

    #[error("Capture session has been shut down")]
    SessionClosed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("A capture is already in progress")]
    Busy,

    #[error("Capture session is not running")]
    NotReady,

    #[error("Hardware capture failed: {0}")]
    HardwareCaptureFailed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreprocessingError {
    #[error("Invalid image data: {0}")]
    InvalidImageData(String),

    #[error("Resize failed: {0}")]
    ResizeFailed(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),
}

/// Whether a failure permits another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Terminal,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("Service unavailable (503)")]
    ServiceUnavailable,

    #[error("Server error ({0})")]
    ServerError(u16),

    #[error("Request timed out")]
    NetworkTimeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("No credential configured for the cloud backend")]
    MissingCredential,

    #[error("No model configured for the cloud backend")]
    MissingModel,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Authentication failed ({0})")]
    AuthError(u16),

    #[error("Rate limited by the extraction service")]
    RateLimited,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("No text found in image")]
    NoTextFound,

    #[error("Failed to decode response: {0}")]
    DecodeFailure(String),

    #[error("Recognizer failed: {0}")]
    HandlerFailed(String),

    #[error("Unexpected response status {0}")]
    Unknown(u16),
}

impl ExtractionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ExtractionError::ServiceUnavailable
            | ExtractionError::ServerError(_)
            | ExtractionError::NetworkTimeout
            | ExtractionError::Transport(_) => ErrorClass::Retryable,
            _ => ErrorClass::Terminal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }
}

/// Everything a pipeline run (or a direct session call) can fail with.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Authorization error: {0}")]
    Authorization(#[from] AuthorizationError),

    #[error("Setup error: {0}")]
    Setup(#[from] SetupError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Preprocessing error: {0}")]
    Preprocessing(#[from] PreprocessingError),

    #[error("Extraction error after {attempts} attempt(s): {error}")]
    Extraction {
        error: ExtractionError,
        attempts: u32,
    },

    #[error("Pipeline cancelled")]
    Cancelled,
}

impl PipelineError {
    /// The extraction failure behind this error, if any.
    pub fn extraction(&self) -> Option<&ExtractionError> {
        match self {
            PipelineError::Extraction { error, .. } => Some(error),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
