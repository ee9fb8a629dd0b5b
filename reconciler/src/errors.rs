use thiserror::Error;

#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("Enumeration failed: {0}")]
    EnumerationFailed(String),

    #[error("Template invalid: {0}")]
    TemplateInvalid(String),

    #[error("Platform-specific error: {0}")]
    PlatformError(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
