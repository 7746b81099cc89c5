use thiserror::Error;

/// Result type alias for sshfleet operations
pub type TunnelResult<T> = Result<T, TunnelError>;

/// Error types for the sshfleet library
#[derive(Error, Debug)]
pub enum TunnelError {
    /// Malformed config file, bad entry, or capacity exceeded
    #[error("Configuration error: {0}")]
    Config(String),

    /// Field validation failure (add, config entry)
    #[error("Validation error: {0}")]
    Validation(String),

    /// External ssh client spawn/probe failures
    #[error("SSH error: {0}")]
    Ssh(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Manager registry errors (capacity, duplicate name)
    #[error("Manager error: {0}")]
    Manager(String),

    /// Operator referenced a tunnel name that doesn't exist
    #[error("No such tunnel: {0}")]
    NotFound(String),

    /// Generic errors
    #[error("Error: {0}")]
    Other(String),
}
