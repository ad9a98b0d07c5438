use thiserror::Error;

/// Main error type for the telemetry bridge
#[derive(Error, Debug)]
pub enum MeterError {
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timeout")]
    Timeout,

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Frame invalid: {0}")]
    FrameInvalid(String),

    #[error("Sink error: {0}")]
    Sink(String),
}

/// Result type alias for telemetry bridge operations
pub type MeterResult<T> = Result<T, MeterError>;
