use thiserror::Error;

/// Failures surfaced by the audio engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    /// Output device could not be opened or started.
    #[error("audio output init failed: {0}")]
    Init(String),
    /// A command that needs hardware ran before `initialize`.
    #[error("audio engine is not initialized")]
    NotInitialized,
    /// The audio bytes could not be decoded.
    #[error("decode failed: {0}")]
    Decode(String),
    /// Sample-rate conversion failed.
    #[error("resample failed: {0}")]
    Resample(String),
    /// The output stream reported a failure after it was opened.
    #[error("audio output error: {0}")]
    Output(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
