//! Error types for the UCI client

use thiserror::Error;

use crate::uci::ParseError;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// The engine process could not be spawned.
    #[error("failed to launch engine `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading from or writing to the engine failed outside of a teardown.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An option declaration sent during the handshake did not parse.
    #[error("malformed option line: {0}")]
    MalformedOption(#[from] ParseError),

    #[error("engine has no {0}")]
    MissingStream(&'static str),

    /// The caller invoked an operation the session is not ready for.
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error("unknown option: {0}")]
    UnknownOption(String),

    #[error("invalid value for option {name}: {reason}")]
    InvalidOptionValue { name: String, reason: String },

    /// The position cannot be sent as a single `position` command.
    #[error("invalid position: {0}")]
    InvalidPosition(String),
}

/// Programming errors: the operation was called out of sequence.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("engine handshake was not performed")]
    NotInitialized,

    #[error("no position defined")]
    NoPosition,

    #[error("engine session is closed")]
    Closed,
}

impl EngineError {
    /// Returns true if this error is a caller sequencing mistake rather than
    /// a communication failure.
    pub fn is_precondition(&self) -> bool {
        matches!(self, EngineError::Precondition(_))
    }
}
