//! Error types.
//!
//! Setup problems are [`ConfigError`] and are always returned before any
//! computation starts. Checkpoint I/O is [`CheckpointError`]; a failed save
//! leaves the in-memory parameters valid. [`Error`] unifies them for callers
//! that restore and train in one go.

use std::fmt;
use std::path::PathBuf;

/// Structurally invalid configuration or data/parameter mismatch.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A value is out of range (zero size, non-finite rate, ...).
    Validation(String),

    /// `--key=value` with a key nobody recognizes.
    UnknownKey(String),

    /// A known key whose value failed to parse.
    Parse {
        key: String,
        value: String,
        message: String,
    },

    /// Rows are too short to hold one window plus its target column.
    WindowTooWide { row_width: usize, num_steps: usize },

    /// The grid is valid but an epoch would contain no batches.
    NoBatches { row_width: usize, num_steps: usize },

    /// A token id at `index` in the stream is not below `vocab_size`.
    TokenOutOfRange { index: usize, token: usize, vocab_size: usize },

    /// Restored parameters disagree with the current run.
    Mismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Validation(m) => write!(f, "config validation: {m}"),
            ConfigError::UnknownKey(k) => write!(f, "unknown option --{k}"),
            ConfigError::Parse { key, value, message } => {
                write!(f, "option --{key}={value:?}: {message}")
            }
            ConfigError::WindowTooWide { row_width, num_steps } => write!(
                f,
                "window of {num_steps} steps plus target does not fit in rows of width {row_width}"
            ),
            ConfigError::NoBatches { row_width, num_steps } => write!(
                f,
                "rows of width {row_width} with {num_steps}-step windows yield no batches"
            ),
            ConfigError::TokenOutOfRange { index, token, vocab_size } => write!(
                f,
                "token {token} at position {index} is outside vocabulary of size {vocab_size}"
            ),
            ConfigError::Mismatch { what, expected, found } => {
                write!(f, "{what} mismatch: expected {expected}, found {found}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Failure to write, read or decode a checkpoint.
#[derive(Debug)]
pub enum CheckpointError {
    Io { path: PathBuf, source: std::io::Error },
    Encode(bincode::Error),
    Decode { path: PathBuf, source: bincode::Error },
    /// No checkpoint exists for the requested run.
    NotFound { run_id: String },
}

impl fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointError::Io { path, source } => write!(f, "checkpoint io {}: {source}", path.display()),
            CheckpointError::Encode(e) => write!(f, "checkpoint encode: {e}"),
            CheckpointError::Decode { path, source } => {
                write!(f, "checkpoint decode {}: {source}", path.display())
            }
            CheckpointError::NotFound { run_id } => write!(f, "no checkpoint found for run {run_id:?}"),
        }
    }
}

impl std::error::Error for CheckpointError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CheckpointError::Io { source, .. } => Some(source),
            CheckpointError::Encode(e) => Some(e.as_ref()),
            CheckpointError::Decode { source, .. } => Some(source.as_ref()),
            CheckpointError::NotFound { .. } => None,
        }
    }
}

/// Seed problems for the generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerateError {
    SeedLength { expected: usize, found: usize },
    TokenOutOfRange { token: usize, vocab_size: usize },
}

impl fmt::Display for GenerateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerateError::SeedLength { expected, found } => {
                write!(f, "seed window must hold {expected} tokens, got {found}")
            }
            GenerateError::TokenOutOfRange { token, vocab_size } => {
                write!(f, "seed token {token} is outside vocabulary of size {vocab_size}")
            }
        }
    }
}

impl std::error::Error for GenerateError {}

#[derive(Debug)]
pub enum Error {
    Config(ConfigError),
    Checkpoint(CheckpointError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => e.fmt(f),
            Error::Checkpoint(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(e) => Some(e),
            Error::Checkpoint(e) => Some(e),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self { Error::Config(e) }
}

impl From<CheckpointError> for Error {
    fn from(e: CheckpointError) -> Self { Error::Checkpoint(e) }
}
