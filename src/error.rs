use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("invalid record format: {0} (expected sdf, json, xml or asnt)")]
    InvalidFormat(String),

    #[error("invalid compound identifier: {0}")]
    InvalidIdentifier(String),

    #[error("destination directory is not usable: {0}")]
    #[diagnostic(help("the destination must exist, be a directory and be writable"))]
    InvalidDestination(String),

    #[error("failed to read input list at {0}")]
    InputRead(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("request failed: {}", describe_status(*status, reason))]
    Transport { status: Option<u16>, reason: String },

    #[error("no identifier for {name}")]
    NotFound { name: String, status: Option<u16> },

    #[error("empty record body for CID {0}")]
    EmptyRecord(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("malformed ledger line {line}: {message}")]
    LedgerParse { line: usize, message: String },
}

impl HarvestError {
    /// HTTP status observed when the error was produced, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            HarvestError::Transport { status, .. } => *status,
            HarvestError::NotFound { status, .. } => *status,
            _ => None,
        }
    }

    /// Short reason phrase written to the error ledger.
    pub fn reason(&self) -> String {
        match self {
            HarvestError::Transport { reason, .. } => reason.clone(),
            HarvestError::NotFound { name, .. } => format!("NotFound: no identifier for {name}"),
            HarvestError::EmptyRecord(cid) => format!("EmptyRecord: empty body for CID {cid}"),
            HarvestError::Filesystem(message) => format!("IOError: {message}"),
            other => other.to_string(),
        }
    }
}

fn describe_status(status: Option<u16>, reason: &str) -> String {
    match status {
        Some(code) => format!("{code} - {reason}"),
        None => reason.to_string(),
    }
}
