use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RecordFormat {
    Sdf,
    Json,
    Xml,
    Asnt,
}

impl RecordFormat {
    pub fn extension(self) -> &'static str {
        match self {
            RecordFormat::Sdf => "sdf",
            RecordFormat::Json => "json",
            RecordFormat::Xml => "xml",
            RecordFormat::Asnt => "asnt",
        }
    }
}

impl fmt::Display for RecordFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

impl FromStr for RecordFormat {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sdf" => Ok(RecordFormat::Sdf),
            "json" => Ok(RecordFormat::Json),
            "xml" => Ok(RecordFormat::Xml),
            "asnt" => Ok(RecordFormat::Asnt),
            _ => Err(HarvestError::InvalidFormat(value.to_string())),
        }
    }
}

/// PubChem compound identifier (CID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cid(String);

impl Cid {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_name(&self, format: RecordFormat) -> String {
        format!("{}.{}", self.0, format.extension())
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Cid {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl FromStr for Cid {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let is_valid = !normalized.is_empty() && normalized.chars().all(|ch| ch.is_ascii_digit());
        if !is_valid {
            return Err(HarvestError::InvalidIdentifier(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

/// One unit of work: a compound name to resolve, or a CID that is already known.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkItem {
    pub raw_name: String,
    pub is_pre_resolved: bool,
}

impl WorkItem {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            raw_name: name.into(),
            is_pre_resolved: false,
        }
    }

    pub fn resolved(cid: &Cid) -> Self {
        Self {
            raw_name: cid.as_str().to_string(),
            is_pre_resolved: true,
        }
    }

    pub fn kind(&self) -> SubjectKind {
        if self.is_pre_resolved {
            SubjectKind::Cid
        } else {
            SubjectKind::Name
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    Name,
    Cid,
}

impl SubjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SubjectKind::Name => "name",
            SubjectKind::Cid => "cid",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Resolve,
    Fetch,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Resolve => "resolve",
            Stage::Fetch => "fetch",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of driving one [`WorkItem`] to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success {
        identifier: Cid,
        bytes_written: u64,
    },
    Failure {
        stage: Stage,
        http_status: Option<u16>,
        message: String,
        /// Set when resolution succeeded before the fetch failed.
        identifier: Option<Cid>,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}
