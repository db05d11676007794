use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::{LazyLock, Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;

use crate::domain::{Cid, Stage, SubjectKind};
use crate::error::HarvestError;

pub const SUCCESS_LEDGER_FILE: &str = "cid_list.txt";
pub const ERROR_LEDGER_FILE: &str = "download_errors.log";
/// Plain list of the subjects that failed in the latest batch, usable as `--input`.
pub const FAILED_LIST_FILE: &str = "failed_names.txt";

static STRUCTURED_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Failed to download (resolve|fetch) (name|cid)=(.*): (\d{3}|-) - (.*)$").unwrap()
});
static LEGACY_RECORD_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Failed to download (\d+)\.(\w+): (\d{3}) - (.*)$").unwrap());
static LEGACY_LOOKUP_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Failed to download \w+ file for (.+?): (\d{3}) - (.*)$").unwrap()
});
static LOOKUP_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/compound/name/(.+)/cids/").unwrap());

/// Append-only line file. Each append is one locked write of a whole line.
#[derive(Debug)]
pub struct Ledger {
    path: Utf8PathBuf,
    file: Mutex<File>,
}

impl Ledger {
    pub fn open(path: &Utf8Path) -> Result<Self, HarvestError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(format!("open ledger {path}: {err}")))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn append(&self, line: &str) -> Result<(), HarvestError> {
        let mut record = single_line(line);
        record.push('\n');
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(record.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|err| HarvestError::Filesystem(format!("append to {}: {err}", self.path)))
    }
}

/// One parsed error-ledger line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub stage: Stage,
    pub kind: SubjectKind,
    pub subject: String,
    pub status: Option<u16>,
    pub reason: String,
}

impl LedgerEntry {
    /// `Failed to download <stage> <kind>=<subject>: <status|-> - <reason>`
    pub fn to_line(&self) -> String {
        let status = self
            .status
            .map(|code| code.to_string())
            .unwrap_or_else(|| "-".to_string());
        single_line(&format!(
            "Failed to download {} {}={}: {} - {}",
            self.stage.as_str(),
            self.kind.as_str(),
            self.subject,
            status,
            self.reason
        ))
    }

    /// Parses a ledger line, accepting the structured shape and the two
    /// shapes written by older releases of the downloader.
    pub fn parse(line_number: usize, line: &str) -> Result<Self, HarvestError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let malformed = |message: &str| HarvestError::LedgerParse {
            line: line_number,
            message: message.to_string(),
        };

        if let Some(caps) = STRUCTURED_LINE.captures(line) {
            let stage = match &caps[1] {
                "resolve" => Stage::Resolve,
                _ => Stage::Fetch,
            };
            let kind = match &caps[2] {
                "name" => SubjectKind::Name,
                _ => SubjectKind::Cid,
            };
            let subject = caps[3].to_string();
            if kind == SubjectKind::Cid && subject.parse::<Cid>().is_err() {
                return Err(malformed("cid subject is not numeric"));
            }
            let status: Option<u16> = match &caps[4] {
                "-" => None,
                code => Some(code.parse().map_err(|_| malformed("bad status code"))?),
            };
            return Ok(Self {
                stage,
                kind,
                subject,
                status,
                reason: caps[5].to_string(),
            });
        }

        if let Some(caps) = LEGACY_RECORD_LINE.captures(line) {
            return Ok(Self {
                stage: Stage::Fetch,
                kind: SubjectKind::Cid,
                subject: caps[1].to_string(),
                status: Some(caps[3].parse().map_err(|_| malformed("bad status code"))?),
                reason: caps[4].to_string(),
            });
        }

        if let Some(caps) = LEGACY_LOOKUP_LINE.captures(line) {
            let encoded = LOOKUP_NAME
                .captures(&caps[1])
                .map(|name| name[1].replace('+', " "))
                .ok_or_else(|| malformed("lookup URL carries no compound name"))?;
            let name = urlencoding::decode(&encoded)
                .map_err(|_| malformed("compound name is not valid UTF-8"))?
                .into_owned();
            return Ok(Self {
                stage: Stage::Resolve,
                kind: SubjectKind::Name,
                subject: name,
                status: Some(caps[2].parse().map_err(|_| malformed("bad status code"))?),
                reason: caps[3].to_string(),
            });
        }

        Err(malformed("does not match the error ledger format"))
    }
}

fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn structured_line_without_status() {
        let entry = LedgerEntry {
            stage: Stage::Fetch,
            kind: SubjectKind::Cid,
            subject: "702".to_string(),
            status: None,
            reason: "IOError: disk full".to_string(),
        };
        let line = entry.to_line();
        assert_eq!(line, "Failed to download fetch cid=702: - - IOError: disk full");
        assert_eq!(LedgerEntry::parse(1, &line).unwrap(), entry);
    }

    #[test]
    fn names_may_contain_colons() {
        let line = "Failed to download resolve name=foo: bar: 503 - Service Unavailable";
        let entry = LedgerEntry::parse(1, line).unwrap();
        assert_eq!(entry.subject, "foo: bar");
        assert_eq!(entry.status, Some(503));
    }

    #[test]
    fn legacy_lookup_line_recovers_name() {
        let line = "Failed to download sdf file for https://pubchem.ncbi.nlm.nih.gov/rest/pug/compound/name/acetic+acid/cids/JSON?name_type=word: 503 - Service Unavailable";
        let entry = LedgerEntry::parse(4, line).unwrap();
        assert_eq!(entry.stage, Stage::Resolve);
        assert_eq!(entry.subject, "acetic acid");
    }

    #[test]
    fn legacy_lookup_line_with_unencoded_name() {
        let line = "Failed to download sdf file for https://pubchem.ncbi.nlm.nih.gov/rest/pug/compound/name/acetic acid/cids/JSON?name_type=word: 500 - Internal Server Error";
        let entry = LedgerEntry::parse(2, line).unwrap();
        assert_eq!(entry.kind, SubjectKind::Name);
        assert_eq!(entry.subject, "acetic acid");
        assert_eq!(entry.status, Some(500));
        assert_eq!(entry.reason, "Internal Server Error");
    }

    #[test]
    fn legacy_lookup_name_may_contain_slash() {
        let line = "Failed to download json file for https://pubchem.ncbi.nlm.nih.gov/rest/pug/compound/name/N,N-dimethyl 4/5-mix/cids/JSON?name_type=word: 503 - Service Unavailable";
        let entry = LedgerEntry::parse(3, line).unwrap();
        assert_eq!(entry.subject, "N,N-dimethyl 4/5-mix");
    }

    #[test]
    fn empty_name_round_trips() {
        let entry = LedgerEntry {
            stage: Stage::Resolve,
            kind: SubjectKind::Name,
            subject: String::new(),
            status: Some(503),
            reason: "Service Unavailable".to_string(),
        };
        let line = entry.to_line();
        assert_eq!(line, "Failed to download resolve name=: 503 - Service Unavailable");
        assert_eq!(LedgerEntry::parse(1, &line).unwrap(), entry);
    }

    #[test]
    fn appended_lines_stay_single_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("errors.log")).unwrap();
        let ledger = Ledger::open(&path).unwrap();
        ledger.append("first\nsecond").unwrap();
        ledger.append("third").unwrap();
        let content = std::fs::read_to_string(path.as_std_path()).unwrap();
        assert_eq!(content, "first second\nthird\n");
    }

    #[test]
    fn cid_subject_must_be_numeric() {
        let err =
            LedgerEntry::parse(9, "Failed to download fetch cid=abc: 503 - Busy").unwrap_err();
        assert_matches!(err, HarvestError::LedgerParse { line: 9, .. });
    }
}
