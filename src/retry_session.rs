use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io::ErrorKind;

use camino::Utf8Path;
use tracing::{info, warn};

use crate::domain::{SubjectKind, WorkItem};
use crate::error::HarvestError;
use crate::ledger::LedgerEntry;

/// Which recorded failures are worth another attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySelector {
    pub statuses: BTreeSet<u16>,
}

impl Default for RetrySelector {
    /// Service-busy responses only.
    fn default() -> Self {
        Self {
            statuses: [503].into_iter().collect(),
        }
    }
}

impl RetrySelector {
    pub fn with_statuses(statuses: impl IntoIterator<Item = u16>) -> Self {
        Self {
            statuses: statuses.into_iter().collect(),
        }
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        entry
            .status
            .map(|status| self.statuses.contains(&status))
            .unwrap_or(false)
    }
}

/// Rebuilds a batch from an error ledger. Fetch-stage failures come back as
/// pre-resolved CIDs; resolve-stage failures come back as names. Malformed
/// lines are logged and skipped.
pub fn build_retry_batch(
    ledger_path: &Utf8Path,
    selector: &RetrySelector,
) -> Result<Vec<WorkItem>, HarvestError> {
    let content = fs::read_to_string(ledger_path.as_std_path())
        .map_err(|_| HarvestError::InputRead(ledger_path.as_std_path().to_path_buf()))?;
    Ok(retry_items_from_lines(&content, selector))
}

/// Drops pre-resolved items whose CID is already in the success ledger, so a
/// second replay of the same error ledger does not fetch them again. A
/// missing success ledger means nothing has completed yet.
pub fn skip_completed(
    items: Vec<WorkItem>,
    success_ledger: &Utf8Path,
) -> Result<Vec<WorkItem>, HarvestError> {
    let content = match fs::read_to_string(success_ledger.as_std_path()) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(items),
        Err(_) => {
            return Err(HarvestError::InputRead(
                success_ledger.as_std_path().to_path_buf(),
            ));
        }
    };
    let completed: HashSet<&str> = content.lines().map(str::trim).collect();
    let before = items.len();
    let pending: Vec<WorkItem> = items
        .into_iter()
        .filter(|item| !(item.is_pre_resolved && completed.contains(item.raw_name.as_str())))
        .collect();
    info!(
        skipped = before - pending.len(),
        "dropped identifiers already in the success ledger"
    );
    Ok(pending)
}

pub fn retry_items_from_lines(content: &str, selector: &RetrySelector) -> Vec<WorkItem> {
    let mut seen = HashSet::new();
    let mut items = Vec::new();
    let mut skipped = 0usize;

    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry = match LedgerEntry::parse(index + 1, line) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "skipping error ledger line");
                skipped += 1;
                continue;
            }
        };
        if !selector.matches(&entry) {
            continue;
        }
        let item = WorkItem {
            is_pre_resolved: entry.kind == SubjectKind::Cid,
            raw_name: entry.subject,
        };
        if seen.insert(item.clone()) {
            items.push(item);
        }
    }

    info!(items = items.len(), skipped, "retry batch assembled");
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_collapse_in_first_seen_order() {
        let content = "\
Failed to download fetch cid=2244: 503 - Service Unavailable
Failed to download resolve name=caffeine: 503 - Service Unavailable
Failed to download fetch cid=2244: 503 - Service Unavailable
";
        let items = retry_items_from_lines(content, &RetrySelector::default());
        assert_eq!(
            items,
            vec![
                WorkItem {
                    raw_name: "2244".to_string(),
                    is_pre_resolved: true
                },
                WorkItem::name("caffeine"),
            ]
        );
    }

    #[test]
    fn connection_failures_are_not_selected() {
        let content = "Failed to download fetch cid=1: - - connection reset\n";
        let selector = RetrySelector::with_statuses([500, 503]);
        assert!(retry_items_from_lines(content, &selector).is_empty());
    }
}
