use std::io::Write;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use pug_harvest::domain::{Stage, SubjectKind, WorkItem};
use pug_harvest::error::HarvestError;
use pug_harvest::ledger::LedgerEntry;
use pug_harvest::retry_session::{
    RetrySelector, build_retry_batch, retry_items_from_lines, skip_completed,
};

fn write_ledger(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn only_matching_statuses_are_selected() {
    let ledger = write_ledger(
        "\
Failed to download fetch cid=2244: 503 - Service Unavailable
Failed to download resolve name=doesnotexist123: 404 - NotFound: no identifier for doesnotexist123
Failed to download resolve name=caffeine: 503 - Service Unavailable
Failed to download fetch cid=3672: 500 - Internal Server Error
Failed to download fetch cid=702: 503 - Service Unavailable
",
    );
    let path = Utf8PathBuf::from_path_buf(ledger.path().to_path_buf()).unwrap();

    let items = build_retry_batch(&path, &RetrySelector::default()).unwrap();
    assert_eq!(
        items,
        vec![
            WorkItem {
                raw_name: "2244".to_string(),
                is_pre_resolved: true
            },
            WorkItem::name("caffeine"),
            WorkItem {
                raw_name: "702".to_string(),
                is_pre_resolved: true
            },
        ]
    );
}

#[test]
fn custom_selector_widens_the_batch() {
    let content = "\
Failed to download fetch cid=3672: 500 - Internal Server Error
Failed to download fetch cid=702: 503 - Service Unavailable
";
    let items = retry_items_from_lines(content, &RetrySelector::with_statuses([500, 503]));
    assert_eq!(items.len(), 2);
}

#[test]
fn malformed_lines_are_skipped() {
    let content = "\
garbage line
Failed to download fetch cid=abc: 503 - Busy
Failed to download resolve name=aspirin: 503 - Service Unavailable
";
    let items = retry_items_from_lines(content, &RetrySelector::default());
    assert_eq!(items, vec![WorkItem::name("aspirin")]);
}

#[test]
fn legacy_ledger_shapes_are_understood() {
    let content = "\
Failed to download 2244.sdf: 503 - Service Unavailable
Failed to download sdf file for https://pubchem.ncbi.nlm.nih.gov/rest/pug/compound/name/acetic%20acid/cids/JSON?name_type=word: 503 - Service Unavailable
";
    let items = retry_items_from_lines(content, &RetrySelector::default());
    assert_eq!(
        items,
        vec![
            WorkItem {
                raw_name: "2244".to_string(),
                is_pre_resolved: true
            },
            WorkItem::name("acetic acid"),
        ]
    );
}

#[test]
fn unencoded_legacy_lookup_names_are_retried() {
    let content = "Failed to download sdf file for https://pubchem.ncbi.nlm.nih.gov/rest/pug/compound/name/acetic acid/cids/JSON?name_type=word: 500 - Internal Server Error\n";
    let items = retry_items_from_lines(content, &RetrySelector::with_statuses([500]));
    assert_eq!(items, vec![WorkItem::name("acetic acid")]);
}

#[test]
fn written_lines_parse_back() {
    let entry = LedgerEntry {
        stage: Stage::Resolve,
        kind: SubjectKind::Name,
        subject: "sodium chloride".to_string(),
        status: Some(503),
        reason: "Service Unavailable".to_string(),
    };
    assert_eq!(LedgerEntry::parse(1, &entry.to_line()).unwrap(), entry);
}

#[test]
fn unreadable_ledger_is_an_input_error() {
    let path = Utf8PathBuf::from("/nonexistent/download_errors.log");
    assert_matches!(
        build_retry_batch(&path, &RetrySelector::default()),
        Err(HarvestError::InputRead(_))
    );
}

#[test]
fn completed_identifiers_are_not_replayed() {
    let success = write_ledger("2244\n3672\n");
    let path = Utf8PathBuf::from_path_buf(success.path().to_path_buf()).unwrap();
    let items = vec![
        WorkItem {
            raw_name: "2244".to_string(),
            is_pre_resolved: true,
        },
        WorkItem {
            raw_name: "702".to_string(),
            is_pre_resolved: true,
        },
        WorkItem::name("2244"),
    ];

    let pending = skip_completed(items, &path).unwrap();
    assert_eq!(
        pending,
        vec![
            WorkItem {
                raw_name: "702".to_string(),
                is_pre_resolved: true
            },
            WorkItem::name("2244"),
        ]
    );
}

#[test]
fn missing_success_ledger_keeps_every_item() {
    let dir = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().join("cid_list.txt")).unwrap();
    let items = vec![WorkItem::name("caffeine")];
    assert_eq!(skip_completed(items.clone(), &path).unwrap(), items);
}
