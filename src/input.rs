use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use crate::domain::WorkItem;
use crate::error::HarvestError;

/// Reads a newline-separated list; `-` reads standard input.
pub fn read_input(path: &str) -> Result<Vec<String>, HarvestError> {
    let content = if path == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .map_err(|_| HarvestError::InputRead(PathBuf::from("<stdin>")))?;
        buffer
    } else {
        fs::read_to_string(path).map_err(|_| HarvestError::InputRead(PathBuf::from(path)))?
    };
    Ok(parse_lines(&content))
}

pub fn parse_lines(content: &str) -> Vec<String> {
    clean_names(content.lines())
}

/// Trims each name and drops the blank ones.
pub fn clean_names<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .filter_map(|name| {
            let trimmed = name.as_ref().trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .collect()
}

pub fn work_items(lines: Vec<String>, pre_resolved: bool) -> Vec<WorkItem> {
    lines
        .into_iter()
        .map(|raw_name| WorkItem {
            raw_name,
            is_pre_resolved: pre_resolved,
        })
        .collect()
}
