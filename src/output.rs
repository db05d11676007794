use std::io::{self, Write};
use std::time::Instant;

use crossterm::cursor::MoveToColumn;
use crossterm::queue;
use crossterm::style::{Print, Stylize};
use crossterm::terminal::{Clear, ClearType};
use serde::Serialize;

use crate::pipeline::{BatchReport, ProgressEvent, ProgressSink};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &BatchReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Redraws a single progress line on stderr.
pub struct ConsoleProgress {
    started: Instant,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn finish(&self, report: &BatchReport) -> io::Result<()> {
        let mut stderr = io::stderr();
        queue!(stderr, Print("\n"))?;
        stderr.flush()?;

        let mut stdout = io::stdout();
        writeln!(stdout, "{}", "PubChem download summary".cyan())?;
        writeln!(
            stdout,
            "{}",
            format!("Downloaded records: {}", report.succeeded).green()
        )?;
        let failures = format!("Failures: {}", report.failed);
        if report.failed > 0 {
            writeln!(stdout, "{}", failures.red())?;
            writeln!(stdout, "   error ledger: {}", report.error_ledger)?;
            if let Some(list) = &report.failed_list {
                writeln!(stdout, "   failed names: {list}")?;
            }
        } else {
            writeln!(stdout, "{}", failures.yellow())?;
        }
        writeln!(stdout, "   identifier ledger: {}", report.success_ledger)?;
        writeln!(stdout, "   elapsed: {:.1}s", report.elapsed_ms as f64 / 1000.0)?;
        Ok(())
    }

    fn render(&self, event: &ProgressEvent) -> io::Result<()> {
        let elapsed = self.started.elapsed().as_secs();
        let line = format!(
            "{} {:>3}% {}/{} ok={} failed={} {}s {}",
            progress_bar(event.percent()),
            event.percent(),
            event.completed(),
            event.total,
            event.succeeded,
            event.failed,
            elapsed,
            event.subject
        );
        let mut stderr = io::stderr();
        queue!(
            stderr,
            MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            Print(line)
        )?;
        stderr.flush()
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ConsoleProgress {
    fn event(&self, event: ProgressEvent) {
        let _ = self.render(&event);
    }
}

fn progress_bar(percent: u8) -> String {
    let total = 20;
    let filled = (percent as usize * total) / 100;
    let mut out = String::from("[");
    for i in 0..total {
        out.push(if i < filled { '#' } else { '.' });
    }
    out.push(']');
    out
}
