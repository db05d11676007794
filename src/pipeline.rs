use std::collections::VecDeque;
use std::io::{ErrorKind, Write};
use std::sync::mpsc::{self, Sender};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::domain::{Cid, Outcome, Stage, SubjectKind, WorkItem};
use crate::error::HarvestError;
use crate::ledger::{
    ERROR_LEDGER_FILE, FAILED_LIST_FILE, Ledger, LedgerEntry, SUCCESS_LEDGER_FILE,
};
use crate::pubchem::{CompoundClient, PubChemClient};
use crate::rate_gate::RateGate;
use crate::transport::{ReqwestTransport, RetryingTransport};

/// Emitted by the coordinator after every completed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
    pub subject: String,
    pub failed_stage: Option<Stage>,
}

impl ProgressEvent {
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed
    }

    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.completed() * 100) / self.total).min(100) as u8
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

impl ProgressSink for Sender<ProgressEvent> {
    fn event(&self, event: ProgressEvent) {
        let _ = self.send(event);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub started_at: String,
    pub elapsed_ms: u64,
    pub success_ledger: String,
    pub error_ledger: String,
    pub failed_list: Option<String>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.succeeded + self.failed == self.total
    }
}

#[derive(Debug, Default)]
struct BatchState {
    succeeded: usize,
    failed: usize,
    failed_subjects: Vec<String>,
}

/// Worker pool plus batch coordinator.
///
/// Workers pull items from a shared queue, pass the rate gate, then run
/// resolve and fetch for that item. Outcomes flow back over a channel to the
/// calling thread, which alone writes the ledgers and counts progress.
pub struct Pipeline<C> {
    client: C,
    config: PipelineConfig,
    gate: RateGate,
}

impl Pipeline<PubChemClient<ReqwestTransport>> {
    pub fn from_config(config: PipelineConfig) -> Result<Self, HarvestError> {
        let transport = ReqwestTransport::new(config.timeout)?;
        let client = PubChemClient::new(
            RetryingTransport::new(transport, config.retry.clone()),
            config.base_url.clone(),
        );
        Self::new(client, config)
    }
}

impl<C: CompoundClient> Pipeline<C> {
    pub fn new(client: C, config: PipelineConfig) -> Result<Self, HarvestError> {
        config.validate()?;
        let gate = RateGate::new(config.rate_interval);
        Ok(Self {
            client,
            config,
            gate,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Runs every item to a recorded outcome. Only setup problems (an
    /// unusable destination, unopenable ledgers) are returned as errors.
    pub fn run_batch(
        &self,
        items: Vec<WorkItem>,
        sink: &dyn ProgressSink,
    ) -> Result<BatchReport, HarvestError> {
        let destination = self.config.destination.as_path();
        prepare_destination(destination)?;
        let success_ledger = Ledger::open(&destination.join(SUCCESS_LEDGER_FILE))?;
        let error_ledger = Ledger::open(&destination.join(ERROR_LEDGER_FILE))?;

        let started_at = chrono::Utc::now().to_rfc3339();
        let start = Instant::now();
        let total = items.len();
        let workers = self.config.concurrency.min(total);
        info!(
            total,
            workers,
            format = %self.config.format,
            destination = %destination,
            "batch started"
        );

        let queue = Mutex::new(VecDeque::from(items));
        let (tx, rx) = mpsc::channel::<(WorkItem, Outcome)>();
        let mut state = BatchState::default();

        thread::scope(|scope| {
            let queue = &queue;
            for worker in 0..workers {
                let tx = tx.clone();
                scope.spawn(move || self.worker_loop(worker, queue, tx));
            }
            drop(tx);

            for (item, outcome) in rx {
                let event = record_outcome(
                    &mut state,
                    total,
                    item,
                    outcome,
                    &success_ledger,
                    &error_ledger,
                );
                sink.event(event);
            }
        });

        let failed_list = match write_failed_list(destination, &state.failed_subjects) {
            Ok(path) => path.map(|path| path.to_string()),
            Err(err) => {
                warn!(error = %err, "could not write the failed subject list");
                None
            }
        };
        let report = BatchReport {
            total,
            succeeded: state.succeeded,
            failed: state.failed,
            started_at,
            elapsed_ms: start.elapsed().as_millis() as u64,
            success_ledger: success_ledger.path().to_string(),
            error_ledger: error_ledger.path().to_string(),
            failed_list,
        };
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            elapsed_ms = report.elapsed_ms,
            "batch finished"
        );
        Ok(report)
    }

    fn worker_loop(
        &self,
        worker: usize,
        queue: &Mutex<VecDeque<WorkItem>>,
        tx: Sender<(WorkItem, Outcome)>,
    ) {
        loop {
            let next = queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            let Some(item) = next else {
                break;
            };
            self.gate.acquire();
            let outcome = self.process(&item);
            if tx.send((item, outcome)).is_err() {
                break;
            }
        }
        debug!(worker, "worker drained queue");
    }

    /// Pending -> (Resolving) -> Fetching -> Done for a single item.
    fn process(&self, item: &WorkItem) -> Outcome {
        let cid = if item.is_pre_resolved {
            match item.raw_name.parse::<Cid>() {
                Ok(cid) => cid,
                Err(err) => return failure(Stage::Fetch, None, &err),
            }
        } else {
            debug!(name = %item.raw_name, "resolving");
            match self.client.resolve(&item.raw_name) {
                Ok(cid) => cid,
                Err(err) => return failure(Stage::Resolve, None, &err),
            }
        };

        debug!(cid = %cid, "fetching");
        match self
            .client
            .fetch_record(&cid, self.config.format, &self.config.destination)
        {
            Ok(bytes_written) => Outcome::Success {
                identifier: cid,
                bytes_written,
            },
            Err(err) => failure(Stage::Fetch, Some(cid), &err),
        }
    }
}

fn record_outcome(
    state: &mut BatchState,
    total: usize,
    item: WorkItem,
    outcome: Outcome,
    success_ledger: &Ledger,
    error_ledger: &Ledger,
) -> ProgressEvent {
    let (stage, http_status, message, identifier) = match outcome {
        Outcome::Success { identifier, .. } => {
            match success_ledger.append(identifier.as_str()) {
                Ok(()) => {
                    state.succeeded += 1;
                    return ProgressEvent {
                        succeeded: state.succeeded,
                        failed: state.failed,
                        total,
                        subject: identifier.to_string(),
                        failed_stage: None,
                    };
                }
                Err(err) => (Stage::Fetch, err.http_status(), err.reason(), Some(identifier)),
            }
        }
        Outcome::Failure {
            stage,
            http_status,
            message,
            identifier,
        } => (stage, http_status, message, identifier),
    };

    let entry = match identifier {
        Some(cid) => LedgerEntry {
            stage,
            kind: SubjectKind::Cid,
            subject: cid.to_string(),
            status: http_status,
            reason: message,
        },
        None => LedgerEntry {
            stage,
            kind: SubjectKind::Name,
            subject: item.raw_name,
            status: http_status,
            reason: message,
        },
    };
    warn!(
        stage = %entry.stage,
        subject = %entry.subject,
        status = ?entry.status,
        reason = %entry.reason,
        "item failed"
    );
    if let Err(err) = error_ledger.append(&entry.to_line()) {
        error!(error = %err, line = %entry.to_line(), "could not record failure");
    }

    state.failed += 1;
    state.failed_subjects.push(entry.subject.clone());
    ProgressEvent {
        succeeded: state.succeeded,
        failed: state.failed,
        total,
        subject: entry.subject,
        failed_stage: Some(stage),
    }
}

fn failure(stage: Stage, identifier: Option<Cid>, err: &HarvestError) -> Outcome {
    Outcome::Failure {
        stage,
        http_status: err.http_status(),
        message: err.reason(),
        identifier,
    }
}

/// Replaces `failed_names.txt` with this batch's failed subjects, or removes a
/// stale one when nothing failed.
fn write_failed_list(
    destination: &Utf8Path,
    subjects: &[String],
) -> Result<Option<Utf8PathBuf>, HarvestError> {
    let target = destination.join(FAILED_LIST_FILE);
    if subjects.is_empty() {
        return match std::fs::remove_file(target.as_std_path()) {
            Ok(()) => Ok(None),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(HarvestError::Filesystem(format!("remove {target}: {err}"))),
        };
    }

    let mut temp = tempfile::Builder::new()
        .prefix(".pug-harvest")
        .suffix(".part")
        .tempfile_in(destination.as_std_path())
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    for subject in subjects {
        writeln!(temp, "{subject}").map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    }
    temp.persist(target.as_std_path())
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    Ok(Some(target))
}

/// Checks once, before any worker starts, that records can be written.
pub fn prepare_destination(destination: &Utf8Path) -> Result<(), HarvestError> {
    let metadata = std::fs::metadata(destination.as_std_path())
        .map_err(|err| HarvestError::InvalidDestination(format!("{destination}: {err}")))?;
    if !metadata.is_dir() {
        return Err(HarvestError::InvalidDestination(format!(
            "{destination} is not a directory"
        )));
    }
    tempfile::Builder::new()
        .prefix(".pug-harvest-probe")
        .tempfile_in(destination.as_std_path())
        .map_err(|err| HarvestError::InvalidDestination(format!("{destination}: {err}")))?;
    Ok(())
}
