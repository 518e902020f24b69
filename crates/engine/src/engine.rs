//! Upload engine facade.
//!
//! Owns the shared collaborators and the table of active submissions. Each
//! submitted report gets its own [`Submission`] task; at most one per
//! report runs at a time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use reportlink_ledger::Ledger;
use reportlink_protocol::{Report, ReportDraft, ReportId, ReportStatus};
use reportlink_transfer::ReportProgress;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::UploadError;
use crate::events::{ProgressEvent, ProgressStream, Publisher};
use crate::machine::Submission;
use crate::vault::Vault;

struct Active {
    generation: u64,
    cancel: CancellationToken,
    publisher: Arc<Publisher>,
}

impl Active {
    /// The task may linger in the table briefly after its terminal event.
    fn is_running(&self) -> bool {
        !self.publisher.is_finished()
    }
}

type ActiveTable = Arc<Mutex<HashMap<ReportId, Active>>>;

/// Submits reports and tracks them until they reach a terminal state.
pub struct UploadEngine {
    ledger: Arc<dyn Ledger>,
    dispatcher: Arc<Dispatcher>,
    vault: Arc<dyn Vault>,
    active: ActiveTable,
    generation: AtomicU64,
}

impl UploadEngine {
    pub fn new(ledger: Arc<dyn Ledger>, dispatcher: Dispatcher, vault: Arc<dyn Vault>) -> Self {
        Self {
            ledger,
            dispatcher: Arc::new(dispatcher),
            vault,
            active: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Records a new report and submits it.
    pub fn submit_new(&self, draft: ReportDraft) -> Result<(Report, ProgressStream), UploadError> {
        let report = self.ledger.insert_report(draft)?;
        let stream = self.submit(report.id)?;
        Ok((report, stream))
    }

    /// Begins, or resumes, the upload of a recorded report.
    ///
    /// Must be called within a Tokio runtime. A report that is already
    /// submitted yields a single `Completed` event without network traffic.
    pub fn submit(&self, report_id: ReportId) -> Result<ProgressStream, UploadError> {
        let mut active = self.lock();
        if active.get(&report_id).is_some_and(Active::is_running) {
            return Err(UploadError::AlreadyActive(report_id));
        }

        let report = self
            .ledger
            .get_report(report_id)?
            .ok_or(UploadError::ReportNotFound(report_id))?;
        let initial = ReportProgress::from_report(&report, &HashMap::new(), &HashMap::new());

        if report.status == ReportStatus::Submitted {
            debug!(report = %report_id, "already submitted");
            return Ok(ProgressStream::finished(ProgressEvent::Completed {
                progress: initial,
            }));
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let publisher = Arc::new(Publisher::new(Arc::clone(&self.ledger), initial));
        let stream = publisher.subscribe();
        active.insert(
            report_id,
            Active {
                generation,
                cancel: cancel.clone(),
                publisher: Arc::clone(&publisher),
            },
        );
        drop(active);

        let submission = Submission::new(
            report_id,
            Arc::clone(&self.ledger),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.vault),
            publisher,
            cancel,
        );
        let table = Arc::clone(&self.active);
        tokio::spawn(async move {
            submission.run().await;
            let mut active = table.lock().unwrap_or_else(PoisonError::into_inner);
            if active.get(&report_id).is_some_and(|a| a.generation == generation) {
                active.remove(&report_id);
            }
        });

        info!(
            report = %report_id,
            files = report.files.len(),
            sent = report.bytes_sent(),
            total = report.total_size(),
            "submission started"
        );
        Ok(stream)
    }

    /// Another observer of an active submission.
    pub fn subscribe(&self, report_id: ReportId) -> Option<ProgressStream> {
        self.lock()
            .get(&report_id)
            .filter(|a| a.is_running())
            .map(|a| a.publisher.subscribe())
    }

    pub fn is_active(&self, report_id: ReportId) -> bool {
        self.lock().get(&report_id).is_some_and(Active::is_running)
    }

    /// Reports with a running submission.
    pub fn active_reports(&self) -> Vec<ReportId> {
        self.lock()
            .iter()
            .filter(|(_, a)| a.is_running())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Aborts a running submission and leaves the report resumable.
    ///
    /// Returns `false` if the report had no running submission. The ledger
    /// status is written before this returns; the submission's stream ends
    /// with a `Cancelled` event shortly after.
    pub fn cancel(&self, report_id: ReportId) -> Result<bool, UploadError> {
        let Some(cancel) = self
            .lock()
            .get(&report_id)
            .filter(|a| a.is_running())
            .map(|a| a.cancel.clone())
        else {
            return Ok(false);
        };
        cancel.cancel();
        self.dispatcher.cancel(report_id);

        // A submission that concluded meanwhile keeps its own outcome.
        match self.ledger.update_report(report_id, &mut |r| {
            if matches!(
                r.status,
                ReportStatus::Draft | ReportStatus::SubmissionInProgress
            ) {
                r.status = ReportStatus::SubmissionPartialParts;
            }
        }) {
            Ok(_) | Err(reportlink_ledger::LedgerError::ReportNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        info!(report = %report_id, "submission cancel requested");
        Ok(true)
    }

    /// Cancels every running submission. Returns the affected reports.
    pub fn cancel_all(&self) -> Vec<ReportId> {
        let mut cancelled = Vec::new();
        for report_id in self.active_reports() {
            match self.cancel(report_id) {
                Ok(true) => cancelled.push(report_id),
                Ok(false) => {}
                Err(e) => warn!(report = %report_id, error = %e, "cancel failed"),
            }
        }
        cancelled
    }

    /// Re-submits every report left in progress or partially sent.
    ///
    /// Reports already running are skipped.
    pub fn resume_unsent(&self) -> Result<Vec<ProgressStream>, UploadError> {
        let unsent = self.ledger.list_reports(&ReportStatus::UNSENT)?;
        let mut streams = Vec::with_capacity(unsent.len());
        for report in unsent {
            match self.submit(report.id) {
                Ok(stream) => streams.push(stream),
                Err(UploadError::AlreadyActive(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if !streams.is_empty() {
            info!(reports = streams.len(), "resuming unsent reports");
        }
        Ok(streams)
    }

    /// Cancels any running submission, waits for it to stop, then removes
    /// the report from the ledger.
    pub async fn delete_report(&self, report_id: ReportId) -> Result<bool, UploadError> {
        let running = self.subscribe(report_id);
        self.cancel(report_id)?;
        if let Some(stream) = running {
            stream.finish().await;
        }
        let removed = self.ledger.delete_report(report_id)?;
        if removed {
            info!(report = %report_id, "report deleted");
        }
        Ok(removed)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ReportId, Active>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
