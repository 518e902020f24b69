//! Progress delivery.
//!
//! Each submission publishes into a `tokio::sync::watch` channel. Observers
//! always see the most recent snapshot; intermediate snapshots may be
//! skipped by a slow observer. A terminal event is never overwritten, so
//! it is always the last thing a [`ProgressStream`] yields.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use reportlink_ledger::Ledger;
use reportlink_protocol::{ErrorKind, ReportId};
use reportlink_transfer::ReportProgress;
use serde::Serialize;
use tokio::sync::watch;
use tracing::warn;

/// Event observed by a submission's caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProgressEvent {
    /// Intermediate snapshot.
    Progress { progress: ReportProgress },
    /// Every file is finalized on the server.
    Completed { progress: ReportProgress },
    /// The attempt ended without submitting every file.
    Failed {
        progress: ReportProgress,
        kind: ErrorKind,
        /// A later submission may succeed without intervention.
        resumable: bool,
    },
    /// Aborted by the caller; the ledger is left resumable.
    Cancelled { progress: ReportProgress },
}

impl ProgressEvent {
    pub fn progress(&self) -> &ReportProgress {
        match self {
            ProgressEvent::Progress { progress }
            | ProgressEvent::Completed { progress }
            | ProgressEvent::Failed { progress, .. }
            | ProgressEvent::Cancelled { progress } => progress,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressEvent::Progress { .. })
    }

    pub fn report_id(&self) -> ReportId {
        self.progress().report_id
    }
}

/// Coalescing stream of [`ProgressEvent`]s for one submission.
pub struct ProgressStream {
    rx: watch::Receiver<ProgressEvent>,
    done: bool,
}

impl ProgressStream {
    pub(crate) fn new(mut rx: watch::Receiver<ProgressEvent>) -> Self {
        // Deliver the current value first.
        rx.mark_changed();
        Self { rx, done: false }
    }

    /// A stream that yields `event` and then ends.
    pub(crate) fn finished(event: ProgressEvent) -> Self {
        let (_tx, rx) = watch::channel(event);
        Self::new(rx)
    }

    pub fn report_id(&self) -> ReportId {
        self.rx.borrow().report_id()
    }

    /// Most recent event, without waiting.
    pub fn latest(&self) -> ProgressEvent {
        self.rx.borrow().clone()
    }

    /// Waits for the next event. Returns `None` after the terminal event.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        if self.done {
            return None;
        }
        // Unseen values are delivered even after the publisher is dropped.
        if self.rx.changed().await.is_err() {
            self.done = true;
            return None;
        }
        let event = self.rx.borrow_and_update().clone();
        self.done = event.is_terminal();
        Some(event)
    }

    /// Drains the stream, returning the last event seen.
    pub async fn finish(mut self) -> ProgressEvent {
        let mut last = self.latest();
        while let Some(event) = self.next().await {
            last = event;
        }
        last
    }
}

#[derive(Default)]
struct Transient {
    in_flight: HashMap<u64, u64>,
    errors: HashMap<u64, ErrorKind>,
}

/// Recomputes and publishes report progress for one submission.
///
/// Every snapshot is rebuilt from the ledger's full file set under one
/// lock, so concurrent file tasks cannot publish out of order.
pub(crate) struct Publisher {
    report_id: ReportId,
    ledger: Arc<dyn Ledger>,
    tx: watch::Sender<ProgressEvent>,
    transient: Mutex<Transient>,
}

impl Publisher {
    pub(crate) fn new(ledger: Arc<dyn Ledger>, initial: ReportProgress) -> Self {
        let report_id = initial.report_id;
        let (tx, _) = watch::channel(ProgressEvent::Progress { progress: initial });
        Self {
            report_id,
            ledger,
            tx,
            transient: Mutex::new(Transient::default()),
        }
    }

    pub(crate) fn subscribe(&self) -> ProgressStream {
        ProgressStream::new(self.tx.subscribe())
    }

    /// Returns `true` once the terminal event is published.
    pub(crate) fn is_finished(&self) -> bool {
        self.tx.borrow().is_terminal()
    }

    /// Publishes a fresh snapshot.
    pub(crate) fn publish(&self) {
        self.update(|_| {});
    }

    /// Records bytes of the current attempt handed to the network.
    pub(crate) fn set_in_flight(&self, instance_id: u64, bytes: u64) {
        self.update(|t| {
            t.in_flight.insert(instance_id, bytes);
        });
    }

    pub(crate) fn clear_in_flight(&self, instance_id: u64) {
        self.update(|t| {
            t.in_flight.remove(&instance_id);
        });
    }

    /// Tags a file with an error and publishes.
    pub(crate) fn record_error(&self, instance_id: u64, kind: ErrorKind) {
        self.update(|t| {
            t.in_flight.remove(&instance_id);
            t.errors.insert(instance_id, kind);
        });
    }

    /// Error recorded for a file during this submission.
    pub(crate) fn error_of(&self, instance_id: u64) -> Option<ErrorKind> {
        self.lock().errors.get(&instance_id).copied()
    }

    /// Publishes the terminal event built from a final snapshot.
    pub(crate) fn finish(
        &self,
        make: impl FnOnce(ReportProgress) -> ProgressEvent,
    ) -> ProgressEvent {
        let mut transient = self.lock();
        transient.in_flight.clear();
        let progress = self
            .snapshot(&transient)
            .unwrap_or_else(|| self.tx.borrow().progress().clone());
        let event = make(progress);
        self.tx.send_if_modified(|current| {
            if current.is_terminal() {
                return false;
            }
            *current = event.clone();
            true
        });
        event
    }

    fn update(&self, apply: impl FnOnce(&mut Transient)) {
        let mut transient = self.lock();
        apply(&mut transient);
        let Some(progress) = self.snapshot(&transient) else {
            return;
        };
        self.tx.send_if_modified(|current| {
            if current.is_terminal() || progress.bytes_sent < current.progress().bytes_sent {
                return false;
            }
            if *current.progress() == progress {
                return false;
            }
            *current = ProgressEvent::Progress { progress };
            true
        });
    }

    fn snapshot(&self, transient: &Transient) -> Option<ReportProgress> {
        match self.ledger.get_report(self.report_id) {
            Ok(Some(report)) => Some(ReportProgress::from_report(
                &report,
                &transient.in_flight,
                &transient.errors,
            )),
            Ok(None) => None,
            Err(e) => {
                warn!(report = %self.report_id, error = %e, "progress snapshot failed");
                None
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Transient> {
        self.transient.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
