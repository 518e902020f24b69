//! Per-report submission state machine.
//!
//! One [`Submission`] drives one report through create-report, then drives
//! every file concurrently through probe, transfer and finalize. Each
//! transition is written to the ledger before progress is published.

use std::sync::Arc;

use futures_util::future::join_all;
use reportlink_ledger::Ledger;
use reportlink_protocol::{ErrorKind, FileStatus, Report, ReportFile, ReportId, ReportStatus};
use reportlink_transfer::{FileTarget, TransferDescriptor};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::UploadError;
use crate::events::{ProgressEvent, Publisher};
use crate::transport::ProgressFn;
use crate::vault::Vault;

/// A file-level failure and the status it leaves the file in.
struct FileFailure {
    status: FileStatus,
    error: UploadError,
}

/// The file can be retried from where the server left off.
fn demote(error: impl Into<UploadError>) -> FileFailure {
    FileFailure {
        status: FileStatus::PartialSubmitted,
        error: error.into(),
    }
}

/// The file needs attention before it can succeed.
fn reject(error: impl Into<UploadError>) -> FileFailure {
    FileFailure {
        status: FileStatus::SubmissionError,
        error: error.into(),
    }
}

/// Drives one report to a terminal state.
pub(crate) struct Submission {
    report_id: ReportId,
    ledger: Arc<dyn Ledger>,
    dispatcher: Arc<Dispatcher>,
    vault: Arc<dyn Vault>,
    publisher: Arc<Publisher>,
    cancel: CancellationToken,
}

impl Submission {
    pub(crate) fn new(
        report_id: ReportId,
        ledger: Arc<dyn Ledger>,
        dispatcher: Arc<Dispatcher>,
        vault: Arc<dyn Vault>,
        publisher: Arc<Publisher>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            report_id,
            ledger,
            dispatcher,
            vault,
            publisher,
            cancel,
        }
    }

    /// Runs the submission and publishes its terminal event.
    pub(crate) async fn run(self) -> ProgressEvent {
        let result = self.drive().await;
        let event = self.conclude(result);
        match &event {
            ProgressEvent::Completed { .. } => {
                info!(report = %self.report_id, "report submitted");
            }
            ProgressEvent::Failed {
                kind, resumable, ..
            } => {
                warn!(report = %self.report_id, error = %kind, resumable, "submission failed");
            }
            ProgressEvent::Cancelled { .. } => {
                info!(report = %self.report_id, "submission cancelled");
            }
            ProgressEvent::Progress { .. } => {}
        }
        event
    }

    /// Create-report (if needed), then every file.
    async fn drive(&self) -> Result<(), UploadError> {
        let mut report = self
            .ledger
            .get_report(self.report_id)?
            .ok_or(UploadError::ReportNotFound(self.report_id))?;
        if report.status == ReportStatus::Submitted {
            return Ok(());
        }

        report = self.ledger.update_report(self.report_id, &mut |r| {
            r.status = ReportStatus::SubmissionInProgress;
        })?;
        self.publisher.publish();
        self.check_cancelled()?;

        if report.api_id.is_none() {
            let api_id = self.dispatcher.create_report(&report, &self.cancel).await?;
            info!(report = %self.report_id, api_id = %api_id, "report created on server");
            report = self.ledger.update_report(self.report_id, &mut |r| {
                r.api_id = Some(api_id.clone());
            })?;
            self.publisher.publish();
        }

        if report.files.is_empty() {
            return Ok(());
        }

        debug!(report = %self.report_id, files = report.files.len(), "uploading files");
        join_all(report.files.iter().map(|f| self.drive_file(&report, f.instance_id))).await;
        Ok(())
    }

    /// Runs one file's sub-machine, recording any failure.
    async fn drive_file(&self, report: &Report, instance_id: u64) {
        let Err(failure) = self.upload_file(report, instance_id).await else {
            return;
        };
        let kind = failure.error.kind();
        if kind == ErrorKind::Cancelled {
            debug!(report = %self.report_id, file = instance_id, "file aborted");
        } else {
            warn!(
                report = %self.report_id,
                file = instance_id,
                error = %failure.error,
                "file upload failed"
            );
        }

        let written = self.ledger.update_file(instance_id, &mut |f| {
            f.status = match (failure.status, f.status) {
                // Keep the knowledge that every byte already arrived.
                (FileStatus::PartialSubmitted, FileStatus::Uploaded) => FileStatus::Uploaded,
                (FileStatus::PartialSubmitted, _) if f.is_fully_sent() => FileStatus::Uploaded,
                (status, _) => status,
            };
        });
        if let Err(e) = written {
            error!(report = %self.report_id, file = instance_id, error = %e, "failed to record file error");
        }

        if kind == ErrorKind::Cancelled {
            self.publisher.clear_in_flight(instance_id);
        } else {
            self.publisher.record_error(instance_id, kind);
        }
    }

    async fn upload_file(&self, report: &Report, instance_id: u64) -> Result<(), FileFailure> {
        let file = self.load_file(instance_id).map_err(demote)?;

        // Finalized files are never touched again.
        if file.status == FileStatus::Submitted {
            return Ok(());
        }
        self.check_cancelled().map_err(demote)?;

        let target = FileTarget::new(report, &file).map_err(reject)?;

        if file.status == FileStatus::Uploaded || file.is_fully_sent() {
            return self.finalize(&target, &file).await;
        }

        let offset = self.probe(&target, &file).await?;
        if offset < file.size {
            self.transfer(report, target.clone(), &file, offset).await?;
        }
        self.finalize(&target, &file).await
    }

    /// Asks the server for its byte count and returns the resume offset.
    async fn probe(&self, target: &FileTarget, file: &ReportFile) -> Result<u64, FileFailure> {
        let server_size = match self.dispatcher.probe(target, &self.cancel).await {
            Ok(size) => size,
            Err(e @ (UploadError::Http(_) | UploadError::UnexpectedResponse(_))) => {
                warn!(
                    report = %self.report_id,
                    file = file.instance_id,
                    error = %e,
                    fallback = file.bytes_sent,
                    "probe failed, resuming from ledger offset"
                );
                return Ok(file.bytes_sent);
            }
            Err(e) => return Err(demote(e)),
        };

        if server_size > file.size {
            return Err(reject(UploadError::UnexpectedResponse(format!(
                "server holds {server_size} bytes of a {} byte file",
                file.size
            ))));
        }

        debug!(
            report = %self.report_id,
            file = file.instance_id,
            offset = server_size,
            size = file.size,
            "probed"
        );

        // Confirmed bytes never go backwards, even if the server lost some.
        self.ledger
            .update_file(file.instance_id, &mut |f| {
                f.bytes_sent = f.bytes_sent.max(server_size);
                f.status = if server_size == f.size {
                    FileStatus::Uploaded
                } else {
                    FileStatus::PartialSubmitted
                };
            })
            .map_err(demote)?;
        self.publisher.publish();
        Ok(server_size)
    }

    /// Sends `[offset, size)` of the file.
    async fn transfer(
        &self,
        report: &Report,
        target: FileTarget,
        file: &ReportFile,
        offset: u64,
    ) -> Result<(), FileFailure> {
        let slice = self.vault.load(file, offset).await.map_err(demote)?;
        let descriptor = TransferDescriptor::new(
            target,
            offset,
            file.size,
            slice.data,
            slice.url,
            report.server.background_upload,
        )
        .map_err(demote)?;

        debug!(
            report = %self.report_id,
            file = file.instance_id,
            offset,
            bytes = descriptor.len(),
            source = %descriptor.source().display(),
            "transferring"
        );

        let on_progress: ProgressFn = {
            let publisher = Arc::clone(&self.publisher);
            let instance_id = file.instance_id;
            Arc::new(move |sent| publisher.set_in_flight(instance_id, sent))
        };
        self.dispatcher
            .transfer(descriptor, Some(on_progress), &self.cancel)
            .await
            .map_err(demote)?;

        self.ledger
            .update_file(file.instance_id, &mut |f| {
                f.bytes_sent = f.size;
                f.status = FileStatus::Uploaded;
            })
            .map_err(demote)?;
        self.publisher.clear_in_flight(file.instance_id);
        Ok(())
    }

    async fn finalize(&self, target: &FileTarget, file: &ReportFile) -> Result<(), FileFailure> {
        let accepted = self
            .dispatcher
            .finalize(target, &self.cancel)
            .await
            .map_err(|e| match e {
                // Bytes are on the server; the next submission only finalizes.
                UploadError::Cancelled | UploadError::Transport(_) => demote(e),
                e => reject(e),
            })?;
        if !accepted {
            return Err(reject(UploadError::FinalizeRejected(file.file_id.clone())));
        }

        self.ledger
            .update_file(file.instance_id, &mut |f| {
                f.bytes_sent = f.size;
                f.status = FileStatus::Submitted;
            })
            .map_err(demote)?;
        debug!(report = %self.report_id, file = file.instance_id, "file submitted");
        self.publisher.publish();
        Ok(())
    }

    /// Writes the report's final status and publishes the terminal event.
    fn conclude(&self, result: Result<(), UploadError>) -> ProgressEvent {
        let report = match self.ledger.get_report(self.report_id) {
            Ok(Some(report)) => report,
            Ok(None) => {
                let kind = match &result {
                    Err(e) => e.kind(),
                    Ok(()) => ErrorKind::UnexpectedResponse,
                };
                return self.publisher.finish(|progress| ProgressEvent::Failed {
                    progress,
                    kind,
                    resumable: false,
                });
            }
            Err(e) => {
                error!(report = %self.report_id, error = %e, "cannot read final state");
                return self.publisher.finish(|progress| ProgressEvent::Failed {
                    progress,
                    kind: ErrorKind::Storage,
                    resumable: true,
                });
            }
        };

        let submitted = report.api_id.is_some() && report.all_files_submitted();
        if submitted {
            self.set_status(ReportStatus::Submitted);
            return self
                .publisher
                .finish(|progress| ProgressEvent::Completed { progress });
        }

        if self.cancel.is_cancelled() || matches!(result, Err(UploadError::Cancelled)) {
            self.mark_cancelled(&report);
            return self
                .publisher
                .finish(|progress| ProgressEvent::Cancelled { progress });
        }

        if let Err(e) = result {
            // Create-report or the ledger itself failed.
            self.set_status(ReportStatus::SubmissionError);
            let kind = e.kind();
            return self.publisher.finish(|progress| ProgressEvent::Failed {
                progress,
                kind,
                resumable: kind.is_recoverable(),
            });
        }

        let rejected = report
            .files
            .iter()
            .find(|f| f.status == FileStatus::SubmissionError);
        if let Some(file) = rejected {
            self.set_status(ReportStatus::SubmissionError);
            let kind = self
                .publisher
                .error_of(file.instance_id)
                .unwrap_or(ErrorKind::UnexpectedResponse);
            return self.publisher.finish(|progress| ProgressEvent::Failed {
                progress,
                kind,
                resumable: kind.is_recoverable(),
            });
        }

        self.set_status(ReportStatus::SubmissionPartialParts);
        let kind = report
            .files
            .iter()
            .find_map(|f| self.publisher.error_of(f.instance_id))
            .unwrap_or(ErrorKind::TransportFailure);
        self.publisher.finish(|progress| ProgressEvent::Failed {
            progress,
            kind,
            resumable: true,
        })
    }

    /// Leaves the report resumable: the report and its untouched files.
    fn mark_cancelled(&self, report: &Report) {
        self.set_status(ReportStatus::SubmissionPartialParts);
        for file in report.files.iter().filter(|f| f.status == FileStatus::Pending) {
            if let Err(e) = self.ledger.update_file(file.instance_id, &mut |f| {
                if f.status == FileStatus::Pending {
                    f.status = FileStatus::PartialSubmitted;
                }
            }) {
                error!(report = %self.report_id, file = file.instance_id, error = %e, "failed to demote file");
            }
        }
    }

    fn set_status(&self, status: ReportStatus) {
        if let Err(e) = self.ledger.update_report(self.report_id, &mut |r| r.status = status) {
            error!(report = %self.report_id, ?status, error = %e, "failed to record report status");
        }
    }

    fn load_file(&self, instance_id: u64) -> Result<ReportFile, UploadError> {
        self.ledger
            .list_files(self.report_id)?
            .into_iter()
            .find(|f| f.instance_id == instance_id)
            .ok_or(UploadError::Ledger(
                reportlink_ledger::LedgerError::FileNotFound(instance_id),
            ))
    }

    fn check_cancelled(&self) -> Result<(), UploadError> {
        if self.cancel.is_cancelled() {
            Err(UploadError::Cancelled)
        } else {
            Ok(())
        }
    }
}
