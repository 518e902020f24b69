//! Durable report/file ledger.
//!
//! The ledger is the single shared mutable resource of the upload engine.
//! Every write returns only after it has been applied (and, for
//! [`LocalLedger::open`], flushed to disk), so a crash at any point leaves
//! a record the next submission can resume from.

mod local;
mod state;

pub use local::LocalLedger;

use reportlink_protocol::{Report, ReportDraft, ReportFile, ReportId, ReportStatus};

/// Errors produced by the ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("report not found: {0}")]
    ReportNotFound(ReportId),

    #[error("file not found: {0}")]
    FileNotFound(u64),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("ledger lock poisoned")]
    Poisoned,
}

/// Persisted record of reports and their files.
///
/// Implementations must be safe under concurrent calls and must apply
/// calls touching the same report or file one at a time.
pub trait Ledger: Send + Sync {
    /// Records a new report, assigning its id and the files' instance ids.
    fn insert_report(&self, draft: ReportDraft) -> Result<Report, LedgerError>;

    /// Returns a report with its files in upload order.
    fn get_report(&self, id: ReportId) -> Result<Option<Report>, LedgerError>;

    /// Writes the report-level fields.
    ///
    /// Files in `report.files` unknown to the ledger are added; known file
    /// rows are left untouched (use [`upsert_file`](Self::upsert_file)).
    fn upsert_report(&self, report: &Report) -> Result<(), LedgerError>;

    /// Writes one file row. The owning report must exist.
    fn upsert_file(&self, file: &ReportFile) -> Result<(), LedgerError>;

    /// Returns the files of a report in upload order.
    fn list_files(&self, report_id: ReportId) -> Result<Vec<ReportFile>, LedgerError>;

    /// Returns every report whose status is in `statuses`, oldest first.
    fn list_reports(&self, statuses: &[ReportStatus]) -> Result<Vec<Report>, LedgerError>;

    /// Atomically reads, modifies and writes the report-level fields.
    fn update_report(
        &self,
        id: ReportId,
        apply: &mut dyn FnMut(&mut Report),
    ) -> Result<Report, LedgerError>;

    /// Atomically reads, modifies and writes one file row.
    fn update_file(
        &self,
        instance_id: u64,
        apply: &mut dyn FnMut(&mut ReportFile),
    ) -> Result<ReportFile, LedgerError>;

    /// Removes a report and its files. Returns `false` if it did not exist.
    fn delete_report(&self, id: ReportId) -> Result<bool, LedgerError>;
}
