//! In-memory ledger tables and the rules every write must satisfy.

use std::collections::BTreeMap;

use reportlink_protocol::{
    FileStatus, Report, ReportDraft, ReportFile, ReportId, ReportStatus,
};
use serde::{Deserialize, Serialize};

use crate::LedgerError;

/// One report row plus the upload order of its files.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReportRow {
    /// Report-level fields; `files` is always empty here.
    report: Report,
    file_order: Vec<u64>,
}

/// All ledger tables. Serialized as a whole by the JSON backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct LedgerState {
    next_report_id: u64,
    next_instance_id: u64,
    reports: BTreeMap<u64, ReportRow>,
    files: BTreeMap<u64, ReportFile>,
}

impl LedgerState {
    pub(crate) fn insert_report(&mut self, draft: ReportDraft) -> Report {
        self.next_report_id += 1;
        let id = ReportId(self.next_report_id);

        let mut files = Vec::with_capacity(draft.files.len());
        for f in draft.files {
            self.next_instance_id += 1;
            let file = ReportFile {
                instance_id: self.next_instance_id,
                report_id: id,
                file_id: f.file_id,
                file_name: f.file_name,
                file_extension: f.file_extension,
                size: f.size,
                bytes_sent: 0,
                status: FileStatus::Pending,
            };
            self.files.insert(file.instance_id, file.clone());
            files.push(file);
        }

        let fields = Report {
            id,
            api_id: None,
            status: ReportStatus::Draft,
            title: draft.title,
            description: draft.description,
            server: draft.server,
            files: Vec::new(),
        };
        let file_order = files.iter().map(|f| f.instance_id).collect();
        self.reports.insert(
            id.0,
            ReportRow {
                report: fields.clone(),
                file_order,
            },
        );
        Report { files, ..fields }
    }

    pub(crate) fn get_report(&self, id: ReportId) -> Option<Report> {
        self.assemble(id)
    }

    pub(crate) fn upsert_report(&mut self, report: &Report) -> Result<(), LedgerError> {
        for f in &report.files {
            if f.report_id != report.id {
                return Err(LedgerError::Invariant(format!(
                    "file {} belongs to report {}, not {}",
                    f.instance_id, f.report_id, report.id
                )));
            }
            if let Some(existing) = self.files.get(&f.instance_id)
                && existing.report_id != report.id
            {
                return Err(LedgerError::Invariant(format!(
                    "file {} already recorded under report {}",
                    f.instance_id, existing.report_id
                )));
            }
            check_file(f)?;
        }

        let mut fields = report.clone();
        fields.files.clear();
        self.next_report_id = self.next_report_id.max(report.id.0);

        let row = self
            .reports
            .entry(report.id.0)
            .or_insert_with(|| ReportRow {
                report: fields.clone(),
                file_order: Vec::new(),
            });
        row.report = fields;

        for f in &report.files {
            if !self.files.contains_key(&f.instance_id) {
                self.next_instance_id = self.next_instance_id.max(f.instance_id);
                self.files.insert(f.instance_id, f.clone());
                row.file_order.push(f.instance_id);
            }
        }
        Ok(())
    }

    pub(crate) fn upsert_file(&mut self, file: &ReportFile) -> Result<(), LedgerError> {
        check_file(file)?;
        let row = self
            .reports
            .get_mut(&file.report_id.0)
            .ok_or(LedgerError::ReportNotFound(file.report_id))?;

        if let Some(existing) = self.files.get(&file.instance_id)
            && existing.report_id != file.report_id
        {
            return Err(LedgerError::Invariant(format!(
                "file {} cannot move from report {} to {}",
                file.instance_id, existing.report_id, file.report_id
            )));
        }

        if !row.file_order.contains(&file.instance_id) {
            row.file_order.push(file.instance_id);
        }
        self.next_instance_id = self.next_instance_id.max(file.instance_id);
        self.files.insert(file.instance_id, file.clone());
        Ok(())
    }

    pub(crate) fn list_files(&self, report_id: ReportId) -> Result<Vec<ReportFile>, LedgerError> {
        let row = self
            .reports
            .get(&report_id.0)
            .ok_or(LedgerError::ReportNotFound(report_id))?;
        Ok(row
            .file_order
            .iter()
            .filter_map(|id| self.files.get(id).cloned())
            .collect())
    }

    pub(crate) fn list_reports(&self, statuses: &[ReportStatus]) -> Vec<Report> {
        self.reports
            .values()
            .filter(|row| statuses.contains(&row.report.status))
            .filter_map(|row| self.assemble(row.report.id))
            .collect()
    }

    pub(crate) fn update_report(
        &mut self,
        id: ReportId,
        apply: &mut dyn FnMut(&mut Report),
    ) -> Result<Report, LedgerError> {
        let row = self
            .reports
            .get_mut(&id.0)
            .ok_or(LedgerError::ReportNotFound(id))?;
        let mut fields = row.report.clone();
        apply(&mut fields);
        // Identity and file rows are not editable through this path.
        fields.id = id;
        fields.files.clear();
        row.report = fields;
        self.assemble(id).ok_or(LedgerError::ReportNotFound(id))
    }

    pub(crate) fn update_file(
        &mut self,
        instance_id: u64,
        apply: &mut dyn FnMut(&mut ReportFile),
    ) -> Result<ReportFile, LedgerError> {
        let current = self
            .files
            .get(&instance_id)
            .ok_or(LedgerError::FileNotFound(instance_id))?;
        let mut next = current.clone();
        apply(&mut next);
        next.instance_id = current.instance_id;
        next.report_id = current.report_id;
        check_file(&next)?;
        self.files.insert(instance_id, next.clone());
        Ok(next)
    }

    pub(crate) fn delete_report(&mut self, id: ReportId) -> bool {
        let Some(row) = self.reports.remove(&id.0) else {
            return false;
        };
        for instance_id in row.file_order {
            self.files.remove(&instance_id);
        }
        true
    }

    fn assemble(&self, id: ReportId) -> Option<Report> {
        let row = self.reports.get(&id.0)?;
        let mut report = row.report.clone();
        report.files = row
            .file_order
            .iter()
            .filter_map(|fid| self.files.get(fid).cloned())
            .collect();
        Some(report)
    }
}

/// Rejects file rows that break the byte-count invariants.
fn check_file(file: &ReportFile) -> Result<(), LedgerError> {
    if file.bytes_sent > file.size {
        return Err(LedgerError::Invariant(format!(
            "file {}: bytes_sent {} exceeds size {}",
            file.instance_id, file.bytes_sent, file.size
        )));
    }
    if file.status == FileStatus::Submitted && file.bytes_sent != file.size {
        return Err(LedgerError::Invariant(format!(
            "file {}: submitted with {} of {} bytes",
            file.instance_id, file.bytes_sent, file.size
        )));
    }
    Ok(())
}
