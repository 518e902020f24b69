use std::collections::HashMap;

use reportlink_protocol::{ErrorKind, FileStatus, Report, ReportId, ReportStatus};
use serde::Serialize;

/// Progress of one file within a report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileProgress {
    pub instance_id: u64,
    pub file_id: String,
    pub status: FileStatus,
    pub size: u64,
    /// Bytes confirmed by the server (persisted, never decreases).
    pub bytes_sent: u64,
    /// Bytes of the current attempt handed to the network but not yet
    /// acknowledged. Informational only.
    pub in_flight: u64,
    /// Last failure of this file during the current submission.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

/// Aggregate progress of a report, recomputed from the full file set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportProgress {
    pub report_id: ReportId,
    pub status: ReportStatus,
    pub total_size: u64,
    /// Sum of confirmed bytes across files.
    pub bytes_sent: u64,
    pub files: Vec<FileProgress>,
}

impl ReportProgress {
    /// Folds a ledger snapshot plus transient per-file state into one value.
    ///
    /// `in_flight` and `errors` are keyed by file instance id; entries for
    /// files not in `report` are ignored.
    pub fn from_report(
        report: &Report,
        in_flight: &HashMap<u64, u64>,
        errors: &HashMap<u64, ErrorKind>,
    ) -> Self {
        let files: Vec<FileProgress> = report
            .files
            .iter()
            .map(|f| FileProgress {
                instance_id: f.instance_id,
                file_id: f.file_id.clone(),
                status: f.status,
                size: f.size,
                bytes_sent: f.bytes_sent,
                in_flight: in_flight
                    .get(&f.instance_id)
                    .copied()
                    .unwrap_or(0)
                    .min(f.remaining()),
                error: errors.get(&f.instance_id).copied(),
            })
            .collect();

        Self {
            report_id: report.id,
            status: report.status,
            total_size: report.total_size(),
            bytes_sent: report.bytes_sent(),
            files,
        }
    }

    /// Confirmed progress as a percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total_size == 0 {
            return 100.0;
        }
        self.bytes_sent as f64 / self.total_size as f64 * 100.0
    }

    /// Confirmed plus in-flight bytes, for display only.
    pub fn optimistic_bytes(&self) -> u64 {
        self.bytes_sent + self.files.iter().map(|f| f.in_flight).sum::<u64>()
    }

    /// Files that failed during the current submission.
    pub fn failed_files(&self) -> impl Iterator<Item = &FileProgress> {
        self.files.iter().filter(|f| f.error.is_some())
    }

    /// Returns the progress entry for a file instance.
    pub fn file(&self, instance_id: u64) -> Option<&FileProgress> {
        self.files.iter().find(|f| f.instance_id == instance_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reportlink_protocol::{ReportFile, ServerConfig};

    fn file(instance_id: u64, size: u64, bytes_sent: u64, status: FileStatus) -> ReportFile {
        ReportFile {
            instance_id,
            report_id: ReportId(1),
            file_id: format!("f{instance_id}"),
            file_name: format!("f{instance_id}"),
            file_extension: String::new(),
            size,
            bytes_sent,
            status,
        }
    }

    fn report(files: Vec<ReportFile>) -> Report {
        Report {
            id: ReportId(1),
            api_id: Some("api".into()),
            status: ReportStatus::SubmissionInProgress,
            title: "t".into(),
            description: String::new(),
            server: ServerConfig {
                url: "https://example.org".into(),
                access_token: "tok".into(),
                background_upload: false,
            },
            files,
        }
    }

    #[test]
    fn sums_confirmed_bytes() {
        let r = report(vec![
            file(1, 1000, 500, FileStatus::PartialSubmitted),
            file(2, 200, 200, FileStatus::Uploaded),
            file(3, 300, 0, FileStatus::Pending),
        ]);
        let p = ReportProgress::from_report(&r, &HashMap::new(), &HashMap::new());
        assert_eq!(p.total_size, 1500);
        assert_eq!(p.bytes_sent, 700);
        assert_eq!(p.files.len(), 3);
        assert_eq!(p.file(2).unwrap().status, FileStatus::Uploaded);
    }

    #[test]
    fn in_flight_does_not_count_as_confirmed() {
        let r = report(vec![file(1, 1000, 500, FileStatus::PartialSubmitted)]);
        let in_flight = HashMap::from([(1, 300)]);
        let p = ReportProgress::from_report(&r, &in_flight, &HashMap::new());
        assert_eq!(p.bytes_sent, 500);
        assert_eq!(p.file(1).unwrap().in_flight, 300);
        assert_eq!(p.optimistic_bytes(), 800);
    }

    #[test]
    fn in_flight_clamped_to_remaining() {
        let r = report(vec![file(1, 1000, 900, FileStatus::PartialSubmitted)]);
        let in_flight = HashMap::from([(1, 5000), (99, 10)]);
        let p = ReportProgress::from_report(&r, &in_flight, &HashMap::new());
        assert_eq!(p.file(1).unwrap().in_flight, 100);
        assert_eq!(p.optimistic_bytes(), 1000);
    }

    #[test]
    fn errors_attached_to_files() {
        let r = report(vec![
            file(1, 10, 0, FileStatus::PartialSubmitted),
            file(2, 10, 0, FileStatus::Pending),
        ]);
        let errors = HashMap::from([(1, ErrorKind::TransportFailure)]);
        let p = ReportProgress::from_report(&r, &HashMap::new(), &errors);
        let failed: Vec<_> = p.failed_files().map(|f| f.instance_id).collect();
        assert_eq!(failed, vec![1]);
    }

    #[test]
    fn percentage_of_empty_report_is_complete() {
        let p = ReportProgress::from_report(&report(vec![]), &HashMap::new(), &HashMap::new());
        assert!((p.percentage() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn percentage_half() {
        let r = report(vec![file(1, 1000, 500, FileStatus::PartialSubmitted)]);
        let p = ReportProgress::from_report(&r, &HashMap::new(), &HashMap::new());
        assert!((p.percentage() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn serializes_camel_case_without_empty_error() {
        let r = report(vec![file(1, 10, 0, FileStatus::Pending)]);
        let p = ReportProgress::from_report(&r, &HashMap::new(), &HashMap::new());
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("\"bytesSent\":0"));
        assert!(json.contains("\"inFlight\":0"));
        assert!(!json.contains("error"));
    }
}
