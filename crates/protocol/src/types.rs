use std::fmt;

use serde::{Deserialize, Serialize};

/// Local report identifier, assigned by the ledger on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportId(pub u64);

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Submission state of a whole report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReportStatus {
    Draft,
    SubmissionInProgress,
    SubmissionPartialParts,
    SubmissionError,
    Submitted,
}

impl ReportStatus {
    /// Statuses a start-up sweep picks up again.
    pub const UNSENT: [ReportStatus; 2] = [
        ReportStatus::SubmissionInProgress,
        ReportStatus::SubmissionPartialParts,
    ];
}

/// Submission state of one file within a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileStatus {
    Pending,
    PartialSubmitted,
    /// All bytes are on the server, finalize still outstanding.
    Uploaded,
    Submitted,
    SubmissionError,
}

/// Classified failure, as surfaced to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// No usable response: connection lost, timeout, reset.
    TransportFailure,
    /// The server answered outside the 2xx range.
    Http(u16),
    /// The response did not have the expected shape.
    UnexpectedResponse,
    /// User or system initiated abort.
    Cancelled,
    /// The vault could not produce the file content.
    VaultUnavailable,
    /// The local ledger could not be read or written.
    Storage,
}

impl ErrorKind {
    /// Returns `true` if a later submission may succeed without intervention.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            ErrorKind::TransportFailure
                | ErrorKind::Http(_)
                | ErrorKind::Cancelled
                | ErrorKind::VaultUnavailable
                | ErrorKind::Storage
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::TransportFailure => f.write_str("transport failure"),
            ErrorKind::Http(code) => write!(f, "HTTP {code}"),
            ErrorKind::UnexpectedResponse => f.write_str("unexpected response"),
            ErrorKind::Cancelled => f.write_str("cancelled"),
            ErrorKind::VaultUnavailable => f.write_str("vault unavailable"),
            ErrorKind::Storage => f.write_str("ledger unavailable"),
        }
    }
}

/// Destination server for a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Base URL, e.g. `https://reports.example.org/api`.
    pub url: String,
    pub access_token: String,
    /// Transfers may be handed to a background-capable transport.
    #[serde(default)]
    pub background_upload: bool,
}

/// A file attached to a report, as tracked by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportFile {
    /// Ledger row key; unique across all reports.
    pub instance_id: u64,
    pub report_id: ReportId,
    /// Vault reference for the file content.
    pub file_id: String,
    pub file_name: String,
    #[serde(default)]
    pub file_extension: String,
    /// Declared total size in bytes.
    pub size: u64,
    /// Bytes the server has confirmed as received.
    #[serde(default)]
    pub bytes_sent: u64,
    pub status: FileStatus,
}

impl ReportFile {
    /// Bytes not yet confirmed by the server.
    pub fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.bytes_sent)
    }

    /// Returns `true` once every declared byte is confirmed.
    pub fn is_fully_sent(&self) -> bool {
        self.bytes_sent >= self.size
    }

    /// Name used on the server, `name.ext` or just `name`.
    pub fn remote_name(&self) -> String {
        if self.file_extension.is_empty() {
            self.file_name.clone()
        } else {
            format!("{}.{}", self.file_name, self.file_extension)
        }
    }
}

/// A report with its files in upload order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: ReportId,
    /// Server-assigned id, set once create-report succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_id: Option<String>,
    pub status: ReportStatus,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub server: ServerConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<ReportFile>,
}

impl Report {
    /// Sum of declared file sizes.
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Sum of confirmed bytes across files.
    pub fn bytes_sent(&self) -> u64 {
        self.files.iter().map(|f| f.bytes_sent).sum()
    }

    /// Returns `true` if every file is finalized on the server.
    pub fn all_files_submitted(&self) -> bool {
        self.files.iter().all(|f| f.status == FileStatus::Submitted)
    }
}

/// A report not yet recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub server: ServerConfig,
    #[serde(default)]
    pub files: Vec<FileDraft>,
}

/// A file to attach to a [`ReportDraft`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDraft {
    pub file_id: String,
    pub file_name: String,
    #[serde(default)]
    pub file_extension: String,
    pub size: u64,
}
