//! Data model and wire types shared by the report upload crates.

pub mod constants;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use constants::SIZE_HEADER;
pub use messages::{
    CreateReportRequest, CreateReportResponse, FinalizeFileRequest, FinalizeFileResponse,
};
pub use types::{
    ErrorKind, FileDraft, FileStatus, Report, ReportDraft, ReportFile, ReportId, ReportStatus,
    ServerConfig,
};
