//! Resumable file transfer building blocks.
//!
//! A [`TransferDescriptor`] describes a single upload attempt: which file,
//! which byte range is still missing on the server, and where to send it.
//! [`RangeReader`] reads that range from disk and [`ReportProgress`] folds
//! per-file state into the report-level figures observers see.

mod chunked;
mod progress;
mod types;
mod validation;

pub use chunked::{RangeReader, read_range};
pub use progress::{FileProgress, ReportProgress};
pub use types::{FileTarget, TransferDescriptor};
pub use validation::validate_file_name;

/// Default chunk size for streamed request bodies: 1 MiB.
///
/// Each chunk handed to the network produces one in-flight progress tick.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid file name: {0}")]
    InvalidName(String),

    #[error("offset {offset} beyond declared size {size}")]
    OffsetOutOfRange { offset: u64, size: u64 },

    #[error("slice holds {actual} bytes, expected {expected}")]
    LengthMismatch { expected: u64, actual: u64 },

    #[error("report {0} has no server id yet")]
    MissingApiId(reportlink_protocol::ReportId),
}
