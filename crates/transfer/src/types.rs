use std::ops::Range;
use std::path::PathBuf;

use reportlink_protocol::constants::file_url;
use reportlink_protocol::{Report, ReportFile, ReportId};

use crate::{TransferError, validate_file_name};

/// Addressing and credentials for the per-file endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTarget {
    pub report_id: ReportId,
    /// Ledger row key of the file.
    pub instance_id: u64,
    /// Vault reference, sent back on finalize.
    pub file_id: String,
    pub api_id: String,
    /// Fully resolved probe/transfer/finalize URL.
    pub url: String,
    pub access_token: String,
}

impl FileTarget {
    /// Builds the target for `file` within `report`.
    ///
    /// Fails if the report has not been created on the server yet or the
    /// file name would escape its URL segment.
    pub fn new(report: &Report, file: &ReportFile) -> Result<Self, TransferError> {
        let api_id = report
            .api_id
            .clone()
            .ok_or(TransferError::MissingApiId(report.id))?;
        let remote_name = file.remote_name();
        validate_file_name(&remote_name)?;

        Ok(Self {
            report_id: report.id,
            instance_id: file.instance_id,
            file_id: file.file_id.clone(),
            url: file_url(&report.server.url, &api_id, &remote_name),
            api_id,
            access_token: report.server.access_token.clone(),
        })
    }
}

/// One upload attempt for the bytes `[offset, total_size)` of a file.
///
/// Built fresh for every attempt and consumed by the transfer; a resume
/// builds a new descriptor from the updated offset.
#[derive(Debug)]
pub struct TransferDescriptor {
    target: FileTarget,
    offset: u64,
    total_size: u64,
    data: Vec<u8>,
    source: PathBuf,
    background: bool,
}

impl TransferDescriptor {
    /// Creates a descriptor, checking that `data` is exactly the missing range.
    pub fn new(
        target: FileTarget,
        offset: u64,
        total_size: u64,
        data: Vec<u8>,
        source: PathBuf,
        background: bool,
    ) -> Result<Self, TransferError> {
        if offset > total_size {
            return Err(TransferError::OffsetOutOfRange {
                offset,
                size: total_size,
            });
        }
        let expected = total_size - offset;
        if data.len() as u64 != expected {
            return Err(TransferError::LengthMismatch {
                expected,
                actual: data.len() as u64,
            });
        }
        Ok(Self {
            target,
            offset,
            total_size,
            data,
            source,
            background,
        })
    }

    pub fn target(&self) -> &FileTarget {
        &self.target
    }

    /// First byte this attempt sends.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Declared size of the whole file.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Byte range of the file covered by this attempt.
    pub fn range(&self) -> Range<u64> {
        self.offset..self.total_size
    }

    /// Number of bytes this attempt sends.
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Where the vault materialized the content.
    pub fn source(&self) -> &PathBuf {
        &self.source
    }

    /// May be handed to a background-capable transport.
    pub fn is_background(&self) -> bool {
        self.background
    }

    /// Value of the `Content-Range` header for this attempt.
    pub fn content_range(&self) -> String {
        if self.data.is_empty() {
            format!("bytes */{}", self.total_size)
        } else {
            format!(
                "bytes {}-{}/{}",
                self.offset,
                self.total_size - 1,
                self.total_size
            )
        }
    }

    /// Splits the payload into chunks of at most `chunk_size` bytes.
    ///
    /// A `chunk_size` of 0 uses [`DEFAULT_CHUNK_SIZE`](crate::DEFAULT_CHUNK_SIZE).
    pub fn into_chunks(self, chunk_size: usize) -> Vec<Vec<u8>> {
        let chunk_size = if chunk_size == 0 {
            crate::DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        self.data.chunks(chunk_size).map(<[u8]>::to_vec).collect()
    }

    /// Consumes the descriptor, returning the payload.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}
