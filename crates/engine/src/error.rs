//! Upload error types.

use reportlink_ledger::LedgerError;
use reportlink_protocol::{ErrorKind, ReportId};
use reportlink_transfer::TransferError;

/// Errors produced by the vault.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("file not in vault: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("vault task failed: {0}")]
    Task(String),
}

/// Errors produced while submitting a report.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("server responded with HTTP {0}")]
    Http(u16),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("server declined to finalize {0}")]
    FinalizeRejected(String),

    #[error("cancelled")]
    Cancelled,

    #[error("vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("report not found: {0}")]
    ReportNotFound(ReportId),

    #[error("report {0} is already being submitted")]
    AlreadyActive(ReportId),

    #[error("a {0} request is already in flight for this target")]
    Busy(&'static str),
}

impl UploadError {
    /// Classifies the error for observers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::Transport(_) | UploadError::Busy(_) => ErrorKind::TransportFailure,
            UploadError::Http(code) => ErrorKind::Http(*code),
            UploadError::Cancelled => ErrorKind::Cancelled,
            UploadError::Vault(_) => ErrorKind::VaultUnavailable,
            UploadError::Ledger(_) => ErrorKind::Storage,
            UploadError::Transfer(e) => match e {
                TransferError::Io(_)
                | TransferError::OffsetOutOfRange { .. }
                | TransferError::LengthMismatch { .. } => ErrorKind::VaultUnavailable,
                TransferError::InvalidName(_) | TransferError::MissingApiId(_) => {
                    ErrorKind::UnexpectedResponse
                }
            },
            UploadError::UnexpectedResponse(_)
            | UploadError::FinalizeRejected(_)
            | UploadError::Json(_)
            | UploadError::ReportNotFound(_)
            | UploadError::AlreadyActive(_) => ErrorKind::UnexpectedResponse,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_network_errors() {
        assert_eq!(
            UploadError::Transport("reset".into()).kind(),
            ErrorKind::TransportFailure
        );
        assert_eq!(UploadError::Http(502).kind(), ErrorKind::Http(502));
        assert_eq!(UploadError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            UploadError::UnexpectedResponse("no size".into()).kind(),
            ErrorKind::UnexpectedResponse
        );
    }

    #[test]
    fn classifies_local_errors() {
        let vault = UploadError::from(VaultError::NotFound("v1".into()));
        assert_eq!(vault.kind(), ErrorKind::VaultUnavailable);

        let ledger = UploadError::from(LedgerError::Poisoned);
        assert_eq!(ledger.kind(), ErrorKind::Storage);

        let short = UploadError::from(TransferError::LengthMismatch {
            expected: 10,
            actual: 4,
        });
        assert_eq!(short.kind(), ErrorKind::VaultUnavailable);

        let name = UploadError::from(TransferError::InvalidName("..".into()));
        assert_eq!(name.kind(), ErrorKind::UnexpectedResponse);
    }

    #[test]
    fn finalize_rejection_is_not_recoverable() {
        let err = UploadError::FinalizeRejected("v1".into());
        assert!(!err.kind().is_recoverable());
        assert!(err.to_string().contains("v1"));
    }
}
