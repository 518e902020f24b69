//! Transport abstraction.
//!
//! A [`Transport`] turns one logical [`Request`] into one network exchange
//! and hands back the raw outcome. It knows nothing about report state;
//! classification happens in [`decoder`](crate::decoder).

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use reportlink_protocol::{CreateReportRequest, FinalizeFileRequest, ReportId};
use reportlink_transfer::{FileTarget, TransferDescriptor};

use crate::error::UploadError;

/// Future returned by [`Transport::execute`].
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<RawResponse, UploadError>> + Send + 'a>>;

/// Receives the cumulative number of body bytes handed to the network.
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// The four request kinds of the upload protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateReport,
    Probe,
    Transfer,
    Finalize,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::CreateReport => "create-report",
            Operation::Probe => "probe",
            Operation::Transfer => "transfer",
            Operation::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved request, ready to be sent.
#[derive(Debug)]
pub enum Request {
    /// `POST {server}/report` with the report metadata.
    CreateReport {
        report_id: ReportId,
        url: String,
        access_token: String,
        body: CreateReportRequest,
    },
    /// `HEAD {file url}`; the server answers with a `size` header.
    Probe { target: FileTarget },
    /// `PUT {file url}` carrying the bytes `[offset, size)`.
    Transfer { descriptor: TransferDescriptor },
    /// `POST {file url}` with the vault file id.
    Finalize {
        target: FileTarget,
        body: FinalizeFileRequest,
    },
}

impl Request {
    pub fn operation(&self) -> Operation {
        match self {
            Request::CreateReport { .. } => Operation::CreateReport,
            Request::Probe { .. } => Operation::Probe,
            Request::Transfer { .. } => Operation::Transfer,
            Request::Finalize { .. } => Operation::Finalize,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Request::CreateReport { url, .. } => url,
            Request::Probe { target } | Request::Finalize { target, .. } => &target.url,
            Request::Transfer { descriptor } => &descriptor.target().url,
        }
    }

    pub fn access_token(&self) -> &str {
        match self {
            Request::CreateReport { access_token, .. } => access_token,
            Request::Probe { target } | Request::Finalize { target, .. } => &target.access_token,
            Request::Transfer { descriptor } => &descriptor.target().access_token,
        }
    }

    /// Whether a background-capable transport may carry this request.
    pub fn is_background(&self) -> bool {
        matches!(self, Request::Transfer { descriptor } if descriptor.is_background())
    }
}

/// What came back from the network, before any interpretation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawResponse {
    /// `None` when the transport delivered a response without a status line.
    pub status: Option<u16>,
    /// Header names are lowercase.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    /// A response with a status and no headers or body.
    pub fn with_status(status: u16) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Adds a header, lowercasing its name.
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Replaces the body.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Looks up a header by (case-insensitive) name.
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Sends requests to the report server.
///
/// Implementations map connection-level failures (refused, reset, timed
/// out) to [`UploadError::Transport`]. Any response that arrived, whatever
/// its status, is returned as a [`RawResponse`].
pub trait Transport: Send + Sync {
    /// Performs one exchange. `on_progress` is invoked as request body bytes
    /// are handed to the network; transports without a body may ignore it.
    fn execute(&self, request: Request, on_progress: Option<ProgressFn>) -> TransportFuture<'_>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_response_headers_are_case_insensitive() {
        let raw = RawResponse::with_status(200).header("Size", "42");
        assert_eq!(raw.get_header("size"), Some("42"));
        assert_eq!(raw.get_header("SIZE"), Some("42"));
        assert_eq!(raw.get_header("content-length"), None);
    }

    #[test]
    fn create_request_accessors() {
        let req = Request::CreateReport {
            report_id: ReportId(1),
            url: "https://a.org/report".into(),
            access_token: "tok".into(),
            body: CreateReportRequest {
                title: "t".into(),
                description: String::new(),
            },
        };
        assert_eq!(req.operation(), Operation::CreateReport);
        assert_eq!(req.url(), "https://a.org/report");
        assert_eq!(req.access_token(), "tok");
        assert!(!req.is_background());
        assert_eq!(req.operation().to_string(), "create-report");
    }
}
