//! Response classification.
//!
//! Pure mapping from a [`RawResponse`] to a typed [`Outcome`] for the
//! operation that produced it. Checks run in order: missing status,
//! non-2xx status, then the operation's own payload (the `size` header for
//! a probe, the JSON body for create-report and finalize, nothing for a
//! transfer).

use reportlink_protocol::constants::is_success;
use reportlink_protocol::{CreateReportResponse, FinalizeFileResponse, SIZE_HEADER};

use crate::error::UploadError;
use crate::transport::{Operation, RawResponse};

/// Typed success value of each operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Server-assigned report id.
    Created { api_id: String },
    /// Bytes of the file the server already holds.
    Probed { size: u64 },
    Transferred,
    Finalized { success: bool },
}

/// Decodes `raw` as the response to `operation`.
pub fn decode(operation: Operation, raw: &RawResponse) -> Result<Outcome, UploadError> {
    let Some(status) = raw.status else {
        return Err(UploadError::UnexpectedResponse(format!(
            "{operation} response carried no status"
        )));
    };
    if !is_success(status) {
        return Err(UploadError::Http(status));
    }

    match operation {
        Operation::CreateReport => {
            let resp: CreateReportResponse = decode_body(operation, &raw.body)?;
            if resp.id.is_empty() {
                return Err(UploadError::UnexpectedResponse(
                    "create-report returned an empty id".into(),
                ));
            }
            Ok(Outcome::Created { api_id: resp.id })
        }
        Operation::Probe => {
            let value = raw
                .get_header(SIZE_HEADER)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    UploadError::UnexpectedResponse("probe response has no size header".into())
                })?;
            let size = value.parse::<u64>().map_err(|_| {
                UploadError::UnexpectedResponse(format!("invalid size header: {value:?}"))
            })?;
            Ok(Outcome::Probed { size })
        }
        Operation::Transfer => Ok(Outcome::Transferred),
        Operation::Finalize => {
            let resp: FinalizeFileResponse = decode_body(operation, &raw.body)?;
            Ok(Outcome::Finalized {
                success: resp.success,
            })
        }
    }
}

fn decode_body<T: serde::de::DeserializeOwned>(
    operation: Operation,
    body: &[u8],
) -> Result<T, UploadError> {
    serde_json::from_slice(body).map_err(|e| {
        UploadError::UnexpectedResponse(format!("undecodable {operation} body: {e}"))
    })
}
