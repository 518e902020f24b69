use std::time::Duration;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Response header carrying the number of bytes the server holds for a file.
pub const SIZE_HEADER: &str = "size";

/// Path of the create-report endpoint, relative to the server URL.
pub const REPORT_PATH: &str = "/report";

/// Path prefix of the per-file endpoints (`/file/{apiId}/{name}`).
pub const FILE_PATH: &str = "/file";

/// Timeout for a whole request, including the transfer body.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Timeout for establishing the TCP/TLS connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Returns `true` for status codes in the success range.
pub fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// URL of the create-report endpoint.
pub fn report_url(server_url: &str) -> String {
    format!("{}{REPORT_PATH}", server_url.trim_end_matches('/'))
}

/// Characters left as-is in a URL path segment (RFC 3986 unreserved).
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// URL shared by probe, transfer and finalize for one file.
///
/// `api_id` and `remote_name` are percent-encoded as single path segments.
pub fn file_url(server_url: &str, api_id: &str, remote_name: &str) -> String {
    format!(
        "{}{FILE_PATH}/{}/{}",
        server_url.trim_end_matches('/'),
        utf8_percent_encode(api_id, SEGMENT),
        utf8_percent_encode(remote_name, SEGMENT),
    )
}
