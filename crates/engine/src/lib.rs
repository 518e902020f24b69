//! Resumable report upload engine.
//!
//! Submits a report (metadata plus attached files) to a report server over
//! an unreliable connection. The server is asked how much of each file it
//! already holds before anything is sent, so an interrupted upload resumes
//! from the last acknowledged byte.
//!
//! # Pipeline
//!
//! 1. **Create**: `POST /report` once per report, storing the server id
//! 2. **Probe**: `HEAD` per file, reading the `size` header
//! 3. **Transfer**: `PUT` of the missing byte range, streamed
//! 4. **Finalize**: `POST` per file, `{success}` in the reply
//!
//! Files run concurrently; every transition goes to the [`Ledger`] before
//! it is published on the report's [`ProgressStream`].
//!
//! [`Ledger`]: reportlink_ledger::Ledger

pub mod decoder;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod events;
pub mod http;
mod machine;
pub mod transport;
pub mod vault;

#[cfg(test)]
pub(crate) mod testing;

// Re-export primary types for convenience.
pub use decoder::{Outcome, decode};
pub use dispatcher::{Dispatcher, TaskKey};
pub use engine::UploadEngine;
pub use error::{UploadError, VaultError};
pub use events::{ProgressEvent, ProgressStream};
pub use http::HttpTransport;
pub use transport::{Operation, ProgressFn, RawResponse, Request, Transport, TransportFuture};
pub use vault::{DirectoryVault, FileSlice, Vault, VaultFuture};
