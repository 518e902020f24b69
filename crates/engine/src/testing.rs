//! In-memory report server and vault for engine tests.

use std::collections::HashMap;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use reportlink_protocol::{ReportFile, SIZE_HEADER};
use tokio::sync::Notify;

use crate::error::{UploadError, VaultError};
use crate::transport::{Operation, ProgressFn, RawResponse, Request, Transport, TransportFuture};
use crate::vault::{FileSlice, Vault, VaultFuture};

/// Chunk size the mock uses when consuming transfer bodies.
const MOCK_CHUNK: usize = 256;

/// Injected misbehavior for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    /// Connection dropped before any response.
    Transport,
    /// Responds with this status and nothing else.
    Status(u16),
    /// Responds without a status line.
    NoStatus,
    /// Transfer only: store this many bytes, then drop the connection.
    Cut(usize),
    /// Never responds.
    Hang,
}

/// A request as the mock server saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Call {
    pub op: Operation,
    pub url: String,
    /// Byte range carried by a transfer.
    pub range: Option<Range<u64>>,
}

struct Rule {
    op: Operation,
    url: Option<String>,
    fault: Fault,
}

#[derive(Default)]
struct ServerState {
    next_report: u64,
    files: HashMap<String, Vec<u8>>,
    finalized: HashMap<String, usize>,
    decline_finalize: bool,
    rules: Vec<Rule>,
    calls: Vec<Call>,
    outstanding: HashMap<String, usize>,
    max_outstanding: usize,
}

/// Scripted report server that keeps uploaded bytes in memory.
#[derive(Default)]
pub(crate) struct MockServer {
    state: Mutex<ServerState>,
    /// Notified when a request hits a [`Fault::Hang`].
    pub hung: Notify,
}

impl MockServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Applies `fault` to the next `op` request.
    pub fn fail_next(&self, op: Operation, fault: Fault) {
        self.state.lock().unwrap().rules.push(Rule {
            op,
            url: None,
            fault,
        });
    }

    /// Applies `fault` to the next `op` request for `url`.
    pub fn fail_next_at(&self, op: Operation, url: &str, fault: Fault) {
        self.state.lock().unwrap().rules.push(Rule {
            op,
            url: Some(url.to_string()),
            fault,
        });
    }

    /// Makes finalize answer `{"success": false}` (or true again).
    pub fn decline_finalize(&self, decline: bool) {
        self.state.lock().unwrap().decline_finalize = decline;
    }

    /// Pretends an earlier attempt already delivered `bytes`.
    pub fn seed(&self, url: &str, bytes: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(url.to_string(), bytes.to_vec());
    }

    pub fn stored(&self, url: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(url).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, op: Operation) -> usize {
        self.calls().iter().filter(|c| c.op == op).count()
    }

    pub fn calls_to(&self, url: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.url == url).collect()
    }

    pub fn finalized(&self, url: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .finalized
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of simultaneously open requests for one URL.
    pub fn max_outstanding(&self) -> usize {
        self.state.lock().unwrap().max_outstanding
    }

    fn open(&self, request: &Request) -> Option<Fault> {
        let op = request.operation();
        let url = request.url().to_string();
        let range = match request {
            Request::Transfer { descriptor } => Some(descriptor.range()),
            _ => None,
        };

        let mut state = self.state.lock().unwrap();
        state.calls.push(Call {
            op,
            url: url.clone(),
            range,
        });
        // Create-report URLs are shared by every report.
        if op != Operation::CreateReport {
            let open = state.outstanding.entry(url.clone()).or_default();
            *open += 1;
            let open = *open;
            state.max_outstanding = state.max_outstanding.max(open);
        }

        let pos = state
            .rules
            .iter()
            .position(|r| r.op == op && r.url.as_deref().is_none_or(|u| u == url))?;
        Some(state.rules.remove(pos).fault)
    }

    fn close(&self, op: Operation, url: &str) {
        if op == Operation::CreateReport {
            return;
        }
        let mut state = self.state.lock().unwrap();
        if let Some(open) = state.outstanding.get_mut(url) {
            *open = open.saturating_sub(1);
        }
    }

    fn respond(&self, request: Request, on_progress: Option<ProgressFn>) -> RawResponse {
        let url = request.url().to_string();
        match request {
            Request::CreateReport { .. } => {
                let mut state = self.state.lock().unwrap();
                state.next_report += 1;
                let body = format!(r#"{{"id":"api-{}"}}"#, state.next_report);
                RawResponse::with_status(201).body(body)
            }
            Request::Probe { .. } => {
                let state = self.state.lock().unwrap();
                let size = state.files.get(&url).map_or(0, Vec::len);
                RawResponse::with_status(200).header(SIZE_HEADER, size.to_string())
            }
            Request::Transfer { descriptor } => {
                let offset = descriptor.offset() as usize;
                {
                    let mut state = self.state.lock().unwrap();
                    let stored = state.files.entry(url.clone()).or_default();
                    if offset > stored.len() {
                        return RawResponse::with_status(416);
                    }
                    stored.truncate(offset);
                }
                let mut sent = 0u64;
                for chunk in descriptor.into_chunks(MOCK_CHUNK) {
                    sent += chunk.len() as u64;
                    self.state
                        .lock()
                        .unwrap()
                        .files
                        .entry(url.clone())
                        .or_default()
                        .extend_from_slice(&chunk);
                    if let Some(cb) = &on_progress {
                        cb(sent);
                    }
                }
                RawResponse::with_status(200)
            }
            Request::Finalize { .. } => {
                let mut state = self.state.lock().unwrap();
                *state.finalized.entry(url).or_default() += 1;
                let body = format!(r#"{{"success":{}}}"#, !state.decline_finalize);
                RawResponse::with_status(200).body(body)
            }
        }
    }
}

/// Decrements the outstanding count when a request ends or is dropped.
struct Open<'a> {
    server: &'a MockServer,
    op: Operation,
    url: String,
}

impl Drop for Open<'_> {
    fn drop(&mut self) {
        self.server.close(self.op, &self.url);
    }
}

impl Transport for MockServer {
    fn execute(&self, request: Request, on_progress: Option<ProgressFn>) -> TransportFuture<'_> {
        let fault = self.open(&request);
        let _open = Open {
            server: self,
            op: request.operation(),
            url: request.url().to_string(),
        };
        Box::pin(async move {
            let _open = _open;
            // Let sibling file tasks interleave.
            tokio::task::yield_now().await;

            match fault {
                None => Ok(self.respond(request, on_progress)),
                Some(Fault::Transport) => Err(UploadError::Transport("connection reset".into())),
                Some(Fault::Status(code)) => Ok(RawResponse::with_status(code)),
                Some(Fault::NoStatus) => Ok(RawResponse::default()),
                Some(Fault::Cut(n)) => {
                    if let Request::Transfer { descriptor } = request {
                        let url = descriptor.target().url.clone();
                        let offset = descriptor.offset() as usize;
                        let data = descriptor.into_data();
                        let mut state = self.state.lock().unwrap();
                        let stored = state.files.entry(url).or_default();
                        stored.truncate(offset);
                        stored.extend_from_slice(&data[..n.min(data.len())]);
                    }
                    Err(UploadError::Transport("connection lost mid-body".into()))
                }
                Some(Fault::Hang) => {
                    self.hung.notify_one();
                    std::future::pending().await
                }
            }
        })
    }
}

/// Vault holding file contents in memory, keyed by file id.
#[derive(Default)]
pub(crate) struct MemoryVault {
    files: Mutex<HashMap<String, Vec<u8>>>,
    loads: Mutex<Vec<(String, u64)>>,
}

impl MemoryVault {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, file_id: &str, data: Vec<u8>) {
        self.files.lock().unwrap().insert(file_id.to_string(), data);
    }

    /// `(file id, offset)` of every load.
    pub fn loads(&self) -> Vec<(String, u64)> {
        self.loads.lock().unwrap().clone()
    }
}

impl Vault for MemoryVault {
    fn load(&self, file: &ReportFile, offset: u64) -> VaultFuture<'_> {
        let file_id = file.file_id.clone();
        Box::pin(async move {
            self.loads.lock().unwrap().push((file_id.clone(), offset));
            let files = self.files.lock().unwrap();
            let data = files
                .get(&file_id)
                .ok_or_else(|| VaultError::NotFound(file_id.clone()))?;
            let start = (offset as usize).min(data.len());
            Ok(FileSlice {
                url: PathBuf::from(format!("memory/{file_id}")),
                data: data[start..].to_vec(),
            })
        })
    }
}

/// Deterministic file content of `size` bytes.
pub(crate) fn content(seed: u8, size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}
