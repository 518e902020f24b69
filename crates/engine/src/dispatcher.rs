//! HTTP task dispatcher.
//!
//! Issues the four request kinds and owns the table of outstanding tasks.
//! Each task is keyed by what it acts on (a report's create step, or one
//! file), so a second request for the same key is refused while the first
//! is still unresolved.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use reportlink_protocol::constants::report_url;
use reportlink_protocol::{CreateReportRequest, FinalizeFileRequest, Report, ReportId};
use reportlink_transfer::{FileTarget, TransferDescriptor};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::decoder::{Outcome, decode};
use crate::error::UploadError;
use crate::transport::{Operation, ProgressFn, Request, Transport};

/// What an outstanding task acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKey {
    /// The create-report step of a report.
    Report(ReportId),
    /// Probe, transfer or finalize of one file.
    File { report: ReportId, instance_id: u64 },
}

impl TaskKey {
    pub fn report_id(&self) -> ReportId {
        match self {
            TaskKey::Report(id) | TaskKey::File { report: id, .. } => *id,
        }
    }
}

struct InFlight {
    operation: Operation,
    token: CancellationToken,
}

type TaskTable = Mutex<HashMap<TaskKey, InFlight>>;

/// Dispatches requests and tracks them until they resolve.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    background: Option<Arc<dyn Transport>>,
    tasks: TaskTable,
}

impl Dispatcher {
    /// Creates a dispatcher sending everything through `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            background: None,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Routes background-eligible transfers through `transport`.
    pub fn with_background(mut self, transport: Arc<dyn Transport>) -> Self {
        self.background = Some(transport);
        self
    }

    /// Creates the report on the server, returning its server id.
    pub async fn create_report(
        &self,
        report: &Report,
        cancel: &CancellationToken,
    ) -> Result<String, UploadError> {
        let request = Request::CreateReport {
            report_id: report.id,
            url: report_url(&report.server.url),
            access_token: report.server.access_token.clone(),
            body: CreateReportRequest::from(report),
        };
        match self
            .dispatch(TaskKey::Report(report.id), request, None, cancel)
            .await?
        {
            Outcome::Created { api_id } => Ok(api_id),
            other => Err(mismatch(Operation::CreateReport, &other)),
        }
    }

    /// Asks the server how many bytes of the file it holds.
    pub async fn probe(
        &self,
        target: &FileTarget,
        cancel: &CancellationToken,
    ) -> Result<u64, UploadError> {
        let request = Request::Probe {
            target: target.clone(),
        };
        match self.dispatch(file_key(target), request, None, cancel).await? {
            Outcome::Probed { size } => Ok(size),
            other => Err(mismatch(Operation::Probe, &other)),
        }
    }

    /// Sends the byte range described by `descriptor`.
    pub async fn transfer(
        &self,
        descriptor: TransferDescriptor,
        on_progress: Option<ProgressFn>,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        let key = file_key(descriptor.target());
        let request = Request::Transfer { descriptor };
        match self.dispatch(key, request, on_progress, cancel).await? {
            Outcome::Transferred => Ok(()),
            other => Err(mismatch(Operation::Transfer, &other)),
        }
    }

    /// Marks the file complete on the server. Returns the server's verdict.
    pub async fn finalize(
        &self,
        target: &FileTarget,
        cancel: &CancellationToken,
    ) -> Result<bool, UploadError> {
        let request = Request::Finalize {
            target: target.clone(),
            body: FinalizeFileRequest {
                file_id: target.file_id.clone(),
            },
        };
        match self.dispatch(file_key(target), request, None, cancel).await? {
            Outcome::Finalized { success } => Ok(success),
            other => Err(mismatch(Operation::Finalize, &other)),
        }
    }

    /// Aborts every outstanding task of a report. Returns how many were hit.
    ///
    /// Synchronous; the aborted calls resolve with [`UploadError::Cancelled`].
    pub fn cancel(&self, report_id: ReportId) -> usize {
        let tasks = self.lock();
        let mut hit = 0;
        for (key, task) in tasks.iter() {
            if key.report_id() == report_id {
                task.token.cancel();
                hit += 1;
            }
        }
        if hit > 0 {
            debug!(report = %report_id, tasks = hit, "cancelled outstanding tasks");
        }
        hit
    }

    /// Number of outstanding tasks for a report.
    pub fn in_flight(&self, report_id: ReportId) -> usize {
        self.lock()
            .keys()
            .filter(|k| k.report_id() == report_id)
            .count()
    }

    /// Operation currently outstanding for `key`, if any.
    pub fn outstanding(&self, key: TaskKey) -> Option<Operation> {
        self.lock().get(&key).map(|t| t.operation)
    }

    async fn dispatch(
        &self,
        key: TaskKey,
        request: Request,
        on_progress: Option<ProgressFn>,
        cancel: &CancellationToken,
    ) -> Result<Outcome, UploadError> {
        let operation = request.operation();
        let token = cancel.child_token();
        let _entry = TaskEntry::register(&self.tasks, key, operation, token.clone())?;

        if token.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let transport = match &self.background {
            Some(bg) if request.is_background() => bg,
            _ => &self.transport,
        };

        trace!(?key, %operation, url = request.url(), "dispatching");
        let raw = tokio::select! {
            _ = token.cancelled() => return Err(UploadError::Cancelled),
            raw = transport.execute(request, on_progress) => raw?,
        };
        decode(operation, &raw)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskKey, InFlight>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Table entry that removes itself when the task resolves or is dropped.
struct TaskEntry<'a> {
    tasks: &'a TaskTable,
    key: TaskKey,
}

impl<'a> TaskEntry<'a> {
    fn register(
        tasks: &'a TaskTable,
        key: TaskKey,
        operation: Operation,
        token: CancellationToken,
    ) -> Result<Self, UploadError> {
        let mut table = tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = table.get(&key) {
            return Err(UploadError::Busy(existing.operation.as_str()));
        }
        table.insert(key, InFlight { operation, token });
        Ok(Self { tasks, key })
    }
}

impl Drop for TaskEntry<'_> {
    fn drop(&mut self) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

fn file_key(target: &FileTarget) -> TaskKey {
    TaskKey::File {
        report: target.report_id,
        instance_id: target.instance_id,
    }
}

fn mismatch(expected: Operation, got: &Outcome) -> UploadError {
    UploadError::UnexpectedResponse(format!("{expected} decoded as {got:?}"))
}
