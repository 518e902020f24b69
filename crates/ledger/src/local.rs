use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use reportlink_protocol::{Report, ReportDraft, ReportFile, ReportId, ReportStatus};
use tracing::debug;

use crate::state::LedgerState;
use crate::{Ledger, LedgerError};

/// Ledger kept in memory and, optionally, persisted to a JSON file.
///
/// All calls go through one lock, which serializes writes for the same
/// report or file. With a backing file, each write is applied to a copy,
/// flushed to disk (write, fsync, rename), and only then made visible, so
/// memory never runs ahead of what survives a crash.
///
/// Each write clones the tables and rewrites the whole file with blocking
/// I/O, so its cost grows with the ledger. Sized for the handful of pending
/// reports a device holds, not for an archive.
pub struct LocalLedger {
    path: Option<PathBuf>,
    state: Mutex<LedgerState>,
}

impl LocalLedger {
    /// Creates a ledger that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Opens (or creates) a ledger persisted at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let state = load_state(&path)?;
        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerState>, LedgerError> {
        self.state.lock().map_err(|_| LedgerError::Poisoned)
    }

    /// Applies `f` to a copy of the state, persists it, then publishes it.
    fn write<R>(
        &self,
        f: impl FnOnce(&mut LedgerState) -> Result<R, LedgerError>,
    ) -> Result<R, LedgerError> {
        let mut guard = self.lock()?;
        let mut next = guard.clone();
        let out = f(&mut next)?;
        if let Some(path) = &self.path {
            persist(path, &next)?;
        }
        *guard = next;
        Ok(out)
    }
}

impl Ledger for LocalLedger {
    fn insert_report(&self, draft: ReportDraft) -> Result<Report, LedgerError> {
        let report = self.write(|s| Ok(s.insert_report(draft)))?;
        debug!(report = %report.id, files = report.files.len(), "report recorded");
        Ok(report)
    }

    fn get_report(&self, id: ReportId) -> Result<Option<Report>, LedgerError> {
        Ok(self.lock()?.get_report(id))
    }

    fn upsert_report(&self, report: &Report) -> Result<(), LedgerError> {
        self.write(|s| s.upsert_report(report))
    }

    fn upsert_file(&self, file: &ReportFile) -> Result<(), LedgerError> {
        self.write(|s| s.upsert_file(file))
    }

    fn list_files(&self, report_id: ReportId) -> Result<Vec<ReportFile>, LedgerError> {
        self.lock()?.list_files(report_id)
    }

    fn list_reports(&self, statuses: &[ReportStatus]) -> Result<Vec<Report>, LedgerError> {
        Ok(self.lock()?.list_reports(statuses))
    }

    fn update_report(
        &self,
        id: ReportId,
        apply: &mut dyn FnMut(&mut Report),
    ) -> Result<Report, LedgerError> {
        self.write(|s| s.update_report(id, apply))
    }

    fn update_file(
        &self,
        instance_id: u64,
        apply: &mut dyn FnMut(&mut ReportFile),
    ) -> Result<ReportFile, LedgerError> {
        self.write(|s| s.update_file(instance_id, apply))
    }

    fn delete_report(&self, id: ReportId) -> Result<bool, LedgerError> {
        let removed = self.write(|s| Ok(s.delete_report(id)))?;
        if removed {
            debug!(report = %id, "report deleted");
        }
        Ok(removed)
    }
}

/// Loads ledger tables from disk; a missing file is an empty ledger.
fn load_state(path: &Path) -> Result<LedgerState, LedgerError> {
    if !path.exists() {
        return Ok(LedgerState::default());
    }
    let data = std::fs::read_to_string(path)?;
    let state: LedgerState = serde_json::from_str(&data)?;
    debug!("loaded ledger from {:?}", path);
    Ok(state)
}

/// Writes the tables next to `path` and renames over it.
fn persist(path: &Path, state: &LedgerState) -> Result<(), LedgerError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    let mut file = std::fs::File::create(&tmp)?;
    file.write_all(&json)?;
    file.sync_all()?;
    drop(file);
    set_permissions_0600(&tmp);
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn set_permissions_0600(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}
