//! Application orchestrator: wires ledger, vault and transport into the
//! upload engine and keeps it running until shutdown.

use std::sync::Arc;
use std::time::Duration;

use reportlink_engine::{
    DirectoryVault, Dispatcher, HttpTransport, ProgressEvent, ProgressStream, UploadEngine,
};
use reportlink_ledger::LocalLedger;
use reportlink_protocol::ReportId;
use tokio::task::JoinHandle;

use crate::config::Config;

/// How long shutdown waits for cancelled submissions to settle.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Runs the agent until shutdown is requested.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let engine = build_engine(&config)?;

    let mut watchers = Vec::new();
    if config.resume_on_start {
        for stream in engine.resume_unsent()? {
            watchers.push(watch(stream));
        }
    }
    tracing::info!(resumed = watchers.len(), "agent ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("SIGINT received, shutting down");

    let cancelled = engine.cancel_all();
    if !cancelled.is_empty() {
        tracing::info!(reports = cancelled.len(), "cancelled active submissions");
    }

    let settle = async {
        for watcher in watchers {
            let _ = watcher.await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, settle).await.is_err() {
        tracing::warn!("submissions still running at shutdown");
    }

    Ok(())
}

fn build_engine(config: &Config) -> anyhow::Result<UploadEngine> {
    let ledger = LocalLedger::open(&config.ledger_path)?;
    let vault = DirectoryVault::new(&config.vault_dir);
    let transport =
        HttpTransport::with_timeouts(config.request_timeout(), config.connect_timeout())?;

    Ok(UploadEngine::new(
        Arc::new(ledger),
        Dispatcher::new(Arc::new(transport)),
        Arc::new(vault),
    ))
}

/// Logs a submission's events until it ends.
fn watch(mut stream: ProgressStream) -> JoinHandle<()> {
    tokio::spawn(async move {
        let report = stream.report_id();
        while let Some(event) = stream.next().await {
            log_event(report, &event);
        }
    })
}

fn log_event(report: ReportId, event: &ProgressEvent) {
    let progress = event.progress();
    match event {
        ProgressEvent::Progress { .. } => tracing::debug!(
            %report,
            sent = progress.bytes_sent,
            total = progress.total_size,
            "upload progress"
        ),
        ProgressEvent::Completed { .. } => tracing::info!(%report, "report submitted"),
        ProgressEvent::Failed {
            kind, resumable, ..
        } => tracing::warn!(
            %report,
            error = %kind,
            resumable,
            sent = progress.bytes_sent,
            total = progress.total_size,
            "report upload failed"
        ),
        ProgressEvent::Cancelled { .. } => tracing::info!(
            %report,
            sent = progress.bytes_sent,
            "report upload paused"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reportlink_ledger::Ledger;
    use reportlink_protocol::{FileDraft, ReportDraft, ReportStatus, ServerConfig};

    fn config(dir: &std::path::Path) -> Config {
        Config {
            ledger_path: dir.join("ledger.json"),
            vault_dir: dir.join("vault"),
            request_timeout_secs: 1,
            connect_timeout_secs: 1,
            resume_on_start: true,
        }
    }

    #[tokio::test]
    async fn engine_opens_existing_ledger() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());

        let id = {
            let ledger = LocalLedger::open(&config.ledger_path).unwrap();
            ledger
                .insert_report(ReportDraft {
                    title: "Pothole".into(),
                    description: String::new(),
                    server: ServerConfig {
                        url: "http://127.0.0.1:9".into(),
                        access_token: "t".into(),
                        background_upload: false,
                    },
                    files: vec![FileDraft {
                        file_id: "v1".into(),
                        file_name: "photo".into(),
                        file_extension: "jpg".into(),
                        size: 3,
                    }],
                })
                .unwrap()
                .id
        };

        let engine = build_engine(&config).unwrap();
        let report = engine.ledger().get_report(id).unwrap().unwrap();
        assert_eq!(report.status, ReportStatus::Draft);
        assert!(engine.resume_unsent().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_server_leaves_report_resumable() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());
        let engine = build_engine(&config).unwrap();

        let (report, stream) = engine
            .submit_new(ReportDraft {
                title: "Streetlight out".into(),
                description: String::new(),
                server: ServerConfig {
                    url: "http://127.0.0.1:9".into(),
                    access_token: "t".into(),
                    background_upload: false,
                },
                files: vec![],
            })
            .unwrap();

        let event = stream.finish().await;
        assert!(matches!(
            event,
            ProgressEvent::Failed {
                resumable: true,
                ..
            }
        ));
        let stored = engine.ledger().get_report(report.id).unwrap().unwrap();
        assert_eq!(stored.status, ReportStatus::SubmissionError);
    }
}
