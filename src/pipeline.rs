//! Auto-upload pipeline.
//!
//! One batch pass walks the drop directory and drives each file through:
//!
//! ```text
//! discovered ─┬─ .doc/.docx ───────────────▶ UNSUPPORTED_FILE_TYPE (manual check)
//!             ├─ no matching source ───────▶ NO_SOURCE_FOUND       (manual check)
//!             └─ delete-if-exists → preview → upload
//!                   ├─ failure ─────────────▶ UPLOAD_FAILED        (manual check)
//!                   ├─ no task id ──────────▶ COMPLETED            (file removed)
//!                   └─ task id ─▶ PENDING ─▶ poll
//!                                  ├─ success ▶ COMPLETED          (file removed)
//!                                  ├─ failure ▶ FAILED             (manual check)
//!                                  └─ polls exhausted: file stays for the next pass
//! ```
//!
//! A failure on one file is logged and reported for that file; the batch
//! carries on with the next one.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::{AutoUploadConfig, Config};
use crate::inbox::{Inbox, InboxEntry};
use crate::ledger::{self, NewRecord};
use crate::models::{TaskState, UploadReceipt, UploadStatus};
use crate::previews::PreviewStore;
use crate::routing::{self, SourceIndex};
use crate::traits::{replace_existing, DocumentStore};

/// Source recorded for files that never got routed.
pub const UNKNOWN_SOURCE: &str = "UNKNOWN";

/// How a pending vendor task is followed up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub attempts: u32,
    /// Wait before each poll.
    pub delay: Duration,
}

impl PollPolicy {
    /// Background scheduler passes.
    pub fn scheduled(config: &AutoUploadConfig) -> Self {
        Self {
            attempts: config.poll_attempts,
            delay: Duration::from_secs(config.poll_delay_secs),
        }
    }

    /// Passes triggered synchronously from an HTTP request.
    pub fn on_request(config: &AutoUploadConfig) -> Self {
        Self {
            attempts: config.poll_attempts,
            delay: Duration::from_secs(config.request_poll_delay_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedFile {
    pub file_name: String,
    pub status: UploadStatus,
    pub preview_url: Option<String>,
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnprocessedFile {
    pub file_name: String,
    pub reason: String,
}

impl UnprocessedFile {
    fn new(file_name: &str, reason: impl Into<String>) -> Self {
        Self {
            file_name: file_name.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub processed_files: Vec<ProcessedFile>,
    pub unprocessed_files: Vec<UnprocessedFile>,
}

enum FileOutcome {
    Processed(ProcessedFile),
    Unprocessed(UnprocessedFile),
}

impl BatchReport {
    fn record(&mut self, name: &str, outcome: Result<FileOutcome>) {
        match outcome {
            Ok(FileOutcome::Processed(p)) => self.processed_files.push(p),
            Ok(FileOutcome::Unprocessed(u)) => self.unprocessed_files.push(u),
            Err(e) => {
                tracing::error!(file = %name, error = %format!("{:#}", e), "error processing file");
                self.unprocessed_files
                    .push(UnprocessedFile::new(name, format!("Error: {}", e)));
            }
        }
    }
}

/// Result of a single manual upload from the web UI.
#[derive(Debug, Clone, Serialize)]
pub struct ManualUpload {
    pub status: UploadStatus,
    pub task_id: Option<String>,
    pub document_id: Option<Value>,
    pub preview_url: String,
}

#[derive(Clone)]
pub struct UploadPipeline {
    store: Arc<dyn DocumentStore>,
    pool: SqlitePool,
    inbox: Arc<Inbox>,
    previews: PreviewStore,
    /// Held for the whole of a batch pass; clones share it.
    pass_lock: Arc<Mutex<()>>,
}

impl UploadPipeline {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        pool: SqlitePool,
        inbox: Inbox,
        previews: PreviewStore,
    ) -> Self {
        Self {
            store,
            pool,
            inbox: Arc::new(inbox),
            previews,
            pass_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn DocumentStore>,
        pool: SqlitePool,
    ) -> Result<Self> {
        let inbox = Inbox::from_config(&config.media, &config.auto_upload.ignore_globs)?;
        let previews = PreviewStore::from_config(&config.media);
        Ok(Self::new(store, pool, inbox, previews))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn previews(&self) -> &PreviewStore {
        &self.previews
    }

    pub fn inbox(&self) -> &Inbox {
        &self.inbox
    }

    /// Run one pass over the drop directory.
    ///
    /// Passes never overlap: a pass started while another one is running
    /// waits for it and then sees what it left behind.
    ///
    /// Never fails: whatever was accumulated before a batch-level error is
    /// returned.
    pub async fn run_batch(&self, poll: PollPolicy) -> BatchReport {
        let _pass = self.pass_lock.lock().await;
        let mut report = BatchReport::default();
        if let Err(e) = self.run_batch_into(&mut report, poll).await {
            tracing::error!(error = %format!("{:#}", e), "error processing documents");
        }
        tracing::info!(
            processed = report.processed_files.len(),
            unprocessed = report.unprocessed_files.len(),
            "auto-upload pass finished"
        );
        report
    }

    async fn run_batch_into(&self, report: &mut BatchReport, poll: PollPolicy) -> Result<()> {
        let entries = self.inbox.scan()?;

        // Unsupported types are rejected before the vendor is consulted
        let mut routable = Vec::new();
        for entry in entries {
            match entry {
                InboxEntry::NotAFile { name } => {
                    report
                        .unprocessed_files
                        .push(UnprocessedFile::new(&name, "Not a file"));
                }
                InboxEntry::File { name, path } if routing::is_unsupported(&name) => {
                    let outcome = self.reject(&name, &path, UploadStatus::UnsupportedFileType).await;
                    report.record(&name, outcome.map(|()| {
                        FileOutcome::Unprocessed(UnprocessedFile::new(&name, "Unsupported file type"))
                    }));
                }
                InboxEntry::File { name, path } => routable.push((name, path)),
            }
        }
        if routable.is_empty() {
            return Ok(());
        }

        let sources = match self.store.list_sources().await {
            Ok(listing) => SourceIndex::new(listing.all_lowercase()),
            Err(e) => {
                // Leave everything in place and retry on the next pass
                tracing::warn!(error = %e, "source list unavailable, skipping pass");
                for (name, _) in &routable {
                    report
                        .unprocessed_files
                        .push(UnprocessedFile::new(name, "Source list unavailable"));
                }
                return Ok(());
            }
        };

        for (name, path) in routable {
            let outcome = self.process_file(&name, &path, &sources, poll).await;
            report.record(&name, outcome);
        }

        Ok(())
    }

    /// Quarantine a file that cannot be routed and record why.
    async fn reject(&self, name: &str, path: &Path, status: UploadStatus) -> Result<()> {
        self.inbox.quarantine(path)?;
        ledger::insert(&self.pool, &NewRecord::new(name, UNKNOWN_SOURCE, status)).await?;
        Ok(())
    }

    async fn process_file(
        &self,
        name: &str,
        path: &Path,
        sources: &SourceIndex,
        poll: PollPolicy,
    ) -> Result<FileOutcome> {
        let Some(source) = sources.resolve(name) else {
            self.reject(name, path, UploadStatus::NoSourceFound).await?;
            return Ok(FileOutcome::Unprocessed(UnprocessedFile::new(
                name,
                "No source found",
            )));
        };

        tracing::info!(file = %name, source = %source, "uploading");

        if let Err(e) = replace_existing(self.store.as_ref(), &source, name).await {
            tracing::warn!(file = %name, error = %e, "could not replace existing document");
            return self.upload_failed(name, path, &source).await;
        }

        let preview_url = self.previews.save_copy(&source, path)?;
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let receipt = match self.store.upload_document(&source, name, bytes).await {
            Ok(receipt) => receipt,
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "upload failed");
                return self.upload_failed(name, path, &source).await;
            }
        };

        self.follow_up(name, path, &source, receipt, preview_url, poll)
            .await
    }

    async fn upload_failed(&self, name: &str, path: &Path, source: &str) -> Result<FileOutcome> {
        self.inbox.quarantine(path)?;
        ledger::insert(
            &self.pool,
            &NewRecord::new(name, source, UploadStatus::UploadFailed),
        )
        .await?;
        Ok(FileOutcome::Unprocessed(UnprocessedFile::new(
            name,
            "Upload failed",
        )))
    }

    async fn follow_up(
        &self,
        name: &str,
        path: &Path,
        source: &str,
        receipt: UploadReceipt,
        preview_url: String,
        poll: PollPolicy,
    ) -> Result<FileOutcome> {
        let Some(task_id) = receipt.task_id else {
            let mut record = NewRecord::new(name, source, UploadStatus::Completed);
            record.preview_url = Some(&preview_url);
            ledger::insert(&self.pool, &record).await?;
            remove_uploaded(path).await;
            return Ok(FileOutcome::Processed(ProcessedFile {
                file_name: name.to_string(),
                status: UploadStatus::Completed,
                preview_url: Some(preview_url),
                task_id: None,
            }));
        };

        let mut record = NewRecord::new(name, source, UploadStatus::Pending);
        record.task_id = Some(&task_id);
        record.preview_url = Some(&preview_url);
        let record_id = ledger::insert(&self.pool, &record).await?;

        for attempt in 1..=poll.attempts {
            tokio::time::sleep(poll.delay).await;
            let status = match self.store.task_status(source, &task_id).await {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!(file = %name, task_id = %task_id, attempt, error = %e, "status check failed");
                    continue;
                }
            };
            tracing::debug!(file = %name, task_id = %task_id, attempt, status = %status.status, "task status");

            match status.state() {
                TaskState::Completed => {
                    ledger::set_status(&self.pool, record_id, UploadStatus::Completed).await?;
                    remove_uploaded(path).await;
                    tracing::info!(file = %name, source, task_id = %task_id, "upload completed");
                    return Ok(FileOutcome::Processed(ProcessedFile {
                        file_name: name.to_string(),
                        status: UploadStatus::Completed,
                        preview_url: Some(preview_url),
                        task_id: Some(task_id),
                    }));
                }
                TaskState::Failed => {
                    ledger::set_status(&self.pool, record_id, UploadStatus::Failed).await?;
                    self.inbox.quarantine(path)?;
                    return Ok(FileOutcome::Unprocessed(UnprocessedFile::new(
                        name,
                        format!("Vendor reported {}", status.status),
                    )));
                }
                TaskState::Pending => {}
            }
        }

        tracing::warn!(file = %name, task_id = %task_id, "max retries reached, leaving file for next pass");
        Ok(FileOutcome::Unprocessed(UnprocessedFile::new(
            name,
            "Max retries reached",
        )))
    }

    /// Upload bytes received over HTTP. The caller follows the task through
    /// the status endpoint, so no polling happens here.
    ///
    /// Vendor failures surface as an [`IliadError`](crate::error::IliadError)
    /// inside the returned error.
    pub async fn upload_manual(
        &self,
        source: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<ManualUpload> {
        let source = source.to_lowercase();
        replace_existing(self.store.as_ref(), &source, file_name).await?;

        let preview_url = self.previews.save_bytes(&source, file_name, &bytes)?;

        let receipt = match self.store.upload_document(&source, file_name, bytes).await {
            Ok(receipt) => receipt,
            Err(e) => {
                self.record_best_effort(NewRecord::new(
                    file_name,
                    &source,
                    UploadStatus::UploadFailed,
                ))
                .await;
                return Err(e.into());
            }
        };

        let status = if receipt.task_id.is_some() {
            UploadStatus::Pending
        } else {
            UploadStatus::Completed
        };
        let mut record = NewRecord::new(file_name, &source, status);
        record.task_id = receipt.task_id.as_deref();
        record.preview_url = Some(&preview_url);
        self.record_best_effort(record).await;

        Ok(ManualUpload {
            status,
            task_id: receipt.task_id,
            document_id: receipt.document_id,
            preview_url,
        })
    }

    async fn record_best_effort(&self, record: NewRecord<'_>) {
        if let Err(e) = ledger::insert(&self.pool, &record).await {
            tracing::error!(file = %record.file_name, error = %e, "failed to write upload record");
        }
    }
}

async fn remove_uploaded(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "could not remove uploaded file");
    }
}
