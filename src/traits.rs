//! The vendor seam used by the upload pipeline.
//!
//! [`DocumentStore`] is the subset of the Iliad API the pipeline needs. The
//! production implementation is [`IliadClient`](crate::iliad::IliadClient);
//! tests can supply an in-memory store instead.

use async_trait::async_trait;

use crate::error::IliadResult;
use crate::models::{RemoteDocument, SourceListing, TaskStatus, UploadReceipt};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list_sources(&self) -> IliadResult<SourceListing>;

    async fn list_documents(&self, source: &str) -> IliadResult<Vec<RemoteDocument>>;

    async fn delete_document(&self, source: &str, document_id: &str) -> IliadResult<()>;

    /// Upload raw file bytes. Implementations are responsible for honouring
    /// the process-wide upload limiter.
    async fn upload_document(
        &self,
        source: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> IliadResult<UploadReceipt>;

    async fn task_status(&self, source: &str, task_id: &str) -> IliadResult<TaskStatus>;
}

/// Delete every document registered under `source` with the given filename.
///
/// Returns the number of documents removed. Any listing or delete failure is
/// returned to the caller, which aborts the upload attempt.
pub async fn replace_existing(
    store: &dyn DocumentStore,
    source: &str,
    file_name: &str,
) -> IliadResult<usize> {
    let documents = store.list_documents(source).await?;
    let mut removed = 0;
    for doc in documents
        .iter()
        .filter(|d| d.filename.as_deref() == Some(file_name))
    {
        let id = doc.id_segment();
        store.delete_document(source, &id).await?;
        tracing::info!(source, file_name, document_id = %id, "deleted existing document");
        removed += 1;
    }
    Ok(removed)
}
