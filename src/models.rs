//! Core data models shared by the ledger, the vendor client, and the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of one processing attempt for a dropped file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadStatus {
    Pending,
    Completed,
    Failed,
    UploadFailed,
    UnsupportedFileType,
    NoSourceFound,
    Unknown,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "PENDING",
            UploadStatus::Completed => "COMPLETED",
            UploadStatus::Failed => "FAILED",
            UploadStatus::UploadFailed => "UPLOAD_FAILED",
            UploadStatus::UnsupportedFileType => "UNSUPPORTED_FILE_TYPE",
            UploadStatus::NoSourceFound => "NO_SOURCE_FOUND",
            UploadStatus::Unknown => "UNKNOWN",
        }
    }

    /// Parse a stored status. Anything unrecognised reads back as `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "PENDING" => UploadStatus::Pending,
            "COMPLETED" => UploadStatus::Completed,
            "FAILED" => UploadStatus::Failed,
            "UPLOAD_FAILED" => UploadStatus::UploadFailed,
            "UNSUPPORTED_FILE_TYPE" => UploadStatus::UnsupportedFileType,
            "NO_SOURCE_FOUND" => UploadStatus::NoSourceFound,
            _ => UploadStatus::Unknown,
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the upload ledger.
#[derive(Debug, Clone, Serialize)]
pub struct UploadRecord {
    pub id: i64,
    pub file_name: String,
    pub source: String,
    pub status: UploadStatus,
    pub task_id: Option<String>,
    pub preview_url: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Global,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Global => "global",
            Visibility::Private => "private",
        }
    }
}

impl FromStr for Visibility {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(Visibility::Global),
            "private" => Ok(Visibility::Private),
            other => anyhow::bail!("unknown visibility: '{}'", other),
        }
    }
}

/// Locally mirrored vendor source.
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub name: String,
    pub visibility: Visibility,
    pub model: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============ Vendor payloads ============

/// `GET /api/v1/sources/` body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceListing {
    #[serde(default)]
    pub global_sources: Vec<String>,
    #[serde(default)]
    pub private_sources: Vec<String>,
}

impl SourceListing {
    /// Every source name, lowercased, global first.
    pub fn all_lowercase(&self) -> Vec<String> {
        self.global_sources
            .iter()
            .chain(self.private_sources.iter())
            .map(|s| s.to_lowercase())
            .collect()
    }
}

/// A document registered under a vendor source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub id: Value,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl RemoteDocument {
    /// The document id as a path segment. The vendor has returned both
    /// numeric and string ids.
    pub fn id_segment(&self) -> String {
        match &self.id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Reply to a successful document upload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadReceipt {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub document_id: Option<Value>,
}

/// Coarse reading of a vendor task status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Completed,
    Failed,
    Pending,
}

impl TaskState {
    pub fn from_vendor(status: &str) -> Self {
        match status.to_ascii_uppercase().as_str() {
            "COMPLETED" | "SUCCESS" => TaskState::Completed,
            "FAILED" | "FAILURE" | "ERROR" => TaskState::Failed,
            _ => TaskState::Pending,
        }
    }
}

/// `GET /api/v1/sources/{source}/{task_id}` body, kept whole for relaying.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub status: String,
    pub message: Option<String>,
    pub full_response: Value,
}

impl TaskStatus {
    pub fn from_json(json: Value) -> Self {
        let status = json
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN")
            .to_string();
        let message = json
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string);
        Self {
            status,
            message,
            full_response: json,
        }
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_vendor(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// `POST /api/v1/sources/{source}/rag` request body.
#[derive(Debug, Clone, Serialize)]
pub struct RagRequest {
    pub messages: Vec<ChatMessage>,
    /// The vendor expects filters as a JSON-encoded string.
    pub filters: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagAnswer {
    #[serde(default = "default_rag_content")]
    pub content: String,
    #[serde(default)]
    pub references: Vec<Value>,
}

fn default_rag_content() -> String {
    "No content in API response".to_string()
}
