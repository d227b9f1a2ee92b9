//! HTTP client for the Iliad document/RAG API.
//!
//! Every call is paced through the shared [`CallThrottle`]; uploads also hold
//! one of the limiter's slots for the duration of the request. Non-2xx replies
//! come back as [`IliadError::Status`] carrying the vendor's code and body so
//! callers can relay them.
//!
//! # Endpoints
//!
//! | Method | Path | Used by |
//! |--------|------|---------|
//! | `GET` | `/api/v1/sources/` | source listing, pipeline routing |
//! | `GET` | `/api/v1/sources/{s}` | source details |
//! | `POST` | `/api/v1/sources/` | create source |
//! | `DELETE` | `/api/v1/sources/{s}` | delete source |
//! | `GET` | `/api/v1/sources/{s}/documents` | document listing |
//! | `POST` | `/api/v1/sources/{s}/documents` | upload (multipart `file`) |
//! | `DELETE` | `/api/v1/sources/{s}/documents/{id}` | delete document |
//! | `GET` | `/api/v1/sources/{s}/{task_id}` | task status |
//! | `POST` | `/api/v1/sources/{s}/rag` | chat / search |

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::credentials::Credentials;
use crate::error::{IliadError, IliadResult};
use crate::models::{
    RagAnswer, RagRequest, RemoteDocument, SourceListing, TaskStatus, UploadReceipt,
};
use crate::throttle::CallThrottle;
use crate::traits::DocumentStore;

pub struct IliadClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Result<Credentials, String>,
    throttle: Arc<CallThrottle>,
}

impl IliadClient {
    /// Build the client from configuration.
    ///
    /// A credential problem does not fail construction: it is reported on
    /// every call instead, so the HTTP API can answer with a 500 while the
    /// rest of the service keeps running.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let credentials = Credentials::resolve(&config.iliad).map_err(|e| {
            tracing::error!(error = %e, "vendor credentials unavailable");
            match e {
                IliadError::Credentials(msg) => msg,
                other => other.to_string(),
            }
        });
        let throttle = Arc::new(CallThrottle::new(
            config.auto_upload.max_concurrent_uploads,
            config.auto_upload.min_call_spacing(),
        ));
        Self::build(
            &config.iliad.base_url,
            credentials,
            throttle,
            Duration::from_secs(config.iliad.timeout_secs),
        )
    }

    pub fn with_credentials(
        base_url: &str,
        credentials: Credentials,
        throttle: Arc<CallThrottle>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        Self::build(base_url, Ok(credentials), throttle, timeout)
    }

    fn build(
        base_url: &str,
        credentials: Result<Credentials, String>,
        throttle: Arc<CallThrottle>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            throttle,
        })
    }

    pub fn throttle(&self) -> &Arc<CallThrottle> {
        &self.throttle
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path)
    }

    fn headers(&self) -> IliadResult<HeaderMap> {
        match &self.credentials {
            Ok(creds) => creds.headers(),
            Err(msg) => Err(IliadError::Credentials(msg.clone())),
        }
    }

    /// Pace, send, and reject non-2xx replies.
    async fn execute(&self, request: RequestBuilder, url: &str) -> IliadResult<Response> {
        self.throttle.pace().await;
        tracing::debug!(url, "calling Iliad");

        let response = request
            .send()
            .await
            .map_err(|source| IliadError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::warn!(url, status = status.as_u16(), "Iliad call failed");
        Err(IliadError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    async fn json<T: DeserializeOwned>(response: Response, url: &str) -> IliadResult<T> {
        let text = response
            .text()
            .await
            .map_err(|source| IliadError::Transport {
                url: url.to_string(),
                source,
            })?;
        serde_json::from_str(&text).map_err(|e| IliadError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    pub async fn list_sources(&self) -> IliadResult<SourceListing> {
        let url = self.url("sources/");
        let request = self.http.get(&url).headers(self.headers()?);
        let response = self.execute(request, &url).await?;
        Self::json(response, &url).await
    }

    pub async fn source_details(&self, source: &str) -> IliadResult<Value> {
        let url = self.url(&format!("sources/{}", source));
        let request = self.http.get(&url).headers(self.headers()?);
        let response = self.execute(request, &url).await?;
        Self::json(response, &url).await
    }

    pub async fn create_source(
        &self,
        source: &str,
        description: Option<&str>,
        embedding_model: &str,
    ) -> IliadResult<Value> {
        let url = self.url("sources/");
        let body = serde_json::json!({
            "source": source,
            "description": description,
            "embedding_model": embedding_model,
        });
        let request = self.http.post(&url).headers(self.headers()?).json(&body);
        let response = self.execute(request, &url).await?;
        Self::json(response, &url).await
    }

    pub async fn delete_source(&self, source: &str) -> IliadResult<()> {
        let url = self.url(&format!("sources/{}", source));
        let request = self.http.delete(&url).headers(self.headers()?);
        self.execute(request, &url).await?;
        Ok(())
    }

    pub async fn list_documents(&self, source: &str) -> IliadResult<Vec<RemoteDocument>> {
        let url = self.url(&format!("sources/{}/documents", source));
        let request = self.http.get(&url).headers(self.headers()?);
        let response = self.execute(request, &url).await?;
        let body: Value = Self::json(response, &url).await?;
        let documents = body.get("documents").cloned().unwrap_or(Value::Array(vec![]));
        serde_json::from_value(documents).map_err(|e| IliadError::Decode {
            url,
            message: e.to_string(),
        })
    }

    pub async fn delete_document(&self, source: &str, document_id: &str) -> IliadResult<()> {
        let url = self.url(&format!("sources/{}/documents/{}", source, document_id));
        let request = self.http.delete(&url).headers(self.headers()?);
        self.execute(request, &url).await?;
        Ok(())
    }

    pub async fn upload_document(
        &self,
        source: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> IliadResult<UploadReceipt> {
        let url = self.url(&format!("sources/{}/documents", source.to_lowercase()));
        let headers = self.headers()?;
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("application/octet-stream")
            .map_err(|source| IliadError::Transport {
                url: url.clone(),
                source,
            })?;
        let form = Form::new().part("file", part);

        let _slot = self.throttle.acquire_upload().await?;
        let request = self.http.post(&url).headers(headers).multipart(form);
        let response = self.execute(request, &url).await?;

        let text = response
            .text()
            .await
            .map_err(|source| IliadError::Transport {
                url: url.clone(),
                source,
            })?;
        if text.trim().is_empty() {
            return Ok(UploadReceipt::default());
        }
        serde_json::from_str(&text).map_err(|e| IliadError::Decode {
            url,
            message: e.to_string(),
        })
    }

    pub async fn task_status(&self, source: &str, task_id: &str) -> IliadResult<TaskStatus> {
        let url = self.url(&format!("sources/{}/{}", source, task_id));
        let request = self.http.get(&url).headers(self.headers()?);
        let response = self.execute(request, &url).await?;
        let body: Value = Self::json(response, &url).await?;
        Ok(TaskStatus::from_json(body))
    }

    pub async fn rag(&self, source: &str, request: &RagRequest) -> IliadResult<RagAnswer> {
        let url = self.url(&format!("sources/{}/rag", source));
        let builder = self.http.post(&url).headers(self.headers()?).json(request);
        let response = self.execute(builder, &url).await?;
        Self::json(response, &url).await
    }
}

#[async_trait]
impl DocumentStore for IliadClient {
    async fn list_sources(&self) -> IliadResult<SourceListing> {
        IliadClient::list_sources(self).await
    }

    async fn list_documents(&self, source: &str) -> IliadResult<Vec<RemoteDocument>> {
        IliadClient::list_documents(self, source).await
    }

    async fn delete_document(&self, source: &str, document_id: &str) -> IliadResult<()> {
        IliadClient::delete_document(self, source, document_id).await
    }

    async fn upload_document(
        &self,
        source: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> IliadResult<UploadReceipt> {
        IliadClient::upload_document(self, source, file_name, bytes).await
    }

    async fn task_status(&self, source: &str, task_id: &str) -> IliadResult<TaskStatus> {
        IliadClient::task_status(self, source, task_id).await
    }
}
