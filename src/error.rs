//! Typed errors for calls against the Iliad vendor API.
//!
//! Application paths use `anyhow`; the vendor client returns [`IliadError`] so
//! HTTP handlers can relay vendor status codes and the upload pipeline can turn
//! failures into ledger statuses.

#[derive(Debug, thiserror::Error)]
pub enum IliadError {
    #[error("failed to decrypt API key: {0}")]
    Credentials(String),

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Iliad API returned {status} for {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("upload limiter closed")]
    LimiterClosed,
}

impl IliadError {
    /// The vendor's HTTP status code, when the failure was a non-2xx reply.
    pub fn status(&self) -> Option<u16> {
        match self {
            IliadError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The vendor's response body, when the failure was a non-2xx reply.
    pub fn body(&self) -> Option<&str> {
        match self {
            IliadError::Status { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn is_credentials(&self) -> bool {
        matches!(self, IliadError::Credentials(_))
    }
}

pub type IliadResult<T> = Result<T, IliadError>;
