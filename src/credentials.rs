//! Vendor credentials.
//!
//! The Iliad API key is kept Fernet-encrypted at rest. It is decrypted once
//! per client and attached to every vendor request together with the user
//! token.

use fernet::Fernet;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use std::fmt;

use crate::config::IliadConfig;
use crate::error::{IliadError, IliadResult};

pub const ENV_ENCRYPTION_KEY: &str = "ILIAD_ENCRYPTION_KEY";
pub const ENV_ENCRYPTED_API_KEY: &str = "ILIAD_ENCRYPTED_API_KEY";
pub const ENV_AUTH_TOKEN: &str = "ILIAD_AUTH_TOKEN";

#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    auth_token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("auth_token", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            auth_token: auth_token.into(),
        }
    }

    /// Resolve secrets from the environment (preferred) or the config file,
    /// then decrypt the API key.
    pub fn resolve(config: &IliadConfig) -> IliadResult<Self> {
        let encryption_key = secret(ENV_ENCRYPTION_KEY, config.encryption_key.as_deref())
            .ok_or_else(|| IliadError::Credentials("encryption key not configured".into()))?;
        let encrypted = secret(ENV_ENCRYPTED_API_KEY, config.encrypted_api_key.as_deref())
            .ok_or_else(|| IliadError::Credentials("encrypted API key not configured".into()))?;
        let auth_token = secret(ENV_AUTH_TOKEN, config.auth_token.as_deref()).unwrap_or_default();

        let api_key = decrypt_api_key(&encryption_key, &encrypted)?;
        Ok(Self::new(api_key, auth_token))
    }

    /// Headers sent with every vendor call.
    pub fn headers(&self) -> IliadResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", header_value(&self.api_key)?);
        headers.insert("x-user-token", header_value(&self.auth_token)?);
        headers.insert(
            AUTHORIZATION,
            header_value(&format!("Bearer {}", self.auth_token))?,
        );
        Ok(headers)
    }
}

fn secret(env_key: &str, file_value: Option<&str>) -> Option<String> {
    std::env::var(env_key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| file_value.map(str::to_string))
        .map(|v| v.trim().to_string())
}

fn header_value(value: &str) -> IliadResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| IliadError::Credentials(format!("secret is not a valid header value: {}", e)))
}

pub fn decrypt_api_key(encryption_key: &str, token: &str) -> IliadResult<String> {
    let fernet = Fernet::new(encryption_key)
        .ok_or_else(|| IliadError::Credentials("encryption key is not a valid Fernet key".into()))?;
    let plain = fernet
        .decrypt(token)
        .map_err(|_| IliadError::Credentials("token does not match encryption key".into()))?;
    String::from_utf8(plain)
        .map_err(|_| IliadError::Credentials("decrypted API key is not UTF-8".into()))
}

pub fn encrypt_api_key(encryption_key: &str, api_key: &str) -> anyhow::Result<String> {
    let fernet = Fernet::new(encryption_key)
        .ok_or_else(|| anyhow::anyhow!("encryption key is not a valid Fernet key"))?;
    Ok(fernet.encrypt(api_key.as_bytes()))
}

pub fn generate_key() -> String {
    Fernet::generate_key()
}
