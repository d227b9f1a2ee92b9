use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub iliad: IliadConfig,
    pub media: MediaConfig,
    #[serde(default)]
    pub auto_upload: AutoUploadConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Connection settings for the Iliad vendor API.
///
/// The three secrets may be left out of the file and supplied through
/// `ILIAD_ENCRYPTION_KEY`, `ILIAD_ENCRYPTED_API_KEY` and `ILIAD_AUTH_TOKEN`.
/// Environment values win over file values.
#[derive(Debug, Deserialize, Clone)]
pub struct IliadConfig {
    pub base_url: String,
    #[serde(default)]
    pub encryption_key: Option<String>,
    #[serde(default)]
    pub encrypted_api_key: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Only vendor sources whose name starts with this prefix are listed.
    #[serde(default = "default_source_prefix")]
    pub source_prefix: String,
    #[serde(default = "default_embedding_model")]
    pub default_embedding_model: String,
}

fn default_timeout_secs() -> u64 {
    60
}
fn default_source_prefix() -> String {
    "oad".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct MediaConfig {
    pub root: PathBuf,
    /// Public origin used to build preview links, e.g. `https://intranet.example`.
    pub preview_base_url: String,
    #[serde(default)]
    pub auto_upload_dir: Option<PathBuf>,
    #[serde(default)]
    pub manual_check_dir: Option<PathBuf>,
    #[serde(default)]
    pub previews_dir: Option<PathBuf>,
}

impl MediaConfig {
    pub fn auto_upload_dir(&self) -> PathBuf {
        self.auto_upload_dir
            .clone()
            .unwrap_or_else(|| self.root.join("auto_upload"))
    }

    pub fn manual_check_dir(&self) -> PathBuf {
        self.manual_check_dir
            .clone()
            .unwrap_or_else(|| self.root.join("manual_check"))
    }

    pub fn previews_dir(&self) -> PathBuf {
        self.previews_dir
            .clone()
            .unwrap_or_else(|| self.root.join("previews"))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AutoUploadConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,
    #[serde(default = "default_poll_delay_secs")]
    pub poll_delay_secs: u64,
    /// Poll delay used when a batch is triggered from an HTTP request.
    #[serde(default = "default_request_poll_delay_secs")]
    pub request_poll_delay_secs: u64,
    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,
    #[serde(default = "default_min_call_spacing_ms")]
    pub min_call_spacing_ms: u64,
    #[serde(default = "default_ignore_globs")]
    pub ignore_globs: Vec<String>,
    #[serde(default = "default_history_limit")]
    pub history_limit: i64,
    #[serde(default)]
    pub start_on_boot: bool,
}

impl Default for AutoUploadConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            tick_secs: default_tick_secs(),
            poll_attempts: default_poll_attempts(),
            poll_delay_secs: default_poll_delay_secs(),
            request_poll_delay_secs: default_request_poll_delay_secs(),
            max_concurrent_uploads: default_max_concurrent_uploads(),
            min_call_spacing_ms: default_min_call_spacing_ms(),
            ignore_globs: default_ignore_globs(),
            history_limit: default_history_limit(),
            start_on_boot: false,
        }
    }
}

impl AutoUploadConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    pub fn min_call_spacing(&self) -> Duration {
        Duration::from_millis(self.min_call_spacing_ms)
    }
}

fn default_interval_secs() -> u64 {
    600
}
fn default_tick_secs() -> u64 {
    1
}
fn default_poll_attempts() -> u32 {
    5
}
fn default_poll_delay_secs() -> u64 {
    30
}
fn default_request_poll_delay_secs() -> u64 {
    5
}
fn default_max_concurrent_uploads() -> usize {
    5
}
fn default_min_call_spacing_ms() -> u64 {
    1000
}
fn default_ignore_globs() -> Vec<String> {
    vec![".*".to_string(), "*.part".to_string(), "~$*".to_string()]
}
fn default_history_limit() -> i64 {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Reject requests that arrive without the SSO front end's user header.
    #[serde(default)]
    pub require_user: bool,
    #[serde(default = "default_user_header")]
    pub user_header: String,
    #[serde(default = "default_email_header")]
    pub email_header: String,
    /// Allowed CORS origins. Empty means any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            require_user: false,
            user_header: default_user_header(),
            email_header: default_email_header(),
            cors_origins: Vec::new(),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_user_header() -> String {
    "x-remote-user".to_string()
}
fn default_email_header() -> String {
    "x-remote-email".to_string()
}
fn default_max_upload_mb() -> usize {
    100
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.iliad.base_url.trim().is_empty() {
        anyhow::bail!("iliad.base_url must not be empty");
    }
    if !config.iliad.base_url.starts_with("http://")
        && !config.iliad.base_url.starts_with("https://")
    {
        anyhow::bail!(
            "iliad.base_url must start with http:// or https://, got '{}'",
            config.iliad.base_url
        );
    }

    let auto = &config.auto_upload;
    if auto.max_concurrent_uploads == 0 {
        anyhow::bail!("auto_upload.max_concurrent_uploads must be > 0");
    }
    if auto.interval_secs == 0 {
        anyhow::bail!("auto_upload.interval_secs must be > 0");
    }
    if auto.tick_secs == 0 {
        anyhow::bail!("auto_upload.tick_secs must be > 0");
    }
    if auto.history_limit < 1 {
        anyhow::bail!("auto_upload.history_limit must be >= 1");
    }

    Ok(config)
}
