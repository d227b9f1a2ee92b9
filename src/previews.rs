//! Preview copies of uploaded files, served by the intranet front end under
//! `/media/previews/`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::MediaConfig;

#[derive(Debug, Clone)]
pub struct PreviewStore {
    dir: PathBuf,
    base_url: String,
}

impl PreviewStore {
    pub fn new(dir: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(media: &MediaConfig) -> Self {
        Self::new(media.previews_dir(), media.preview_base_url.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Namespaced preview filename: `source#original_name`.
    pub fn preview_name(source: &str, file_name: &str) -> String {
        format!("{}#{}", source, file_name)
    }

    pub fn url_for(&self, preview_name: &str) -> String {
        format!(
            "{}/media/previews/{}",
            self.base_url,
            urlencoding::encode(preview_name)
        )
    }

    /// Copy a file into the preview directory and return its public URL.
    pub fn save_copy(&self, source: &str, path: &Path) -> Result<String> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| anyhow::anyhow!("not a file path: {}", path.display()))?;
        let name = Self::preview_name(source, &file_name);
        self.ensure_dir()?;
        let target = self.dir.join(&name);
        std::fs::copy(path, &target).with_context(|| {
            format!(
                "Failed to copy {} to {}",
                path.display(),
                target.display()
            )
        })?;
        Ok(self.url_for(&name))
    }

    /// Write uploaded bytes into the preview directory and return the URL.
    pub fn save_bytes(&self, source: &str, file_name: &str, bytes: &[u8]) -> Result<String> {
        let name = Self::preview_name(source, file_name);
        self.ensure_dir()?;
        let target = self.dir.join(&name);
        std::fs::write(&target, bytes)
            .with_context(|| format!("Failed to write preview {}", target.display()))?;
        Ok(self.url_for(&name))
    }

    /// Names of every preview file, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        self.ensure_dir()?;
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create preview dir {}", self.dir.display()))
    }
}
