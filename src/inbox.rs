use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::MediaConfig;

/// The watched drop directory and its manual-check quarantine.
#[derive(Debug, Clone)]
pub struct Inbox {
    auto_upload_dir: PathBuf,
    manual_check_dir: PathBuf,
    ignore: GlobSet,
}

/// One top-level entry of the drop directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxEntry {
    File { name: String, path: PathBuf },
    NotAFile { name: String },
}

impl Inbox {
    pub fn new(
        auto_upload_dir: impl Into<PathBuf>,
        manual_check_dir: impl Into<PathBuf>,
        ignore_globs: &[String],
    ) -> Result<Self> {
        Ok(Self {
            auto_upload_dir: auto_upload_dir.into(),
            manual_check_dir: manual_check_dir.into(),
            ignore: build_globset(ignore_globs)?,
        })
    }

    pub fn from_config(media: &MediaConfig, ignore_globs: &[String]) -> Result<Self> {
        Self::new(
            media.auto_upload_dir(),
            media.manual_check_dir(),
            ignore_globs,
        )
    }

    pub fn auto_upload_dir(&self) -> &Path {
        &self.auto_upload_dir
    }

    pub fn manual_check_dir(&self) -> &Path {
        &self.manual_check_dir
    }

    /// List the drop directory, creating it when missing.
    ///
    /// Only direct children are returned, sorted by name. Entries matching an
    /// ignore glob (partial downloads, editor lock files) are skipped silently.
    pub fn scan(&self) -> Result<Vec<InboxEntry>> {
        std::fs::create_dir_all(&self.auto_upload_dir).with_context(|| {
            format!(
                "Failed to create auto-upload dir {}",
                self.auto_upload_dir.display()
            )
        })?;

        let mut entries = Vec::new();
        let walker = WalkDir::new(&self.auto_upload_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name();
        for entry in walker {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if self.ignore.is_match(&name) {
                continue;
            }
            if entry.file_type().is_file() {
                entries.push(InboxEntry::File {
                    name,
                    path: entry.path().to_path_buf(),
                });
            } else {
                entries.push(InboxEntry::NotAFile { name });
            }
        }

        Ok(entries)
    }

    /// Move a file into the manual-check directory, replacing any file of the
    /// same name already there.
    pub fn quarantine(&self, path: &Path) -> Result<PathBuf> {
        let name = path
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("not a file path: {}", path.display()))?;
        std::fs::create_dir_all(&self.manual_check_dir)?;
        let target = self.manual_check_dir.join(name);

        if std::fs::rename(path, &target).is_err() {
            // rename fails across filesystems
            std::fs::copy(path, &target).with_context(|| {
                format!("Failed to move {} to {}", path.display(), target.display())
            })?;
            std::fs::remove_file(path)?;
        }

        tracing::info!(file = %name.to_string_lossy(), "moved to manual check");
        Ok(target)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
