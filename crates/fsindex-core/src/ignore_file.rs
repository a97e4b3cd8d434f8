//! Approximate ignore-file matching.
//!
//! Every non-empty, non-comment line of an ignore file is compiled as a single glob and
//! matched against the *file name* of a candidate entry only. A leading `/` is
//! stripped. This is deliberately not full gitignore semantics: negations, directory
//! markers (`build/`) and patterns spanning separators do not behave like git does.

use ahash::AHashMap;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct IgnoreFileReader {
    patterns: Vec<String>,
    globs: GlobSet,
}

impl IgnoreFileReader {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::parse(path, &raw))
    }

    pub fn parse(path: &Path, raw: &str) -> Self {
        let mut patterns = Vec::new();
        let mut builder = GlobSetBuilder::new();

        for line in raw.lines() {
            let line = line.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let pattern = line.strip_prefix('/').unwrap_or(line);
            match GlobBuilder::new(pattern).literal_separator(true).build() {
                Ok(glob) => {
                    builder.add(glob);
                    patterns.push(pattern.to_string());
                }
                Err(error) => {
                    tracing::debug!(?path, pattern, %error, "Skipping invalid ignore pattern");
                }
            }
        }

        let globs = builder.build().unwrap_or_else(|error| {
            tracing::warn!(?path, %error, "Failed to compile ignore file, ignoring it");
            GlobSet::empty()
        });

        Self { patterns, globs }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .is_some_and(|name| self.globs.is_match(Path::new(name)))
    }
}

/// Parsed ignore files keyed by their location. Shared by the walker filters, which
/// may run on several threads.
#[derive(Debug, Default)]
pub struct IgnoreCache {
    ignore_files: Vec<String>,
    readers: Mutex<AHashMap<PathBuf, Option<Arc<IgnoreFileReader>>>>,
}

impl Clone for IgnoreCache {
    fn clone(&self) -> Self {
        Self {
            ignore_files: self.ignore_files.clone(),
            readers: Mutex::new(self.readers.lock().clone()),
        }
    }
}

impl IgnoreCache {
    pub fn new(ignore_files: Vec<String>) -> Self {
        Self {
            ignore_files,
            readers: Mutex::new(AHashMap::new()),
        }
    }

    /// Walks upward from the entry's parent, stopping before the filesystem root, and
    /// reports whether any ignore file found on the way matches the entry.
    pub fn is_ignored(&self, path: &Path) -> bool {
        if self.ignore_files.is_empty() {
            return false;
        }

        let mut dir = path.parent();
        while let Some(current) = dir {
            if current.parent().is_none() {
                break;
            }

            for name in &self.ignore_files {
                if let Some(reader) = self.reader_for(&current.join(name))
                    && reader.matches(path)
                {
                    return true;
                }
            }

            dir = current.parent();
        }

        false
    }

    fn reader_for(&self, ignore_path: &Path) -> Option<Arc<IgnoreFileReader>> {
        if let Some(cached) = self.readers.lock().get(ignore_path) {
            return cached.clone();
        }

        let reader = ignore_path
            .is_file()
            .then(|| IgnoreFileReader::open(ignore_path).ok())
            .flatten()
            .map(Arc::new);

        self.readers
            .lock()
            .insert(ignore_path.to_path_buf(), reader.clone());
        reader
    }
}
