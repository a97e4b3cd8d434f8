//! Depth-first filesystem walker with the exclusion rules used by every scan.

use crate::cancel::StopSignal;
use crate::ignore_file::IgnoreCache;
use crate::path_utils::is_hidden_file_name;
use ignore::{DirEntry, WalkBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, trace, warn};

/// Absolute paths that are never followed. Mostly pseudo filesystems.
pub const EXCLUDED_PATHS: &[&str] = &[
    "/sys", "/run", "/proc", "/tmp", "/var/tmp", "/efi", "/dev",
];

/// File names that are always skipped. Keep these specific enough to never hide
/// meaningful content.
pub const EXCLUDED_FILENAMES: &[&str] = &[".git", ".cache", ".clangd"];

#[derive(Debug, Clone, Default)]
pub struct ExclusionRules {
    ignore_hidden: bool,
    excluded_filenames: Vec<String>,
    excluded_paths: Vec<PathBuf>,
    ignore_cache: IgnoreCache,
}

impl ExclusionRules {
    pub fn is_excluded(&self, path: &Path) -> bool {
        if self.ignore_hidden && is_hidden_file_name(path) {
            trace!(?path, "Walker: ignoring hidden path");
            return true;
        }

        if EXCLUDED_PATHS.iter().any(|excluded| path == Path::new(excluded)) {
            return true;
        }

        if let Some(name) = path.file_name().and_then(|n| n.to_str())
            && (EXCLUDED_FILENAMES.contains(&name)
                || self.excluded_filenames.iter().any(|f| f == name))
        {
            return true;
        }

        if self.ignore_cache.is_ignored(path) {
            trace!(?path, "Walker: ignoring path matched by ignore file");
            return true;
        }

        if self.excluded_paths.iter().any(|p| path.starts_with(p)) {
            trace!(?path, "Walker: excluding path");
            return true;
        }

        false
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub directories: usize,
    pub files: usize,
}

pub struct FileSystemWalker {
    rules: Arc<ExclusionRules>,
    max_depth: Option<usize>,
    stop_signal: StopSignal,
}

impl Default for FileSystemWalker {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystemWalker {
    pub fn new() -> Self {
        Self {
            rules: Arc::new(ExclusionRules::default()),
            max_depth: None,
            stop_signal: StopSignal::new(),
        }
    }

    pub fn with_ignore_files(mut self, files: Vec<String>) -> Self {
        Arc::make_mut(&mut self.rules).ignore_cache = IgnoreCache::new(files);
        self
    }

    pub fn with_excluded_paths(mut self, paths: Vec<PathBuf>) -> Self {
        Arc::make_mut(&mut self.rules).excluded_paths = paths;
        self
    }

    pub fn with_excluded_filenames(mut self, filenames: Vec<String>) -> Self {
        Arc::make_mut(&mut self.rules).excluded_filenames = filenames;
        self
    }

    pub fn with_ignore_hidden(mut self, value: bool) -> Self {
        Arc::make_mut(&mut self.rules).ignore_hidden = value;
        self
    }

    /// Limit recursion. Directories at most `max_depth` segments below the root are
    /// expanded, so entries up to `max_depth + 1` segments deep are visited.
    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_stop_signal(mut self, signal: StopSignal) -> Self {
        self.stop_signal = signal;
        self
    }

    pub fn rules(&self) -> &ExclusionRules {
        &self.rules
    }

    pub fn stop(&self) {
        self.stop_signal.stop();
    }

    /// Walk `root` depth-first, invoking `callback` for every non-excluded entry below
    /// it (the root itself is not reported). Symbolic links are never followed nor
    /// reported. Returns early once the stop signal fires.
    pub fn walk(&self, root: &Path, mut callback: impl FnMut(&DirEntry)) -> WalkStats {
        let start = Instant::now();
        let mut stats = WalkStats::default();

        if !root.is_dir() {
            warn!(
                ?root,
                "FileSystemWalker needs to be passed a readable directory as its root"
            );
            return stats;
        }

        let max_depth = self.max_depth.map(|depth| depth + 1);

        let rules = Arc::clone(&self.rules);
        let walker = WalkBuilder::new(root)
            .standard_filters(false)
            .follow_links(false)
            .max_depth(max_depth)
            .filter_entry(move |entry| !entry.path_is_symlink() && !rules.is_excluded(entry.path()))
            .build();

        for result in walker {
            if self.stop_signal.is_stopped() {
                info!(?root, "Walk interrupted");
                break;
            }

            let entry = match result {
                Ok(entry) => entry,
                Err(error) => {
                    warn!(%error, "Walk error");
                    continue;
                }
            };

            if entry.depth() == 0 {
                continue;
            }

            if entry.file_type().is_some_and(|ft| ft.is_dir()) {
                stats.directories += 1;
            } else {
                stats.files += 1;
            }

            callback(&entry);
        }

        info!(
            ?root,
            directories = stats.directories,
            files = stats.files,
            elapsed = ?start.elapsed(),
            "Done walking file tree"
        );

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tree(paths: &[&str]) -> TempDir {
        let tmp = TempDir::new().unwrap();
        for path in paths {
            let full = tmp.path().join(path);
            if path.ends_with('/') {
                fs::create_dir_all(&full).unwrap();
            } else {
                fs::create_dir_all(full.parent().unwrap()).unwrap();
                fs::write(&full, b"x").unwrap();
            }
        }
        tmp
    }

    fn collect(walker: &FileSystemWalker, root: &Path) -> Vec<String> {
        let mut seen = Vec::new();
        walker.walk(root, |entry| {
            seen.push(
                entry
                    .path()
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .into_owned(),
            )
        });
        seen.sort();
        seen
    }

    #[test]
    fn visits_everything_below_root() {
        let tmp = tree(&["a.txt", "dir/b.txt", "dir/sub/c.txt"]);
        let seen = collect(&FileSystemWalker::new(), tmp.path());
        assert_eq!(seen, vec!["a.txt", "dir", "dir/b.txt", "dir/sub", "dir/sub/c.txt"]);
    }

    #[test]
    fn skips_always_excluded_filenames() {
        let tmp = tree(&[".git/HEAD", ".cache/blob", "src/main.rs"]);
        let seen = collect(&FileSystemWalker::new(), tmp.path());
        assert_eq!(seen, vec!["src", "src/main.rs"]);
    }

    #[test]
    fn respects_max_depth() {
        let tmp = tree(&["a/b/c/d.txt"]);
        let walker = FileSystemWalker::new().with_max_depth(Some(1));
        assert_eq!(collect(&walker, tmp.path()), vec!["a", "a/b"]);
    }

    #[test]
    fn hidden_filtering_is_opt_in() {
        let tmp = tree(&[".hidden/file.txt", "visible.txt"]);
        assert_eq!(collect(&FileSystemWalker::new(), tmp.path()).len(), 3);

        let walker = FileSystemWalker::new().with_ignore_hidden(true);
        assert_eq!(collect(&walker, tmp.path()), vec!["visible.txt"]);
    }

    #[test]
    fn applies_ignore_files_and_excluded_paths() {
        let tmp = tree(&[".gitignore", "debug.log", "keep.txt", "private/secret.txt"]);
        fs::write(tmp.path().join(".gitignore"), "*.log\n").unwrap();

        let walker = FileSystemWalker::new()
            .with_ignore_files(vec![".gitignore".to_string()])
            .with_excluded_paths(vec![tmp.path().join("private")])
            .with_excluded_filenames(vec!["keep.txt".to_string()]);

        assert_eq!(collect(&walker, tmp.path()), vec![".gitignore"]);
    }

    #[cfg(unix)]
    #[test]
    fn never_follows_symlinks() {
        let tmp = tree(&["real/file.txt"]);
        std::os::unix::fs::symlink(tmp.path().join("real"), tmp.path().join("link")).unwrap();

        let seen = collect(&FileSystemWalker::new(), tmp.path());
        assert_eq!(seen, vec!["real", "real/file.txt"]);
    }

    #[test]
    fn stopped_walker_visits_nothing() {
        let tmp = tree(&["a.txt", "b/c.txt"]);
        let walker = FileSystemWalker::new();
        walker.stop();
        assert!(collect(&walker, tmp.path()).is_empty());
    }
}
