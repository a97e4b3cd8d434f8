//! Relevancy scoring for indexed files.
//!
//! The score is computed once when a file is (re)indexed and persisted next to the
//! row, so search only has to order by a column. It multiplies four factors, each
//! in `(0, 1]`:
//!
//! * file class: documents and media beat source code, which beats build artifacts
//! * depth: every extra path segment costs a little
//! * recency: decays with age without ever reaching the floor
//! * visibility: dot-files and anything below a dot-directory are penalized
//!
//! Only the ordering between otherwise identical files is part of the contract; the
//! exact weights below can be tuned freely.

use crate::path_utils::{is_hidden_path, path_depth};
use std::path::Path;
use std::time::{Duration, SystemTime};

const MAX_SCORE: f64 = 100.0;
const DEPTH_PENALTY: f64 = 0.08;
const HIDDEN_FACTOR: f64 = 0.6;
/// Lowest recency factor. Files without a modification time get exactly this.
const RECENCY_FLOOR: f64 = 0.4;
const RECENCY_HALF_LIFE_DAYS: f64 = 30.0;

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileClass {
    /// Documents, text, images, audio and video.
    Content,
    SourceCode,
    Other,
    /// Build outputs, object files, caches and editor swap files.
    Noise,
}

impl FileClass {
    fn weight(self) -> f64 {
        match self {
            FileClass::Content => 1.0,
            FileClass::SourceCode => 0.85,
            FileClass::Other => 0.7,
            FileClass::Noise => 0.25,
        }
    }
}

pub fn classify(path: &Path) -> FileClass {
    let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
        return FileClass::Other;
    };

    let extension = extension.to_ascii_lowercase();
    match extension.as_str() {
        // documents and text
        "pdf" | "doc" | "docx" | "odt" | "rtf" | "txt" | "md" | "markdown" | "org" | "tex"
        | "epub" | "xls" | "xlsx" | "ods" | "csv" | "ppt" | "pptx" | "odp" | "key" | "pages"
        | "numbers"
        // images
        | "png" | "jpg" | "jpeg" | "gif" | "webp" | "svg" | "bmp" | "tif" | "tiff" | "heic"
        | "avif" | "raw"
        // audio and video
        | "mp3" | "flac" | "wav" | "ogg" | "m4a" | "opus" | "aac" | "mp4" | "mkv" | "webm"
        | "avi" | "mov" => FileClass::Content,

        "rs" | "c" | "h" | "cc" | "cpp" | "hpp" | "cxx" | "py" | "js" | "jsx" | "ts" | "tsx"
        | "go" | "java" | "kt" | "swift" | "rb" | "php" | "lua" | "sh" | "zsh" | "fish"
        | "toml" | "yaml" | "yml" | "json" | "xml" | "html" | "css" | "scss" | "sql" | "zig"
        | "hs" | "ml" | "ex" | "exs" | "cs" | "vue" | "svelte" => FileClass::SourceCode,

        "o" | "obj" | "a" | "lib" | "so" | "dylib" | "dll" | "pyc" | "pyo" | "class" | "d"
        | "rlib" | "rmeta" | "tmp" | "temp" | "swp" | "swo" | "bak" | "lock" | "part"
        | "crdownload" | "cache" | "idx" | "pack" | "dep" | "gch" | "pch" | "ilk" | "pdb" => {
            FileClass::Noise
        }

        _ => FileClass::Other,
    }
}

/// Stateless scorer. Kept as a type so callers do not depend on free functions if the
/// scorer ever needs configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelevancyScorer;

impl RelevancyScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn compute_score(&self, path: &Path, last_modified: Option<SystemTime>) -> f64 {
        self.compute_score_at(path, last_modified, SystemTime::now())
    }

    /// Same as [`compute_score`](Self::compute_score) with an explicit clock.
    pub fn compute_score_at(
        &self,
        path: &Path,
        last_modified: Option<SystemTime>,
        now: SystemTime,
    ) -> f64 {
        let class = classify(path).weight();
        let depth = 1.0 / (1.0 + DEPTH_PENALTY * path_depth(path) as f64);
        let recency = recency_factor(last_modified, now);
        let visibility = if is_hidden_path(path) {
            HIDDEN_FACTOR
        } else {
            1.0
        };

        MAX_SCORE * class * depth * recency * visibility
    }
}

fn recency_factor(last_modified: Option<SystemTime>, now: SystemTime) -> f64 {
    let Some(last_modified) = last_modified else {
        return RECENCY_FLOOR;
    };

    // modification times in the future count as "just now"
    let age = now
        .duration_since(last_modified)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64()
        / SECONDS_PER_DAY;

    RECENCY_FLOOR + (1.0 - RECENCY_FLOOR) / (1.0 + age / RECENCY_HALF_LIFE_DAYS)
}
