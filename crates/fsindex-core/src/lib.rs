//! fsindex-core - background file indexing and ranked filename search
//!
//! Scans (full, incremental and live-watch) feed file events through a single
//! writer thread into an SQLite index with FTS5 name tables. Queries run on their own
//! read connections and never wait on the write path.

pub mod batch_writer;
pub mod cancel;
pub mod config;
mod db_healthcheck;
pub mod dispatcher;
mod error;
mod ignore_file;
pub mod indexer;
pub mod path_utils;
pub mod regex_utils;
pub mod scanner;
pub mod score;
pub mod storage;
pub mod types;
pub mod walker;
pub mod writer;

pub use config::{IndexerConfig, Preferences};
pub use db_healthcheck::{DbHealth, DbHealthChecker};
pub use error::{Error, Result};
pub use indexer::{FileIndexer, PendingQuery};
pub use types::{
    FileEvent, FileEventKind, FileResult, IndexedFile, PaginationArgs, QueryParams, Scan, ScanId,
    ScanRecord, ScanStatus, ScanType,
};
