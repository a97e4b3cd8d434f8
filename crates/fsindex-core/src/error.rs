use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Thread panicked")]
    ThreadPanic,
    #[error("Invalid path {0}")]
    InvalidPath(PathBuf),
    #[error("Failed to create directory: {0}")]
    CreateDir(#[source] std::io::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Failed to open index database: {0}")]
    DbOpen(#[source] rusqlite::Error),
    #[error("Failed to migrate index database: {0}")]
    DbMigrate(#[source] rusqlite::Error),
    #[error("Failed to start transaction for index database: {0}")]
    DbStartTxn(#[source] rusqlite::Error),
    #[error("Failed to read from index database: {0}")]
    DbQuery(#[source] rusqlite::Error),
    #[error("Failed to write {path} to index database: {source}")]
    DbWrite {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("Failed to update scan history: {0}")]
    DbScanHistory(#[source] rusqlite::Error),
    #[error("Failed to commit transaction to index database: {0}")]
    DbCommit(#[source] rusqlite::Error),

    #[error("Invalid regular expression: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("Failed to start file system watcher: {0}")]
    FileSystemWatch(#[from] notify::Error),
    #[error("Ran out of file system watch descriptors while watching {0}")]
    WatchLimitReached(PathBuf),

    #[error("Index writer has shut down")]
    WriterShutdown,
    #[error("Scan dispatcher has shut down")]
    DispatcherShutdown,
    #[error("Scan record could not be created for {0}")]
    ScanRecordUnavailable(PathBuf),
}

pub type Result<T> = std::result::Result<T, Error>;
