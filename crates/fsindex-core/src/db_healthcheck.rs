use crate::error::Result;
use std::path::{Path, PathBuf};

/// Health information about a database
#[derive(Debug, Clone)]
pub struct DbHealth {
    /// Path to the database file
    pub path: String,
    /// Size on disk in bytes, write-ahead log included
    pub disk_size: u64,
    /// Entry counts by table name
    pub entry_counts: Vec<(&'static str, u64)>,
}

pub trait DbHealthChecker {
    fn db_path(&self) -> &Path;
    fn count_entries(&self) -> Result<Vec<(&'static str, u64)>>;

    fn get_health(&self) -> Result<DbHealth> {
        let path = self.db_path();

        let mut wal = path.as_os_str().to_owned();
        wal.push("-wal");
        let disk_size = [path.to_path_buf(), PathBuf::from(wal)]
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum();

        Ok(DbHealth {
            path: path.to_string_lossy().to_string(),
            disk_size,
            entry_counts: self.count_entries()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::IndexDatabase;
    use crate::types::FileEvent;

    #[test]
    fn reports_size_and_counts() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut db = IndexDatabase::open(&tmp.path().join("index.db")).unwrap();
        db.index_events(&[FileEvent::modify(tmp.path().join("a.txt"), None)])
            .unwrap();

        let health = db.get_health().unwrap();
        assert!(health.path.ends_with("index.db"));
        assert!(health.disk_size > 0, "database file should not be empty");
        assert_eq!(
            health.entry_counts,
            vec![("indexed_file", 1), ("scan_history", 0)]
        );
    }
}
