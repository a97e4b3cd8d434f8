//! Versioned schema. Each entry of [`MIGRATIONS`] moves `PRAGMA user_version` up by one.

pub const SCHEMA_VERSION: i64 = MIGRATIONS.len() as i64;

pub const MIGRATIONS: &[&str] = &[
    // 1: indexed files and their name indexes
    r"
CREATE TABLE IF NOT EXISTS indexed_file (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    parent_path TEXT NOT NULL,
    name TEXT NOT NULL,
    last_modified_at INTEGER,
    relevancy_score REAL NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_indexed_file_parent_path ON indexed_file(parent_path);

CREATE VIRTUAL TABLE IF NOT EXISTS unicode_idx USING fts5(
    name,
    content='indexed_file',
    content_rowid='id',
    tokenize='unicode61'
);

CREATE VIRTUAL TABLE IF NOT EXISTS tri_idx USING fts5(
    name,
    content='indexed_file',
    content_rowid='id',
    tokenize='trigram'
);

CREATE TRIGGER IF NOT EXISTS indexed_file_ai AFTER INSERT ON indexed_file BEGIN
    INSERT INTO unicode_idx(rowid, name) VALUES (new.id, new.name);
    INSERT INTO tri_idx(rowid, name) VALUES (new.id, new.name);
END;

CREATE TRIGGER IF NOT EXISTS indexed_file_ad AFTER DELETE ON indexed_file BEGIN
    INSERT INTO unicode_idx(unicode_idx, rowid, name) VALUES ('delete', old.id, old.name);
    INSERT INTO tri_idx(tri_idx, rowid, name) VALUES ('delete', old.id, old.name);
END;

CREATE TRIGGER IF NOT EXISTS indexed_file_au AFTER UPDATE OF name ON indexed_file BEGIN
    INSERT INTO unicode_idx(unicode_idx, rowid, name) VALUES ('delete', old.id, old.name);
    INSERT INTO tri_idx(tri_idx, rowid, name) VALUES ('delete', old.id, old.name);
    INSERT INTO unicode_idx(rowid, name) VALUES (new.id, new.name);
    INSERT INTO tri_idx(rowid, name) VALUES (new.id, new.name);
END;
",
    // 2: scan bookkeeping
    r"
CREATE TABLE IF NOT EXISTS scan_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entrypoint TEXT NOT NULL,
    type INTEGER NOT NULL,
    status INTEGER NOT NULL,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    error TEXT
);

CREATE INDEX IF NOT EXISTS idx_scan_history_status ON scan_history(status);
CREATE INDEX IF NOT EXISTS idx_scan_history_entrypoint ON scan_history(entrypoint, type);
",
];
