//! Database schema and migrations for drivetree.
//!
//! Migrations are applied sequentially when the database is first opened
//! or upgraded; the schema_version table records which ones ran.

/// Database migrations.
pub const MIGRATIONS: &[&str] = &[
    // v1: Owners and their storage accounting
    r#"
CREATE TABLE users (
    id              TEXT PRIMARY KEY,                 -- opaque principal id
    email           TEXT NOT NULL UNIQUE COLLATE NOCASE,
    display_name    TEXT NOT NULL,
    storage_used    INTEGER NOT NULL DEFAULT 0 CHECK (storage_used >= 0),
    storage_limit   INTEGER NOT NULL,
    created_at      TEXT NOT NULL
);
"#,
    // v2: Folders
    r#"
CREATE TABLE folders (
    id          TEXT PRIMARY KEY,
    owner_id    TEXT NOT NULL REFERENCES users(id),
    parent_id   TEXT REFERENCES folders(id),          -- NULL at the drive root
    name        TEXT NOT NULL,
    color       TEXT NOT NULL,
    path        TEXT NOT NULL,                        -- materialized from ancestor names
    is_deleted  INTEGER NOT NULL DEFAULT 0,
    deleted_at  TEXT,
    is_public   INTEGER NOT NULL DEFAULT 0,
    shared_with TEXT NOT NULL DEFAULT '[]',           -- JSON array of grants
    share_token TEXT UNIQUE,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE INDEX idx_folders_owner_path ON folders(owner_id, path);
CREATE INDEX idx_folders_owner_parent ON folders(owner_id, parent_id);

-- Live sibling names are unique per owner and parent
CREATE UNIQUE INDEX idx_folders_live_sibling
    ON folders(owner_id, COALESCE(parent_id, ''), name)
    WHERE is_deleted = 0;
"#,
    // v3: Files
    r#"
CREATE TABLE files (
    id            TEXT PRIMARY KEY,
    owner_id      TEXT NOT NULL REFERENCES users(id),
    folder_id     TEXT REFERENCES folders(id),        -- NULL at the drive root
    name          TEXT NOT NULL,
    original_name TEXT NOT NULL,
    size          INTEGER NOT NULL CHECK (size >= 0),
    mime_type     TEXT NOT NULL,
    url           TEXT NOT NULL,
    public_id     TEXT NOT NULL,
    tags          TEXT NOT NULL DEFAULT '[]',         -- JSON array of strings
    version       INTEGER NOT NULL DEFAULT 1,
    path          TEXT NOT NULL,
    is_deleted    INTEGER NOT NULL DEFAULT 0,
    deleted_at    TEXT,
    is_public     INTEGER NOT NULL DEFAULT 0,
    shared_with   TEXT NOT NULL DEFAULT '[]',
    share_token   TEXT UNIQUE,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

CREATE INDEX idx_files_owner_path ON files(owner_id, path);
CREATE INDEX idx_files_folder ON files(folder_id);
CREATE INDEX idx_files_owner_deleted ON files(owner_id, is_deleted);
"#,
    // v4: Blob deletions awaiting retry
    r#"
CREATE TABLE pending_blob_deletes (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    public_id   TEXT NOT NULL,
    attempts    INTEGER NOT NULL DEFAULT 0,
    last_error  TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
"#,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_not_empty() {
        assert_eq!(MIGRATIONS.len(), 4);
        assert!(MIGRATIONS.iter().all(|m| !m.trim().is_empty()));
    }

    #[test]
    fn test_sibling_index_is_partial() {
        assert!(MIGRATIONS[1].contains("WHERE is_deleted = 0"));
    }
}
