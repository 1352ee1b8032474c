//! Database schema and migrations for Cabinet.
//!
//! Migrations are applied in order when the database is first opened or
//! upgraded; the `schema_version` table records which have run.

/// Database migrations.
pub const MIGRATIONS: &[&str] = &[
    // v1: Items table
    r#"
-- One row per file or folder in an owner's tree
CREATE TABLE items (
    id          TEXT PRIMARY KEY,
    owner_id    TEXT NOT NULL,
    parent_id   TEXT REFERENCES items(id),   -- NULL for root items
    name        TEXT NOT NULL,
    kind        TEXT NOT NULL CHECK (kind IN ('file', 'folder')),
    path        TEXT NOT NULL,
    size        INTEGER,                     -- files only
    mime_type   TEXT,                        -- files only
    storage_key TEXT,                        -- files only
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    CHECK (kind = 'file' OR (size IS NULL AND mime_type IS NULL AND storage_key IS NULL))
);

CREATE INDEX idx_items_owner_parent ON items(owner_id, parent_id);
CREATE INDEX idx_items_owner_kind ON items(owner_id, kind);
CREATE INDEX idx_items_path ON items(path);
"#,
    // v2: Sibling name uniqueness, including root level
    r#"
-- NULL parents compare distinct in a plain UNIQUE, so fold them to ''
CREATE UNIQUE INDEX idx_items_sibling_name
    ON items(owner_id, COALESCE(parent_id, ''), name);
"#,
    // v3: Lookup by storage key for orphan reconciliation
    r#"
CREATE INDEX idx_items_storage_key ON items(storage_key) WHERE storage_key IS NOT NULL;
"#,
    // v4: One item per stored object
    r#"
DROP INDEX idx_items_storage_key;
CREATE UNIQUE INDEX idx_items_storage_key ON items(storage_key) WHERE storage_key IS NOT NULL;
"#,
];
