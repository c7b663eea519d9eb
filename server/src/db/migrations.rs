use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking, no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        "-- Migration 1: object index

CREATE TABLE namespaces (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

CREATE TABLE objects (
    path TEXT PRIMARY KEY,
    namespace TEXT NOT NULL REFERENCES namespaces(name),
    content_type TEXT NOT NULL,
    metadata TEXT NOT NULL,
    size INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX idx_objects_namespace ON objects(namespace);
",
    )])
}
