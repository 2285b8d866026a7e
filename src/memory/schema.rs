//! SQLite schema for the per-tier structured and vector tables.

use regex::Regex;
use rusqlite::{Connection, Result as SqliteResult};
use std::sync::OnceLock;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the connection and the schema version table.
pub fn initialize_schema(conn: &Connection) -> SqliteResult<()> {
    // Enable WAL mode for better concurrent access
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < SCHEMA_VERSION {
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [SCHEMA_VERSION],
        )?;
    }

    Ok(())
}

/// Whether a table name is safe to splice into SQL.
pub fn is_valid_identifier(name: &str) -> bool {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("static regex"))
        .is_match(name)
}

/// Create the structured table for one tier.
///
/// `seq` preserves insertion order; `key` is unique within the table.
/// Timestamps are fixed-width RFC 3339 strings so they compare as text.
pub fn ensure_structured_table(conn: &Connection, table: &str) -> SqliteResult<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {t} (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            key TEXT NOT NULL UNIQUE,
            id TEXT NOT NULL,
            payload TEXT NOT NULL,
            session_id TEXT NOT NULL,
            context_type TEXT NOT NULL,
            importance REAL NOT NULL DEFAULT 0.5,
            tier TEXT NOT NULL,
            tags TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            access_count INTEGER NOT NULL DEFAULT 0,
            metadata TEXT NOT NULL DEFAULT '{{}}'
        );
        CREATE INDEX IF NOT EXISTS idx_{t}_session ON {t}(session_id);
        CREATE INDEX IF NOT EXISTS idx_{t}_context_type ON {t}(context_type);
        CREATE INDEX IF NOT EXISTS idx_{t}_created ON {t}(created_at);",
        t = table
    ))
}

/// Create the vector table for one tier. Embeddings are little-endian f32 blobs.
pub fn ensure_vector_table(conn: &Connection, table: &str) -> SqliteResult<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {t} (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            key TEXT NOT NULL UNIQUE,
            id TEXT NOT NULL,
            payload TEXT NOT NULL,
            session_id TEXT NOT NULL,
            context_type TEXT NOT NULL,
            importance REAL NOT NULL DEFAULT 0.5,
            tier TEXT NOT NULL,
            tags TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            access_count INTEGER NOT NULL DEFAULT 0,
            metadata TEXT NOT NULL DEFAULT '{{}}',
            embedding BLOB NOT NULL,
            model TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_{t}_session ON {t}(session_id);
        CREATE INDEX IF NOT EXISTS idx_{t}_created ON {t}(created_at);",
        t = table
    ))
}

/// Get the current schema version.
pub fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

/// Check if the schema is initialized.
pub fn is_initialized(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get::<_, i32>(0),
    )
    .map(|count| count > 0)
    .unwrap_or(false)
}
