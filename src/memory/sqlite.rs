//! SQLite-backed structured and vector stores.
//!
//! Both stores of every tier share one connection; each tier gets its own
//! pair of tables. Vector search is brute-force cosine similarity over the
//! rows that pass the attribute filter.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{Backend, Error, Result};

use super::backend::{Embedder, StructuredStore, VectorStore};
use super::embedding::{cosine_similarity, decode_embedding, encode_embedding};
use super::schema::{
    ensure_structured_table, ensure_vector_table, initialize_schema, is_initialized,
    is_valid_identifier,
};
use super::types::{MemoryRecord, Metadata, MemoryTier, RecordFilter, ScoredRecord};

const RECORD_COLUMNS: &str = "key, id, payload, session_id, context_type, importance, tier, \
                              tags, created_at, expires_at, access_count, metadata";

/// Shared SQLite connection hosting the tier tables.
#[derive(Clone)]
pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDatabase {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::structured(e.to_string()))?;

        if !is_initialized(&conn) {
            initialize_schema(&conn).map_err(|e| Error::structured(e.to_string()))?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::structured(e.to_string()))?;
        initialize_schema(&conn).map_err(|e| Error::structured(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Structured store over `table`, created if missing.
    pub fn structured_store(&self, table: &str) -> Result<SqliteStructuredStore> {
        check_identifier(table)?;
        with_conn(&self.conn, Backend::Structured, |conn| {
            ensure_structured_table(conn, table)
        })?;
        Ok(SqliteStructuredStore {
            conn: Arc::clone(&self.conn),
            table: table.to_string(),
        })
    }

    /// Vector store over `table`, created if missing.
    pub fn vector_store(
        &self,
        table: &str,
        embedder: Arc<dyn Embedder>,
    ) -> Result<SqliteVectorStore> {
        check_identifier(table)?;
        with_conn(&self.conn, Backend::Vector, |conn| {
            ensure_vector_table(conn, table)
        })?;
        Ok(SqliteVectorStore {
            conn: Arc::clone(&self.conn),
            table: table.to_string(),
            embedder,
        })
    }
}

fn check_identifier(table: &str) -> Result<()> {
    if is_valid_identifier(table) {
        Ok(())
    } else {
        Err(Error::Config(format!("invalid table name: {:?}", table)))
    }
}

fn with_conn<F, T>(conn: &Mutex<Connection>, backend: Backend, f: F) -> Result<T>
where
    F: FnOnce(&Connection) -> rusqlite::Result<T>,
{
    let conn = conn
        .lock()
        .map_err(|e| Error::Internal(format!("Failed to lock connection: {}", e)))?;
    f(&conn).map_err(|e| Error::BackendUnavailable {
        backend,
        message: e.to_string(),
    })
}

/// Structured store of one tier.
pub struct SqliteStructuredStore {
    conn: Arc<Mutex<Connection>>,
    table: String,
}

/// Vector store of one tier.
pub struct SqliteVectorStore {
    conn: Arc<Mutex<Connection>>,
    table: String,
    embedder: Arc<dyn Embedder>,
}

#[async_trait]
impl StructuredStore for SqliteStructuredStore {
    async fn save(&self, record: &MemoryRecord) -> Result<()> {
        let row = RecordRow::from_record(record)?;
        with_conn(&self.conn, Backend::Structured, |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    self.table, RECORD_COLUMNS
                ),
                params![
                    row.key,
                    row.id,
                    row.payload,
                    row.session_id,
                    row.context_type,
                    row.importance,
                    row.tier,
                    row.tags,
                    row.created_at,
                    row.expires_at,
                    row.access_count,
                    row.metadata,
                ],
            )?;
            Ok(())
        })
    }

    async fn get(&self, key: &str) -> Result<Option<MemoryRecord>> {
        with_conn(&self.conn, Backend::Structured, |conn| {
            conn.query_row(
                &format!("SELECT {} FROM {} WHERE key = ?1", RECORD_COLUMNS, self.table),
                params![key],
                row_to_record,
            )
            .optional()
        })
    }

    async fn search(
        &self,
        filter: &RecordFilter,
        limit: usize,
        session_id: Option<&str>,
    ) -> Result<Vec<MemoryRecord>> {
        let mut sql = format!("SELECT {} FROM {} WHERE 1=1", RECORD_COLUMNS, self.table);
        let mut params_vec: Vec<Box<dyn ToSql>> = Vec::new();
        push_filter(&mut sql, &mut params_vec, filter, session_id);
        let order = if filter.newest_first { "DESC" } else { "ASC" };
        sql.push_str(&format!(" ORDER BY seq {} LIMIT {}", order, sql_limit(limit)));

        with_conn(&self.conn, Backend::Structured, |conn| {
            query_records(conn, &sql, &params_vec)
        })
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        with_conn(&self.conn, Backend::Structured, |conn| {
            let rows = conn.execute(
                &format!("DELETE FROM {} WHERE key = ?1", self.table),
                params![key],
            )?;
            Ok(rows > 0)
        })
    }

    async fn list_before(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<Vec<MemoryRecord>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE created_at < ?1 ORDER BY seq ASC LIMIT {}",
            RECORD_COLUMNS,
            self.table,
            sql_limit(limit)
        );
        let params_vec: Vec<Box<dyn ToSql>> = vec![Box::new(format_ts(cutoff))];
        with_conn(&self.conn, Backend::Structured, |conn| {
            query_records(conn, &sql, &params_vec)
        })
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        with_conn(&self.conn, Backend::Structured, |conn| {
            conn.execute(
                &format!("DELETE FROM {} WHERE created_at < ?1", self.table),
                params![format_ts(cutoff)],
            )
        })
    }

    async fn record_access(&self, key: &str) -> Result<()> {
        with_conn(&self.conn, Backend::Structured, |conn| {
            conn.execute(
                &format!(
                    "UPDATE {} SET access_count = access_count + 1 WHERE key = ?1",
                    self.table
                ),
                params![key],
            )?;
            Ok(())
        })
    }

    async fn count(&self) -> Result<usize> {
        with_conn(&self.conn, Backend::Structured, |conn| {
            let n: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", self.table),
                [],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }

    fn name(&self) -> &str {
        &self.table
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn save(&self, record: &MemoryRecord) -> Result<()> {
        let embedding = self.embedder.embed(&record.embedding_text()).await?;
        let blob = encode_embedding(&embedding);
        let row = RecordRow::from_record(record)?;
        let model = self.embedder.model().to_string();

        with_conn(&self.conn, Backend::Vector, |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {} ({}, embedding, model)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                    self.table, RECORD_COLUMNS
                ),
                params![
                    row.key,
                    row.id,
                    row.payload,
                    row.session_id,
                    row.context_type,
                    row.importance,
                    row.tier,
                    row.tags,
                    row.created_at,
                    row.expires_at,
                    row.access_count,
                    row.metadata,
                    blob,
                    model,
                ],
            )?;
            Ok(())
        })
    }

    async fn search(
        &self,
        query: &str,
        filter: &RecordFilter,
        limit: usize,
        score_threshold: f64,
        session_id: Option<&str>,
    ) -> Result<Vec<ScoredRecord>> {
        let query_embedding = self.embedder.embed(query).await?;

        let mut sql = format!(
            "SELECT {}, embedding FROM {} WHERE 1=1",
            RECORD_COLUMNS, self.table
        );
        let mut params_vec: Vec<Box<dyn ToSql>> = Vec::new();
        push_filter(&mut sql, &mut params_vec, filter, session_id);

        let candidates = with_conn(&self.conn, Backend::Vector, |conn| {
            let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_refs.as_slice(), |row| {
                    let record = row_to_record(row)?;
                    let blob: Vec<u8> = row.get(12)?;
                    Ok((record, decode_embedding(&blob)))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        let mut hits: Vec<ScoredRecord> = candidates
            .into_iter()
            .map(|(record, embedding)| {
                let score = cosine_similarity(&query_embedding, &embedding);
                ScoredRecord::semantic(record, score)
            })
            .filter(|hit| hit.score >= score_threshold)
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        with_conn(&self.conn, Backend::Vector, |conn| {
            let rows = conn.execute(
                &format!("DELETE FROM {} WHERE key = ?1", self.table),
                params![key],
            )?;
            Ok(rows > 0)
        })
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        with_conn(&self.conn, Backend::Vector, |conn| {
            conn.execute(
                &format!("DELETE FROM {} WHERE created_at < ?1", self.table),
                params![format_ts(cutoff)],
            )
        })
    }

    async fn count(&self) -> Result<usize> {
        with_conn(&self.conn, Backend::Vector, |conn| {
            let n: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", self.table),
                [],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }

    fn name(&self) -> &str {
        &self.table
    }
}

/// Column values of a record, serialized for SQLite.
struct RecordRow {
    key: String,
    id: String,
    payload: String,
    session_id: String,
    context_type: String,
    importance: f64,
    tier: String,
    tags: String,
    created_at: String,
    expires_at: String,
    access_count: i64,
    metadata: String,
}

impl RecordRow {
    fn from_record(record: &MemoryRecord) -> Result<Self> {
        Ok(Self {
            key: record.key.clone(),
            id: record.id.clone(),
            payload: serde_json::to_string(&record.payload)?,
            session_id: record.session_id.clone(),
            context_type: record.context_type.to_string(),
            importance: record.importance,
            tier: record.tier.to_string(),
            tags: serde_json::to_string(&record.tags)?,
            created_at: format_ts(record.created_at),
            expires_at: format_ts(record.expires_at),
            access_count: record.access_count as i64,
            metadata: serde_json::to_string(&record.metadata)?,
        })
    }
}

fn query_records(
    conn: &Connection,
    sql: &str,
    params_vec: &[Box<dyn ToSql>],
) -> rusqlite::Result<Vec<MemoryRecord>> {
    let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
    let mut stmt = conn.prepare(sql)?;
    let records = stmt
        .query_map(params_refs.as_slice(), row_to_record)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}

/// SQLite takes LIMIT as a signed 64-bit integer.
fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Escape LIKE wildcards so `text` matches literally.
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Append WHERE clauses for `filter` and the session restriction.
fn push_filter(
    sql: &mut String,
    params_vec: &mut Vec<Box<dyn ToSql>>,
    filter: &RecordFilter,
    session_id: Option<&str>,
) {
    if let Some(session) = session_id {
        sql.push_str(" AND session_id = ?");
        params_vec.push(Box::new(session.to_string()));
    }

    if !filter.context_types.is_empty() {
        let placeholders: Vec<&str> = filter.context_types.iter().map(|_| "?").collect();
        sql.push_str(&format!(" AND context_type IN ({})", placeholders.join(",")));
        for ct in &filter.context_types {
            params_vec.push(Box::new(ct.to_string()));
        }
    }

    if !filter.tags.is_empty() {
        let placeholders: Vec<&str> = filter.tags.iter().map(|_| "?").collect();
        sql.push_str(&format!(
            " AND EXISTS (SELECT 1 FROM json_each(tags) WHERE json_each.value IN ({}))",
            placeholders.join(",")
        ));
        for tag in &filter.tags {
            params_vec.push(Box::new(tag.clone()));
        }
    }

    if let Some(ref name) = filter.collection_name {
        sql.push_str(" AND json_extract(metadata, '$.collection_name') = ?");
        params_vec.push(Box::new(name.clone()));
    }

    if let Some(ref text) = filter.text {
        sql.push_str(" AND LOWER(payload) LIKE ? ESCAPE '\\'");
        params_vec.push(Box::new(format!("%{}%", escape_like(&text.to_lowercase()))));
    }

    if let Some(min) = filter.min_importance {
        sql.push_str(" AND importance >= ?");
        params_vec.push(Box::new(min));
    }

    if let Some(after) = filter.created_after {
        sql.push_str(" AND created_at >= ?");
        params_vec.push(Box::new(format_ts(after)));
    }

    if let Some(before) = filter.created_before {
        sql.push_str(" AND created_at < ?");
        params_vec.push(Box::new(format_ts(before)));
    }

    for (key, value) in &filter.attributes {
        let path = format!("$.\"{}\"", key.replace('"', ""));
        match value {
            Value::Null => {
                sql.push_str(" AND json_extract(metadata, ?) IS NULL");
                params_vec.push(Box::new(path));
            }
            Value::Bool(b) => {
                sql.push_str(" AND json_extract(metadata, ?) = ?");
                params_vec.push(Box::new(path));
                params_vec.push(Box::new(*b as i64));
            }
            Value::Number(n) => {
                sql.push_str(" AND json_extract(metadata, ?) = ?");
                params_vec.push(Box::new(path));
                params_vec.push(Box::new(n.as_f64().unwrap_or_default()));
            }
            Value::String(s) => {
                sql.push_str(" AND json_extract(metadata, ?) = ?");
                params_vec.push(Box::new(path));
                params_vec.push(Box::new(s.clone()));
            }
            Value::Array(_) | Value::Object(_) => {
                sql.push_str(" AND json_extract(metadata, ?) = json(?)");
                params_vec.push(Box::new(path));
                params_vec.push(Box::new(value.to_string()));
            }
        }
    }
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<MemoryRecord> {
    let payload_str: String = row.get(2)?;
    let context_type: String = row.get(4)?;
    let tier_str: String = row.get(6)?;
    let tags_str: String = row.get(7)?;
    let metadata_str: String = row.get(11)?;

    let tier: MemoryTier = tier_str
        .parse()
        .map_err(|e: Error| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;

    let payload = serde_json::from_str(&payload_str).unwrap_or(Value::String(payload_str));
    let tags: BTreeSet<String> = serde_json::from_str(&tags_str).unwrap_or_default();
    let metadata: Metadata = serde_json::from_str(&metadata_str).unwrap_or_default();

    Ok(MemoryRecord {
        key: row.get(0)?,
        id: row.get(1)?,
        payload,
        session_id: row.get(3)?,
        context_type: context_type.into(),
        importance: row.get(5)?,
        tier,
        tags,
        created_at: parse_datetime(row.get::<_, String>(8)?),
        expires_at: parse_datetime(row.get::<_, String>(9)?),
        access_count: row.get::<_, i64>(10)? as u64,
        metadata,
    })
}

/// Fixed-width UTC timestamp, so text comparison orders chronologically.
pub(crate) fn format_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
