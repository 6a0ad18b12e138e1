//! SQLite catalog of item records and located document references.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{CandidateId, DocumentReference, FileType, ItemRecord};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Where crawl results go.
///
/// Items are upserted by source id; references are inserted only when the
/// (item id, source URL) pair is new.
pub trait CatalogSink: Send + Sync {
    fn upsert_item(&self, item: &ItemRecord) -> Result<()>;

    /// Returns how many references were new.
    fn insert_references(&self, references: &[DocumentReference]) -> Result<usize>;
}

/// A document reference as stored, with its row id.
#[derive(Debug, Clone)]
pub struct StoredReference {
    pub id: i64,
    pub reference: DocumentReference,
}

/// SQLite-backed catalog.
pub struct CatalogRepository {
    db_path: PathBuf,
}

impl CatalogRepository {
    /// Open (creating if needed) the catalog at `db_path`.
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let repo = Self {
            db_path: db_path.to_path_buf(),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    fn connect(&self) -> Result<Connection> {
        Ok(super::connect(&self.db_path)?)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                source_id INTEGER PRIMARY KEY,
                kind TEXT,
                name TEXT NOT NULL,
                year INTEGER,
                rank INTEGER,
                avg_rating REAL,
                record TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS document_refs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                item_id INTEGER NOT NULL,
                source_url TEXT NOT NULL,
                title TEXT NOT NULL,
                file_id TEXT,
                language TEXT,
                file_type TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(item_id, source_url)
            );

            CREATE INDEX IF NOT EXISTS idx_items_rank
                ON items(rank);
            CREATE INDEX IF NOT EXISTS idx_document_refs_item
                ON document_refs(item_id);
        "#,
        )?;
        Ok(())
    }

    /// Fetch one item by source id.
    pub fn get_item(&self, id: CandidateId) -> Result<Option<ItemRecord>> {
        let conn = self.connect()?;
        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM items WHERE source_id = ?1",
                params![id as i64],
                |row| row.get(0),
            )
            .optional()?;
        match record {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn count_items(&self) -> Result<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Stored references for an item, oldest first.
    pub fn references_for(&self, item_id: CandidateId) -> Result<Vec<StoredReference>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, item_id, source_url, title, file_id, language, file_type
             FROM document_refs WHERE item_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![item_id as i64], |row| {
            let file_type: String = row.get(6)?;
            Ok(StoredReference {
                id: row.get(0)?,
                reference: DocumentReference {
                    item_id: row.get::<_, i64>(1)? as CandidateId,
                    source_url: row.get(2)?,
                    title: row.get(3)?,
                    file_id_hint: row.get(4)?,
                    language: row.get(5)?,
                    file_type: FileType::from_extension(&file_type),
                },
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

impl CatalogSink for CatalogRepository {
    fn upsert_item(&self, item: &ItemRecord) -> Result<()> {
        let conn = self.connect()?;
        let now = Utc::now().to_rfc3339();
        let record = serde_json::to_string(item)?;
        conn.execute(
            r#"
            INSERT INTO items (source_id, kind, name, year, rank, avg_rating, record, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            ON CONFLICT(source_id) DO UPDATE SET
                kind = excluded.kind,
                name = excluded.name,
                year = excluded.year,
                rank = excluded.rank,
                avg_rating = excluded.avg_rating,
                record = excluded.record,
                updated_at = excluded.updated_at
            "#,
            params![
                item.id as i64,
                item.kind,
                item.name,
                item.year,
                item.rank,
                item.avg_rating,
                record,
                now,
            ],
        )?;
        Ok(())
    }

    fn insert_references(&self, references: &[DocumentReference]) -> Result<usize> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR IGNORE INTO document_refs
                    (item_id, source_url, title, file_id, language, file_type, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )?;
            for reference in references {
                inserted += stmt.execute(params![
                    reference.item_id as i64,
                    reference.source_url,
                    reference.title,
                    reference.file_id_hint,
                    reference.language,
                    reference.file_type.as_str(),
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }
}
