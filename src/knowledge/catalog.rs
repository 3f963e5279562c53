//! Document Catalog - rusqlite 기반 수집 문서 목록
//!
//! 벡터 인덱스에 들어간 문서의 메타데이터만 기록합니다 (본문/벡터는 저장하지 않음).
//! 목록 조회, source 단위 삭제, 변경 없는 문서 재수집 건너뛰기에 사용합니다.
//! 저장 위치: `<data_dir>/catalog.db` (`get_data_dir()`, 보통 ~/.local/share/.rag-chatbot)

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::config::get_data_dir;

use super::document::Document;

// ============================================================================
// Types
// ============================================================================

/// 카탈로그 엔트리
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub title: String,
    pub source: String,
    pub category: String,
    pub content_hash: String,
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 카탈로그 통계
#[derive(Debug, Clone, Serialize)]
pub struct CatalogStats {
    pub document_count: usize,
    pub total_chunks: usize,
    pub db_path: PathBuf,
}

// ============================================================================
// DocumentCatalog
// ============================================================================

/// 문서 카탈로그
pub struct DocumentCatalog {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl std::fmt::Debug for DocumentCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentCatalog")
            .field("db_path", &self.db_path)
            .finish()
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, title, source, category, content_hash, chunk_count, created_at, updated_at FROM documents";

impl DocumentCatalog {
    /// 카탈로그 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create catalog directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let catalog = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        catalog.initialize()?;
        Ok(catalog)
    }

    /// 기본 위치에서 열기 (`get_data_dir()/catalog.db`)
    pub fn open_default() -> Result<Self> {
        Self::open(&get_data_dir().join("catalog.db"))
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                source TEXT NOT NULL DEFAULT '',
                category TEXT NOT NULL DEFAULT '',
                content_hash TEXT NOT NULL,
                chunk_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_documents_source ON documents(source);
            CREATE INDEX IF NOT EXISTS idx_documents_category ON documents(category);",
        )
        .context("Failed to create documents table")?;

        tracing::debug!("Document catalog initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 수집된 문서 기록 (같은 id면 갱신, created_at은 유지)
    pub fn record(&self, doc: &Document, chunk_count: usize) -> Result<()> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO documents (id, title, source, category, content_hash, chunk_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                source = excluded.source,
                category = excluded.category,
                content_hash = excluded.content_hash,
                chunk_count = excluded.chunk_count,
                updated_at = excluded.updated_at",
            params![
                doc.id,
                doc.title,
                doc.source,
                doc.category,
                doc.content_hash(),
                chunk_count as i64,
                doc.created_at.to_rfc3339(),
                now
            ],
        )
        .context("Failed to record document")?;

        tracing::debug!("Recorded document {} ({} chunks)", doc.id, chunk_count);
        Ok(())
    }

    /// ID로 조회
    pub fn get(&self, id: &str) -> Result<Option<CatalogEntry>> {
        let conn = self.lock()?;
        let sql = format!("{} WHERE id = ?1", SELECT_COLUMNS);

        conn.query_row(&sql, params![id], map_entry)
            .optional()
            .context("Failed to query document")
    }

    /// 저장된 내용 해시 (변경 감지용)
    pub fn content_hash(&self, id: &str) -> Result<Option<String>> {
        Ok(self.get(id)?.map(|e| e.content_hash))
    }

    /// 문서가 같은 내용과 메타데이터(source, category)로 이미 기록되어 있는지
    pub fn is_unchanged(&self, doc: &Document) -> Result<bool> {
        Ok(self.get(&doc.id)?.is_some_and(|entry| {
            entry.content_hash == doc.content_hash()
                && entry.source == doc.source
                && entry.category == doc.category
        }))
    }

    /// 문서 목록 (최근 갱신 순)
    pub fn list(&self, limit: usize, category: Option<&str>) -> Result<Vec<CatalogEntry>> {
        let conn = self.lock()?;

        let entries = match category {
            Some(cat) => {
                let sql = format!(
                    "{} WHERE category = ?1 ORDER BY updated_at DESC, id LIMIT ?2",
                    SELECT_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![cat, limit as i64], map_entry)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let sql = format!("{} ORDER BY updated_at DESC, id LIMIT ?1", SELECT_COLUMNS);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![limit as i64], map_entry)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };

        Ok(entries)
    }

    /// source로 문서 조회
    pub fn find_by_source(&self, source: &str) -> Result<Vec<CatalogEntry>> {
        let conn = self.lock()?;
        let sql = format!("{} WHERE source = ?1 ORDER BY id", SELECT_COLUMNS);

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![source], map_entry)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// 문서 기록 삭제
    pub fn remove(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    /// 카탈로그 통계
    pub fn stats(&self) -> Result<CatalogStats> {
        let conn = self.lock()?;

        let (count, chunks): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(chunk_count), 0) FROM documents",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(CatalogStats {
            document_count: count as usize,
            total_chunks: chunks as usize,
            db_path: self.db_path.clone(),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn map_entry(row: &Row<'_>) -> rusqlite::Result<CatalogEntry> {
    Ok(CatalogEntry {
        id: row.get(0)?,
        title: row.get(1)?,
        source: row.get(2)?,
        category: row.get(3)?,
        content_hash: row.get(4)?,
        chunk_count: row.get::<_, i64>(5)? as usize,
        created_at: parse_datetime(row.get::<_, String>(6)?),
        updated_at: parse_datetime(row.get::<_, String>(7)?),
    })
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::document::NewDocument;
    use tempfile::TempDir;

    fn create_test_catalog() -> (TempDir, DocumentCatalog) {
        let dir = TempDir::new().unwrap();
        let catalog = DocumentCatalog::open(&dir.path().join("catalog.db")).unwrap();
        (dir, catalog)
    }

    fn doc(id: &str, content: &str, source: &str, category: &str) -> Document {
        NewDocument::new(format!("Title {}", id), content)
            .with_id(id)
            .with_source(source)
            .with_category(category)
            .validate()
            .unwrap()
    }

    #[test]
    fn test_record_and_get() {
        let (_dir, catalog) = create_test_catalog();
        let d = doc("ml", "Machine learning is a subset of AI.", "test", "AI");

        catalog.record(&d, 3).unwrap();

        let entry = catalog.get("ml").unwrap().unwrap();
        assert_eq!(entry.title, "Title ml");
        assert_eq!(entry.chunk_count, 3);
        assert_eq!(entry.content_hash, d.content_hash());
        assert!(catalog.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_record_updates_existing() {
        let (_dir, catalog) = create_test_catalog();

        let first = doc("ml", "v1", "test", "AI");
        catalog.record(&first, 1).unwrap();
        assert!(catalog.is_unchanged(&first).unwrap());

        let second = doc("ml", "v2 with more words", "test", "AI");
        assert!(!catalog.is_unchanged(&second).unwrap());
        catalog.record(&second, 2).unwrap();

        let stats = catalog.stats().unwrap();
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.total_chunks, 2);
    }

    #[test]
    fn test_metadata_change_is_not_unchanged() {
        let (_dir, catalog) = create_test_catalog();
        catalog.record(&doc("d", "same text", "wiki", "AI"), 1).unwrap();

        assert!(catalog.is_unchanged(&doc("d", "same text", "wiki", "AI")).unwrap());
        assert!(!catalog.is_unchanged(&doc("d", "same text", "wiki", "Nepal")).unwrap());
        assert!(!catalog.is_unchanged(&doc("d", "same text", "manual", "AI")).unwrap());
        assert!(!catalog.is_unchanged(&doc("other", "same text", "wiki", "AI")).unwrap());
    }

    #[test]
    fn test_list_and_find_by_source() {
        let (_dir, catalog) = create_test_catalog();

        for i in 0..5 {
            let category = if i % 2 == 0 { "AI" } else { "Nepal" };
            let source = if i < 3 { "wiki" } else { "tabular" };
            catalog
                .record(&doc(&format!("d{}", i), "content", source, category), 1)
                .unwrap();
        }

        assert_eq!(catalog.list(10, None).unwrap().len(), 5);
        assert_eq!(catalog.list(2, None).unwrap().len(), 2);
        assert_eq!(catalog.list(10, Some("AI")).unwrap().len(), 3);

        let tabular = catalog.find_by_source("tabular").unwrap();
        let ids: Vec<&str> = tabular.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["d3", "d4"]);
    }

    #[test]
    fn test_remove() {
        let (_dir, catalog) = create_test_catalog();
        catalog.record(&doc("gone", "bye", "", ""), 1).unwrap();

        assert!(catalog.remove("gone").unwrap());
        assert!(!catalog.remove("gone").unwrap());
        assert_eq!(catalog.stats().unwrap().document_count, 0);
    }
}
