//! 수집 모듈 - 문서 → 청크 → 임베딩 → 인덱스 upsert
//!
//! 한 문서의 수집은 청크 단위로 원자적이지 않습니다.
//! 청크 임베딩은 병렬로 진행되고, 임베딩에 성공한 청크는 문서당 한 번의 upsert로 인덱스에 씁니다.
//! n번째 청크의 임베딩이 실패해도 나머지 청크는 인덱스에 남고, 리포트에 성공/실패 청크가 모두 기록됩니다.
//! upsert는 멱등이므로 같은 문서를 다시 수집하면 실패한 청크를 복구할 수 있습니다.
//!
//! 재수집 시에는 먼저 해당 문서의 기존 청크를 모두 지워 통째로 교체합니다.

pub mod loader;

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::config::TimeoutConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{with_timeout, RagError, Result};
use crate::knowledge::{
    check_dimension, chunk_id, Chunk, Chunker, Document, DocumentCatalog, NewDocument,
    VectorIndex,
};

// ============================================================================
// Reports
// ============================================================================

/// 청크 하나의 실패
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkFailure {
    pub chunk_id: String,
    /// `RagError::code()`
    pub code: String,
    pub error: String,
}

/// 문서 한 건의 수집 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub chunk_count: usize,
    /// 성공한 chunk_id (청크 순서)
    pub succeeded: Vec<String>,
    /// 실패한 청크 (청크 순서)
    pub failed: Vec<ChunkFailure>,
    /// 내용이 같아 건너뜀
    pub skipped: bool,
}

impl IngestReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// 문서 한 건의 실패
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentFailure {
    pub id: String,
    pub code: String,
    pub error: String,
}

/// 여러 문서 수집 결과 (`add_documents`)
#[derive(Debug, Clone, Default, Serialize)]
pub struct AddDocumentsReport {
    /// 모든 청크가 성공한 문서 ID
    pub succeeded: Vec<String>,
    /// 실패한 문서 (검증 실패 또는 일부 청크 실패)
    pub failed: Vec<DocumentFailure>,
    /// 내용이 같아 건너뛴 문서 ID
    pub skipped: Vec<String>,
    /// 문서별 상세 리포트 (검증을 통과한 문서만)
    pub reports: Vec<IngestReport>,
}

// ============================================================================
// Ingestor
// ============================================================================

/// 문서 수집기
pub struct Ingestor {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    chunker: Arc<dyn Chunker>,
    catalog: Option<Arc<DocumentCatalog>>,
    timeouts: TimeoutConfig,
    concurrency: usize,
    skip_unchanged: bool,
}

impl Ingestor {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        chunker: Arc<dyn Chunker>,
        timeouts: TimeoutConfig,
        concurrency: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            chunker,
            catalog: None,
            timeouts,
            concurrency: concurrency.max(1),
            skip_unchanged: false,
        }
    }

    /// 문서 카탈로그 연결 (수집 이력 기록)
    pub fn with_catalog(mut self, catalog: Arc<DocumentCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// 카탈로그에 같은 내용이 있으면 건너뛰기
    pub fn skip_unchanged(mut self, skip: bool) -> Self {
        self.skip_unchanged = skip;
        self
    }

    pub fn catalog(&self) -> Option<&Arc<DocumentCatalog>> {
        self.catalog.as_ref()
    }

    /// 문서 한 건 수집
    ///
    /// 문서 단위 실패(차원 불일치, 기존 청크 삭제 실패)는 `Err`,
    /// 청크 단위 실패는 리포트의 `failed`로 보고합니다.
    pub async fn ingest(&self, doc: &Document) -> Result<IngestReport> {
        check_dimension(self.index.dimension(), self.embedder.dimension())?;

        if self.skip_unchanged && self.is_unchanged(doc) {
            tracing::info!("Skipping unchanged document: {}", doc.id);
            return Ok(IngestReport {
                document_id: doc.id.clone(),
                chunk_count: 0,
                succeeded: vec![],
                failed: vec![],
                skipped: true,
            });
        }

        let texts = self.chunker.chunk(&doc.content);
        if texts.is_empty() {
            return Err(RagError::Validation(format!(
                "document '{}' produced no chunks",
                doc.id
            )));
        }
        let chunk_count = texts.len();
        tracing::debug!(
            "Document {} split into {} chunks ({})",
            doc.id,
            chunk_count,
            self.chunker.name()
        );

        // 기존 청크 제거 (통째로 교체)
        let removed = with_timeout(
            "index delete",
            self.timeouts.index(),
            self.index.delete_by_document(&doc.id),
        )
        .await?;
        if removed > 0 {
            tracing::debug!("Removed {} stale chunks of {}", removed, doc.id);
        }

        // 임베딩은 청크별로 병렬, 인덱스 쓰기는 문서당 한 번
        let metadata = doc.metadata();
        let mut embedded: Vec<(usize, String, Result<Chunk>)> =
            stream::iter(texts.into_iter().enumerate())
                .map(|(i, text)| {
                    let id = chunk_id(&doc.id, i);
                    let metadata = metadata.clone();
                    async move {
                        let result = self.embed_chunk(id.clone(), text, metadata).await;
                        (i, id, result)
                    }
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;
        embedded.sort_by_key(|(i, _, _)| *i);

        let mut chunks = Vec::new();
        let mut failed = Vec::new();
        for (_, id, result) in embedded {
            match result {
                Ok(chunk) => chunks.push(chunk),
                Err(e) => {
                    tracing::warn!("Chunk {} failed: {}", id, e);
                    failed.push(ChunkFailure {
                        chunk_id: id,
                        code: e.code().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let mut succeeded = Vec::new();
        if !chunks.is_empty() {
            let written = with_timeout(
                "index upsert",
                self.timeouts.index(),
                self.index.upsert(&chunks),
            )
            .await;
            match written {
                Ok(_) => succeeded.extend(chunks.into_iter().map(|c| c.chunk_id)),
                Err(e) => {
                    tracing::warn!("Upsert of {} chunks for {} failed: {}", chunks.len(), doc.id, e);
                    failed.extend(chunks.into_iter().map(|c| ChunkFailure {
                        chunk_id: c.chunk_id,
                        code: e.code().to_string(),
                        error: e.to_string(),
                    }));
                    failed.sort_by_key(|f| chunk_index(&f.chunk_id));
                }
            }
        }

        let report = IngestReport {
            document_id: doc.id.clone(),
            chunk_count,
            succeeded,
            failed,
            skipped: false,
        };

        if report.is_complete() {
            self.record(doc, chunk_count);
            tracing::info!("Ingested {} ({} chunks)", doc.id, chunk_count);
        } else {
            tracing::warn!(
                "Partially ingested {}: {}/{} chunks failed",
                doc.id,
                report.failed.len(),
                chunk_count
            );
        }

        Ok(report)
    }

    /// 청크 하나 임베딩
    async fn embed_chunk(
        &self,
        chunk_id: String,
        text: String,
        metadata: crate::knowledge::ChunkMetadata,
    ) -> Result<Chunk> {
        let embedding = with_timeout(
            "embedding",
            self.timeouts.embedding(),
            self.embedder.embed(&text),
        )
        .await?;

        Ok(Chunk {
            chunk_id,
            text,
            embedding,
            metadata,
        })
    }

    /// 여러 문서 수집
    ///
    /// 문서 간 실패는 서로 영향을 주지 않습니다.
    pub async fn add_documents(&self, docs: Vec<NewDocument>) -> AddDocumentsReport {
        let mut report = AddDocumentsReport::default();

        for (i, new_doc) in docs.into_iter().enumerate() {
            let fallback_id = new_doc
                .id
                .clone()
                .unwrap_or_else(|| format!("document[{}]", i));

            let doc = match new_doc.validate() {
                Ok(doc) => doc,
                Err(e) => {
                    tracing::warn!("Rejected {}: {}", fallback_id, e);
                    report.failed.push(DocumentFailure {
                        id: fallback_id,
                        code: e.code().to_string(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            match self.ingest(&doc).await {
                Ok(r) if r.skipped => {
                    report.skipped.push(doc.id.clone());
                    report.reports.push(r);
                }
                Ok(r) if r.is_complete() => {
                    report.succeeded.push(doc.id.clone());
                    report.reports.push(r);
                }
                Ok(r) => {
                    let failed_ids: Vec<&str> =
                        r.failed.iter().map(|f| f.chunk_id.as_str()).collect();
                    let code = r
                        .failed
                        .first()
                        .map(|f| f.code.clone())
                        .unwrap_or_default();
                    report.failed.push(DocumentFailure {
                        id: doc.id.clone(),
                        code,
                        error: format!(
                            "{} of {} chunks failed: {}",
                            r.failed.len(),
                            r.chunk_count,
                            failed_ids.join(", ")
                        ),
                    });
                    report.reports.push(r);
                }
                Err(e) => {
                    tracing::warn!("Failed to ingest {}: {}", doc.id, e);
                    report.failed.push(DocumentFailure {
                        id: doc.id.clone(),
                        code: e.code().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "add_documents: {} succeeded, {} failed, {} skipped",
            report.succeeded.len(),
            report.failed.len(),
            report.skipped.len()
        );
        report
    }

    /// 문서 삭제 (인덱스 + 카탈로그), 삭제된 청크 수 반환
    pub async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let removed = with_timeout(
            "index delete",
            self.timeouts.index(),
            self.index.delete_by_document(document_id),
        )
        .await?;

        if let Some(catalog) = &self.catalog {
            if let Err(e) = catalog.remove(document_id) {
                tracing::warn!("Failed to remove {} from catalog: {:#}", document_id, e);
            }
        }

        tracing::info!("Deleted document {} ({} chunks)", document_id, removed);
        Ok(removed)
    }

    /// source가 같은 모든 문서 삭제 (카탈로그 필요)
    ///
    /// 삭제된 문서 ID 목록을 반환합니다.
    pub async fn delete_by_source(&self, source: &str) -> Result<Vec<String>> {
        let catalog = self.catalog.as_ref().ok_or_else(|| {
            RagError::Configuration("deleting by source requires the document catalog".to_string())
        })?;

        let entries = catalog
            .find_by_source(source)
            .map_err(|e| RagError::IndexUnavailable(format!("catalog lookup failed: {:#}", e)))?;

        let mut deleted = Vec::with_capacity(entries.len());
        for entry in entries {
            self.delete_document(&entry.id).await?;
            deleted.push(entry.id);
        }
        Ok(deleted)
    }

    fn is_unchanged(&self, doc: &Document) -> bool {
        match &self.catalog {
            Some(catalog) => catalog.is_unchanged(doc).unwrap_or_else(|e| {
                tracing::warn!("Catalog lookup failed for {}: {:#}", doc.id, e);
                false
            }),
            None => false,
        }
    }

    fn record(&self, doc: &Document, chunk_count: usize) {
        if let Some(catalog) = &self.catalog {
            if let Err(e) = catalog.record(doc, chunk_count) {
                tracing::warn!("Failed to record {} in catalog: {:#}", doc.id, e);
            }
        }
    }
}

/// "doc#3" → 3 (리포트 정렬용)
fn chunk_index(chunk_id: &str) -> usize {
    chunk_id
        .rsplit_once('#')
        .and_then(|(_, n)| n.parse().ok())
        .unwrap_or(usize::MAX)
}

// ============================================================================
// Tests
// ============================================================================
