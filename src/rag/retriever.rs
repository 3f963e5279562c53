//! Context Retriever - 질의 임베딩 → 후보 검색 → 임계값 필터 → top-K
//!
//! 인덱스에는 `top_k * candidate_multiplier`개의 후보를 요청하고,
//! 임계값 미만을 먼저 버린 뒤 top-K로 자릅니다 (필터 → 자르기 순서).
//! 빈 결과는 에러가 아닙니다.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{RetrievalConfig, TimeoutConfig};
use crate::embedding::EmbeddingProvider;
use crate::error::{with_timeout, RagError, Result};
use crate::knowledge::{sort_matches, ChunkMetadata, IndexMatch, MetadataFilter, VectorIndex};

// ============================================================================
// Types
// ============================================================================

/// 검색된 청크 한 건
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    /// 0.0 ~ 1.0, 항상 임계값 이상
    pub score: f32,
}

impl From<IndexMatch> for RetrievedChunk {
    fn from(m: IndexMatch) -> Self {
        Self {
            chunk_id: m.chunk_id,
            text: m.text,
            metadata: m.metadata,
            score: m.score,
        }
    }
}

/// 검색 결과 (점수 내림차순)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievedContext {
    entries: Vec<RetrievedChunk>,
}

impl RetrievedContext {
    /// 이미 점수 내림차순으로 정렬된 항목으로 생성
    pub(crate) fn from_sorted(entries: Vec<RetrievedChunk>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[RetrievedChunk] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RetrievedChunk> {
        self.entries.iter()
    }

    pub fn top_score(&self) -> Option<f32> {
        self.entries.first().map(|e| e.score)
    }

    pub fn into_entries(self) -> Vec<RetrievedChunk> {
        self.entries
    }
}

/// 호출 단위 검색 옵션 (없으면 설정값 사용)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalOptions {
    pub top_k: Option<usize>,
    pub similarity_threshold: Option<f32>,
    pub filter: Option<MetadataFilter>,
}

impl RetrievalOptions {
    pub fn top_k(top_k: usize) -> Self {
        Self {
            top_k: Some(top_k),
            ..Default::default()
        }
    }

    pub fn threshold(similarity_threshold: f32) -> Self {
        Self {
            similarity_threshold: Some(similarity_threshold),
            ..Default::default()
        }
    }
}

// ============================================================================
// ContextRetriever
// ============================================================================

/// 컨텍스트 검색기
pub struct ContextRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    settings: RetrievalConfig,
    timeouts: TimeoutConfig,
}

impl ContextRetriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        settings: RetrievalConfig,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            settings,
            timeouts,
        }
    }

    pub fn settings(&self) -> &RetrievalConfig {
        &self.settings
    }

    /// 설정값으로 검색
    pub async fn retrieve(&self, query: &str) -> Result<RetrievedContext> {
        self.retrieve_with(query, &RetrievalOptions::default()).await
    }

    /// 옵션을 지정하여 검색
    ///
    /// 임베딩/인덱스 에러는 그대로 전달됩니다.
    pub async fn retrieve_with(
        &self,
        query: &str,
        options: &RetrievalOptions,
    ) -> Result<RetrievedContext> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::Validation("query must not be empty".to_string()));
        }

        let top_k = options.top_k.unwrap_or(self.settings.top_k);
        let threshold = options
            .similarity_threshold
            .unwrap_or(self.settings.similarity_threshold);
        if top_k == 0 {
            return Err(RagError::Validation("top_k must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&threshold) {
            return Err(RagError::Validation(format!(
                "similarity_threshold must be within [0, 1], got {}",
                threshold
            )));
        }

        // 1. 질의 임베딩
        let vector = with_timeout(
            "query embedding",
            self.timeouts.embedding(),
            self.embedder.embed_query(query),
        )
        .await?;

        // 2. 후보 검색 (top_k보다 넉넉하게)
        let candidate_k = top_k.saturating_mul(self.settings.candidate_multiplier.max(1));
        let mut candidates = with_timeout(
            "index query",
            self.timeouts.index(),
            self.index.query(&vector, candidate_k, options.filter.as_ref()),
        )
        .await?;
        let candidate_count = candidates.len();

        // 3. 정렬 → 임계값 필터 → 4. top-K
        sort_matches(&mut candidates);
        let entries: Vec<RetrievedChunk> = candidates
            .into_iter()
            .filter(|m| m.score >= threshold)
            .take(top_k)
            .map(RetrievedChunk::from)
            .collect();

        tracing::debug!(
            "Retrieved {} of {} candidates (threshold {:.2}, top_k {})",
            entries.len(),
            candidate_count,
            threshold,
            top_k
        );

        Ok(RetrievedContext::from_sorted(entries))
    }
}

// ============================================================================
// Tests
// ============================================================================
