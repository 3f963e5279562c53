//! 메모리 벡터 인덱스 - 프로세스 내 브루트포스 코사인 검색
//!
//! 테스트와 단발성 실행용입니다. 프로세스가 끝나면 내용이 사라집니다.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{RagError, Result};

use super::document::Chunk;
use super::vector::{
    check_dimension, clamp_score, cosine_similarity, sort_matches, IndexMatch, IndexStats,
    MetadataFilter, VectorIndex,
};

/// 메모리 벡터 인덱스
#[derive(Debug)]
pub struct MemoryVectorIndex {
    dimension: usize,
    chunks: RwLock<HashMap<String, Chunk>>,
}

impl MemoryVectorIndex {
    /// 차원을 지정하여 생성
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            chunks: RwLock::new(HashMap::new()),
        }
    }

    /// chunk_id 순으로 정렬된 전체 청크 복사본
    pub fn snapshot(&self) -> Result<Vec<Chunk>> {
        let chunks = self.chunks.read().map_err(lock_error)?;
        let mut all: Vec<Chunk> = chunks.values().cloned().collect();
        all.sort_by(|a, b| a.chunk_id.cmp(&b.chunk_id));
        Ok(all)
    }
}

fn lock_error<T>(e: std::sync::PoisonError<T>) -> RagError {
    RagError::IndexUnavailable(format!("Lock error: {}", e))
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, chunks: &[Chunk]) -> Result<usize> {
        // 하나라도 차원이 다르면 전체 거부
        for chunk in chunks {
            check_dimension(self.dimension, chunk.embedding.len())?;
        }

        let mut stored = self.chunks.write().map_err(lock_error)?;
        for chunk in chunks {
            stored.insert(chunk.chunk_id.clone(), chunk.clone());
        }
        Ok(chunks.len())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<IndexMatch>> {
        check_dimension(self.dimension, vector.len())?;

        let stored = self.chunks.read().map_err(lock_error)?;
        let mut matches: Vec<IndexMatch> = stored
            .values()
            .filter(|c| filter.map_or(true, |f| f.matches(&c.metadata)))
            .map(|c| IndexMatch {
                chunk_id: c.chunk_id.clone(),
                score: clamp_score(cosine_similarity(vector, &c.embedding)),
                text: c.text.clone(),
                metadata: c.metadata.clone(),
            })
            .collect();

        sort_matches(&mut matches);
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete(&self, chunk_id: &str) -> Result<bool> {
        let mut stored = self.chunks.write().map_err(lock_error)?;
        Ok(stored.remove(chunk_id).is_some())
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize> {
        let mut stored = self.chunks.write().map_err(lock_error)?;
        let before = stored.len();
        stored.retain(|_, c| c.metadata.document_id != document_id);
        Ok(before - stored.len())
    }

    async fn stats(&self) -> Result<IndexStats> {
        let stored = self.chunks.read().map_err(lock_error)?;
        Ok(IndexStats {
            count: stored.len(),
            dimension: self.dimension,
            backend: self.name().to_string(),
        })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::document::{chunk_id, ChunkMetadata};

    fn chunk(doc: &str, index: usize, embedding: Vec<f32>, category: &str) -> Chunk {
        Chunk {
            chunk_id: chunk_id(doc, index),
            text: format!("chunk {} of {}", index, doc),
            embedding,
            metadata: ChunkMetadata {
                document_id: doc.to_string(),
                title: doc.to_uppercase(),
                source: "test".to_string(),
                category: category.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let index = MemoryVectorIndex::new(2);
        index.upsert(&[chunk("a", 0, vec![1.0, 0.0], "x")]).await.unwrap();
        index.upsert(&[chunk("a", 0, vec![0.0, 1.0], "x")]).await.unwrap();

        assert_eq!(index.stats().await.unwrap().count, 1);
        assert_eq!(index.snapshot().unwrap()[0].embedding, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_rejects_dimension_mismatch() {
        let index = MemoryVectorIndex::new(3);
        let err = index.upsert(&[chunk("a", 0, vec![1.0, 0.0], "x")]).await.unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { expected: 3, actual: 2 }));

        let err = index.query(&[1.0], 5, None).await.unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { .. }));
        assert_eq!(index.stats().await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_query_orders_and_filters() {
        let index = MemoryVectorIndex::new(2);
        index
            .upsert(&[
                chunk("a", 0, vec![1.0, 0.0], "AI"),
                chunk("b", 0, vec![0.7, 0.7], "AI"),
                chunk("c", 0, vec![0.0, 1.0], "Nepal"),
                chunk("d", 0, vec![-1.0, 0.0], "AI"),
            ])
            .await
            .unwrap();

        let results = index.query(&[1.0, 0.0], 10, None).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|m| m.chunk_id.as_str()).collect();
        assert_eq!(ids[0], "a#0");
        assert_eq!(ids[1], "b#0");
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        // 음수 코사인은 0으로 클램프
        assert!(results.iter().all(|m| (0.0..=1.0).contains(&m.score)));

        let filter = MetadataFilter::by_category("Nepal");
        let results = index.query(&[1.0, 0.0], 10, Some(&filter)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "c#0");

        let results = index.query(&[1.0, 0.0], 2, None).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_by_document() {
        let index = MemoryVectorIndex::new(2);
        index
            .upsert(&[
                chunk("a", 0, vec![1.0, 0.0], "x"),
                chunk("a", 1, vec![1.0, 0.0], "x"),
                chunk("b", 0, vec![1.0, 0.0], "x"),
            ])
            .await
            .unwrap();

        assert_eq!(index.delete_by_document("a").await.unwrap(), 2);
        assert!(index.delete("b#0").await.unwrap());
        assert!(!index.delete("b#0").await.unwrap());
        assert_eq!(index.stats().await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_empty_index_query() {
        let index = MemoryVectorIndex::new(2);
        assert!(index.query(&[1.0, 0.0], 5, None).await.unwrap().is_empty());
        assert!(index.ping().await.is_ok());
    }
}
