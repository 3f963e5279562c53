//! Vector Index - 벡터 인덱스 트레이트 및 유틸리티
//!
//! 인덱스는 검색 가능한 청크의 유일한 원본입니다.
//! 파이프라인은 별도의 캐시를 두지 않습니다.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

use super::document::{Chunk, ChunkMetadata};

// ============================================================================
// Types
// ============================================================================

/// 검색 결과 (인덱스 한 건)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMatch {
    pub chunk_id: String,
    /// 코사인 유사도 (0.0 ~ 1.0로 클램프됨)
    pub score: f32,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// 메타데이터 필터 (모든 조건 AND)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub document_id: Option<String>,
    pub source: Option<String>,
    pub category: Option<String>,
}

impl MetadataFilter {
    pub fn by_document(document_id: impl Into<String>) -> Self {
        Self {
            document_id: Some(document_id.into()),
            ..Default::default()
        }
    }

    pub fn by_source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Default::default()
        }
    }

    pub fn by_category(category: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.document_id.is_none() && self.source.is_none() && self.category.is_none()
    }

    /// 메타데이터가 필터 조건을 만족하는지
    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        let eq = |cond: &Option<String>, value: &str| cond.as_deref().map_or(true, |c| c == value);

        eq(&self.document_id, &metadata.document_id)
            && eq(&self.source, &metadata.source)
            && eq(&self.category, &metadata.category)
    }
}

/// 인덱스 통계
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    /// 저장된 청크 수
    pub count: usize,
    /// 벡터 차원
    pub dimension: usize,
    /// 백엔드 이름
    pub backend: String,
}

// ============================================================================
// VectorIndex Trait
// ============================================================================

/// 벡터 인덱스 트레이트 (async)
///
/// 구현체는 차원이 다른 벡터를 `RagError::DimensionMismatch`로 거부해야 하고,
/// 연결 실패는 `RagError::IndexUnavailable`로 보고해야 합니다.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// 청크 배치 upsert (같은 chunk_id는 덮어씀)
    async fn upsert(&self, chunks: &[Chunk]) -> Result<usize>;

    /// 유사도 내림차순 top-K 검색
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<IndexMatch>>;

    /// chunk_id로 삭제
    async fn delete(&self, chunk_id: &str) -> Result<bool>;

    /// 문서의 모든 청크 삭제
    async fn delete_by_document(&self, document_id: &str) -> Result<usize>;

    /// 통계 조회
    async fn stats(&self) -> Result<IndexStats>;

    /// 인덱스 생성 시 고정된 벡터 차원
    fn dimension(&self) -> usize;

    /// 백엔드 이름
    fn name(&self) -> &str;

    /// 연결 확인 (기본 구현: stats 호출)
    async fn ping(&self) -> Result<()> {
        self.stats().await.map(|_| ())
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 벡터 차원 검사
pub fn check_dimension(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(RagError::DimensionMismatch { expected, actual });
    }
    Ok(())
}

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// 원시 유사도를 [0, 1]로 클램프 (NaN은 0)
pub fn clamp_score(raw: f32) -> f32 {
    if raw.is_nan() {
        0.0
    } else {
        raw.clamp(0.0, 1.0)
    }
}

/// 점수 내림차순 정렬 (동점은 chunk_id 오름차순)
pub fn sort_matches(matches: &mut [IndexMatch]) {
    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(doc: &str, source: &str, category: &str) -> ChunkMetadata {
        ChunkMetadata {
            document_id: doc.to_string(),
            title: "t".to_string(),
            source: source.to_string(),
            category: category.to_string(),
        }
    }

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_mismatched_or_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_clamp_score() {
        assert_eq!(clamp_score(-0.4), 0.0);
        assert_eq!(clamp_score(1.2), 1.0);
        assert_eq!(clamp_score(f32::NAN), 0.0);
        assert!((clamp_score(0.42) - 0.42).abs() < f32::EPSILON);
    }

    #[test]
    fn test_check_dimension() {
        assert!(check_dimension(3, 3).is_ok());
        assert!(matches!(
            check_dimension(3, 4),
            Err(RagError::DimensionMismatch { expected: 3, actual: 4 })
        ));
    }

    #[test]
    fn test_filter_matches() {
        let meta = metadata("doc-1", "wiki", "AI");

        assert!(MetadataFilter::default().matches(&meta));
        assert!(MetadataFilter::by_category("AI").matches(&meta));
        assert!(!MetadataFilter::by_category("Nepal").matches(&meta));

        let both = MetadataFilter {
            source: Some("wiki".to_string()),
            document_id: Some("doc-2".to_string()),
            category: None,
        };
        assert!(!both.matches(&meta));
    }

    #[test]
    fn test_sort_matches_descending() {
        let m = |id: &str, score: f32| IndexMatch {
            chunk_id: id.to_string(),
            score,
            text: String::new(),
            metadata: ChunkMetadata::default(),
        };
        let mut matches = vec![m("b", 0.5), m("a", 0.9), m("c", 0.5)];
        sort_matches(&mut matches);

        let ids: Vec<&str> = matches.iter().map(|m| m.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
