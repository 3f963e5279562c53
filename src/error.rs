//! 에러 타입 - RAG 파이프라인 전 구간의 타입 있는 실패
//!
//! 각 컴포넌트는 자신의 실패를 아래 변형 중 하나로 올려보내고,
//! 오케스트레이터는 이를 그대로 호출자에게 전달합니다.
//! "관련 정보 없음"은 에러가 아니라 정상 응답(`used_context == false`)입니다.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// RAG 파이프라인 에러
#[derive(Error, Debug)]
pub enum RagError {
    /// 임베딩 프로바이더 실패 (네트워크, 입력 크기, rate limit)
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// 벡터 인덱스 연결 실패
    #[error("Vector index unavailable: {0}")]
    IndexUnavailable(String),

    /// 벡터 차원 불일치 (스키마 드리프트)
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// 생성 모델 서비스 실패
    #[error("Generation error: {0}")]
    Generation(String),

    /// 잘못된 설정 또는 누락된 자격 증명
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 잘못된 문서/입력
    #[error("Validation error: {0}")]
    Validation(String),

    /// 네트워크 호출 타임아웃
    #[error("{operation} timed out after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },
}

impl RagError {
    /// 호출자용 안정적인 에러 코드
    pub fn code(&self) -> &'static str {
        match self {
            RagError::Embedding(_) => "embedding_error",
            RagError::IndexUnavailable(_) => "index_unavailable",
            RagError::DimensionMismatch { .. } => "dimension_mismatch",
            RagError::Generation(_) => "generation_error",
            RagError::Configuration(_) => "configuration_error",
            RagError::Validation(_) => "validation_error",
            RagError::Timeout { .. } => "timeout",
        }
    }

    /// 재시도하면 성공할 가능성이 있는 에러인지
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RagError::Embedding(_)
                | RagError::IndexUnavailable(_)
                | RagError::Generation(_)
                | RagError::Timeout { .. }
        )
    }
}

/// 파이프라인 Result 별칭
pub type Result<T> = std::result::Result<T, RagError>;

/// 타임아웃을 적용하여 future 실행
///
/// 시간 초과 시 `RagError::Timeout`을 반환합니다.
/// future가 드롭되므로 진행 중인 네트워크 호출도 함께 취소됩니다.
pub async fn with_timeout<T, F>(operation: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!("{} timed out after {:?}", operation, limit);
            Err(RagError::Timeout {
                operation: operation.to_string(),
                duration_ms: limit.as_millis() as u64,
            })
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RagError::DimensionMismatch {
            expected: 768,
            actual: 384,
        };
        assert!(err.to_string().contains("768"));
        assert!(err.to_string().contains("384"));
        assert_eq!(err.code(), "dimension_mismatch");
    }

    #[test]
    fn test_transient_errors() {
        assert!(RagError::Embedding("429".to_string()).is_transient());
        assert!(!RagError::Validation("empty title".to_string()).is_transient());
        assert!(!RagError::Configuration("bad".to_string()).is_transient());
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result: Result<()> = with_timeout("slow call", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match result {
            Err(RagError::Timeout {
                operation,
                duration_ms,
            }) => {
                assert_eq!(operation, "slow call");
                assert_eq!(duration_ms, 10);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_with_timeout_passes_through() {
        let result = with_timeout("fast call", Duration::from_secs(1), async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }
}
