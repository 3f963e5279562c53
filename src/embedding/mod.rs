//! 임베딩 모듈 - 텍스트 벡터화
//!
//! 텍스트를 고정 길이 벡터로 변환하는 프로바이더들입니다.
//! 같은 입력에 대해 항상 같은 벡터를 반환해야 합니다 (모델 버전이 같다는 전제).
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = create_embedder(&config.embedding, config.timeouts.embedding())?;
//! let embedding = embedder.embed("Hello, world!").await?;
//! ```

mod gemini;
mod hashing;
mod openai;

pub use gemini::GeminiEmbedding;
pub use hashing::HashingEmbedding;
pub use openai::OpenAIEmbedding;

pub(crate) use hashing::tokenize;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::error::{RagError, Result};

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩 (문서 청크용)
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 검색 질의 임베딩
    ///
    /// 질의/문서 태스크를 구분하는 프로바이더만 재정의합니다.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text).await
    }

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;

    /// 연결 확인 (기본 구현: 짧은 텍스트 임베딩 후 차원 확인)
    async fn ping(&self) -> Result<()> {
        let vector = self.embed_query("ping").await?;
        if vector.len() != self.dimension() {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension(),
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

/// 입력 검사 (네트워크 호출 전)
///
/// 빈 텍스트와 최대 길이를 넘는 텍스트는 `RagError::Embedding`으로 거부합니다.
pub fn check_input(text: &str, max_chars: usize) -> Result<()> {
    if text.trim().is_empty() {
        return Err(RagError::Embedding("cannot embed empty text".to_string()));
    }
    let len = text.chars().count();
    if len > max_chars {
        return Err(RagError::Embedding(format!(
            "input too long: {} chars (limit {})",
            len, max_chars
        )));
    }
    Ok(())
}

// ============================================================================
// API Key Management
// ============================================================================

/// Gemini API 키 로드 (환경변수에서)
///
/// 우선순위:
/// 1. `GEMINI_API_KEY` 환경변수
/// 2. `GOOGLE_AI_API_KEY` 환경변수
pub fn get_api_key() -> Result<String> {
    for var in ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"] {
        if let Ok(key) = std::env::var(var) {
            if !key.is_empty() {
                tracing::debug!("Using API key from {}", var);
                return Ok(key);
            }
        }
    }

    Err(RagError::Configuration(
        "API key not found. Set GEMINI_API_KEY or GOOGLE_AI_API_KEY environment variable.\n\
         Get your API key at: https://aistudio.google.com/app/apikey"
            .to_string(),
    ))
}

/// Gemini API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    get_api_key().is_ok()
}

/// OpenAI API 키 로드
pub fn get_openai_api_key() -> Result<String> {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.is_empty() => Ok(key),
        _ => Err(RagError::Configuration(
            "OPENAI_API_KEY environment variable not set".to_string(),
        )),
    }
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정에 맞는 임베딩 프로바이더 생성
///
/// 자격 증명이 없으면 `RagError::Configuration`을 반환합니다.
pub fn create_embedder(
    config: &EmbeddingConfig,
    timeout: Duration,
) -> Result<Arc<dyn EmbeddingProvider>> {
    let embedder: Arc<dyn EmbeddingProvider> = match config.provider {
        EmbeddingBackend::Gemini => Arc::new(GeminiEmbedding::new(
            get_api_key()?,
            config.model_name(),
            config.dimension(),
            config.max_input_chars,
            timeout,
        )?),
        EmbeddingBackend::OpenAI => Arc::new(OpenAIEmbedding::new(
            get_openai_api_key()?,
            config.model_name(),
            config.dimension(),
            config.max_input_chars,
            timeout,
        )?),
        EmbeddingBackend::Hashing => Arc::new(HashingEmbedding::new(
            config.dimension(),
            config.max_input_chars,
        )?),
    };

    tracing::info!(
        "Using {} embedding (dimension: {})",
        embedder.name(),
        embedder.dimension()
    );
    Ok(embedder)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_input() {
        assert!(check_input("hello", 10).is_ok());
        assert!(matches!(check_input("  ", 10), Err(RagError::Embedding(_))));

        let err = check_input("hello world", 5).unwrap_err();
        assert!(err.to_string().contains("input too long"));
    }

    #[test]
    fn test_check_input_counts_chars() {
        // 멀티바이트 문자는 바이트가 아닌 문자 수로 계산
        assert!(check_input("안녕하세요", 5).is_ok());
    }

    #[tokio::test]
    async fn test_create_hashing_embedder() {
        let config = EmbeddingConfig {
            provider: EmbeddingBackend::Hashing,
            dimension: Some(64),
            ..Default::default()
        };
        let embedder = create_embedder(&config, Duration::from_secs(1)).unwrap();
        assert_eq!(embedder.dimension(), 64);
        assert!(embedder.ping().await.is_ok());
    }
}
