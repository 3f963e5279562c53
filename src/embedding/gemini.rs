//! Google Gemini 임베딩
//!
//! source: https://ai.google.dev/gemini-api/docs/embeddings

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{RagError, Result};
use crate::http::{build_client, post_json, RateLimiter, MAX_RETRIES};

use super::{check_input, EmbeddingProvider};

/// Gemini API 베이스 URL
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Rate Limiter 설정 (Gemini 무료 티어: 60 RPM)
const RATE_LIMIT_RPM: u32 = 60;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
/// 호출 간 최소 딜레이 (1000ms = 60 RPM 준수)
const MIN_DELAY: Duration = Duration::from_millis(1000);

/// MRL로 지원되는 출력 차원
const SUPPORTED_DIMENSIONS: [usize; 3] = [768, 1536, 3072];

/// Google Gemini 임베딩 구현체
#[derive(Debug)]
pub struct GeminiEmbedding {
    api_key: String,
    client: reqwest::Client,
    model: String,
    dimension: usize,
    max_input_chars: usize,
    rate_limiter: Mutex<RateLimiter>,
}

impl GeminiEmbedding {
    /// 새 Gemini 임베딩 인스턴스 생성
    ///
    /// # Arguments
    /// * `api_key` - Google AI API 키
    /// * `model` - 모델 이름 (예: gemini-embedding-001)
    /// * `dimension` - 임베딩 차원 (768, 1536, 3072 중 선택)
    pub fn new(
        api_key: String,
        model: String,
        dimension: usize,
        max_input_chars: usize,
        timeout: Duration,
    ) -> Result<Self> {
        if !SUPPORTED_DIMENSIONS.contains(&dimension) {
            return Err(RagError::Configuration(format!(
                "Invalid dimension: {}. Must be 768, 1536, or 3072",
                dimension
            )));
        }

        let client = build_client(timeout).map_err(RagError::Configuration)?;

        Ok(Self {
            api_key,
            client,
            model: model.trim_start_matches("models/").to_string(),
            dimension,
            max_input_chars,
            rate_limiter: Mutex::new(RateLimiter::new(RATE_LIMIT_RPM, RATE_LIMIT_WINDOW, MIN_DELAY)),
        })
    }

    fn request(&self, text: &str, task_type: &'static str) -> EmbedRequest {
        EmbedRequest {
            model: format!("models/{}", self.model),
            content: EmbedContent {
                parts: vec![EmbedPart {
                    text: text.to_string(),
                }],
            },
            task_type,
            output_dimensionality: Some(self.dimension),
        }
    }

    async fn embed_with_task(
        &self,
        text: &str,
        task_type: &'static str,
        retries: u32,
    ) -> Result<Vec<f32>> {
        check_input(text, self.max_input_chars)?;

        let url = format!("{}/{}:embedContent", GEMINI_BASE_URL, self.model);
        // API 키는 URL이 아닌 헤더로 전송
        let response: EmbedResponse = post_json(
            &self.client,
            "Gemini embedContent",
            &url,
            &[("x-goog-api-key", self.api_key.as_str())],
            &self.request(text, task_type),
            Some(&self.rate_limiter),
            retries,
        )
        .await
        .map_err(|e| RagError::Embedding(format!("Gemini API error: {}", e)))?;

        let values = response.embedding.values;
        if values.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: values.len(),
            });
        }
        Ok(values)
    }
}

/// Gemini API 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: EmbedContent,
    #[serde(rename = "taskType")]
    task_type: &'static str,
    #[serde(rename = "outputDimensionality", skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EmbedContent {
    parts: Vec<EmbedPart>,
}

#[derive(Debug, Serialize)]
struct EmbedPart {
    text: String,
}

/// Gemini API 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_with_task(text, "RETRIEVAL_DOCUMENT", MAX_RETRIES).await
    }

    /// 질의 임베딩은 재시도하지 않음 (질의당 검색 1회)
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_with_task(text, "RETRIEVAL_QUERY", 0).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // embedContent는 단건 API - Rate limiter가 속도를 조절함
        let mut results = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            tracing::debug!("Embedding batch {}/{}", i + 1, texts.len());
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Tests
// ============================================================================
