//! OpenAI 임베딩 (`POST /v1/embeddings`)
//!
//! ref: https://platform.openai.com/docs/api-reference/embeddings

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::http::{build_client, post_json, MAX_RETRIES};

use super::{check_input, EmbeddingProvider};

const OPENAI_EMBED_URL: &str = "https://api.openai.com/v1/embeddings";

/// 한 요청에 보낼 최대 입력 수
const MAX_BATCH_INPUTS: usize = 96;

/// OpenAI 임베딩 구현체
#[derive(Debug)]
pub struct OpenAIEmbedding {
    api_key: String,
    client: reqwest::Client,
    model: String,
    dimension: usize,
    max_input_chars: usize,
}

impl OpenAIEmbedding {
    pub fn new(
        api_key: String,
        model: String,
        dimension: usize,
        max_input_chars: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let client = build_client(timeout).map_err(RagError::Configuration)?;
        Ok(Self {
            api_key,
            client,
            model,
            dimension,
            max_input_chars,
        })
    }

    /// text-embedding-3 계열만 `dimensions` 파라미터를 받음
    fn request<'a>(&'a self, input: &'a [&'a str]) -> EmbeddingsRequest<'a> {
        let dimensions = self
            .model
            .starts_with("text-embedding-3")
            .then_some(self.dimension);
        EmbeddingsRequest {
            model: &self.model,
            input,
            dimensions,
        }
    }

    async fn call(&self, input: &[&str], retries: u32) -> Result<Vec<Vec<f32>>> {
        let bearer = format!("Bearer {}", self.api_key);
        let response: EmbeddingsResponse = post_json(
            &self.client,
            "OpenAI embeddings",
            OPENAI_EMBED_URL,
            &[("Authorization", bearer.as_str())],
            &self.request(input),
            None,
            retries,
        )
        .await
        .map_err(|e| RagError::Embedding(format!("OpenAI API error: {}", e)))?;

        let mut data = response.data;
        if data.len() != input.len() {
            return Err(RagError::Embedding(format!(
                "OpenAI returned {} embeddings for {} inputs",
                data.len(),
                input.len()
            )));
        }
        // 응답 순서는 index 필드 기준
        data.sort_by_key(|d| d.index);

        let mut vectors = Vec::with_capacity(data.len());
        for item in data {
            if item.embedding.len() != self.dimension {
                return Err(RagError::DimensionMismatch {
                    expected: self.dimension,
                    actual: item.embedding.len(),
                });
            }
            vectors.push(item.embedding);
        }
        Ok(vectors)
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        check_input(text, self.max_input_chars)?;
        self.call(&[text], MAX_RETRIES)
            .await?
            .pop()
            .ok_or_else(|| RagError::Embedding("OpenAI returned no embedding".to_string()))
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        check_input(text, self.max_input_chars)?;
        self.call(&[text], 0)
            .await?
            .pop()
            .ok_or_else(|| RagError::Embedding("OpenAI returned no embedding".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        for text in texts {
            check_input(text, self.max_input_chars)?;
        }

        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(MAX_BATCH_INPUTS) {
            let input: Vec<&str> = batch.iter().map(String::as_str).collect();
            results.extend(self.call(&input, MAX_RETRIES).await?);
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

#[cfg(test)]
mod tests {
    use super::*;

    fn embedder(model: &str, dimension: usize) -> OpenAIEmbedding {
        OpenAIEmbedding::new(
            "fake_key".to_string(),
            model.to_string(),
            dimension,
            8000,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_request_omits_dimensions_for_ada() {
        let embedder = embedder("text-embedding-ada-002", 1536);
        let json = serde_json::to_value(embedder.request(&["a", "b"])).unwrap();
        assert_eq!(json["model"], "text-embedding-ada-002");
        assert_eq!(json["input"][1], "b");
        assert!(json.get("dimensions").is_none());
    }

    #[test]
    fn test_request_sets_dimensions_for_v3() {
        let embedder = embedder("text-embedding-3-small", 512);
        let json = serde_json::to_value(embedder.request(&["a"])).unwrap();
        assert_eq!(json["dimensions"], 512);
    }

    #[test]
    fn test_parse_response() {
        let body = r#"{"object": "list", "data": [
            {"object": "embedding", "index": 1, "embedding": [0.3, 0.4]},
            {"object": "embedding", "index": 0, "embedding": [0.1, 0.2]}
        ], "model": "text-embedding-ada-002"}"#;
        let mut response: EmbeddingsResponse = serde_json::from_str(body).unwrap();
        response.data.sort_by_key(|d| d.index);
        assert_eq!(response.data[0].embedding, vec![0.1, 0.2]);
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let embedder = embedder("text-embedding-ada-002", 1536);
        let err = embedder.embed("").await.unwrap_err();
        assert!(matches!(err, RagError::Embedding(_)));
    }
}
