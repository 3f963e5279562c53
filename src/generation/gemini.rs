//! Gemini 생성 모델 (`generateContent`)
//!
//! source: https://ai.google.dev/api/generate-content

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::http::{build_client, post_json};

use super::{GenerationModel, GenerationRequest};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Gemini 생성 모델
#[derive(Debug)]
pub struct GeminiGeneration {
    api_key: String,
    client: reqwest::Client,
    model: String,
}

impl GeminiGeneration {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self> {
        let client = build_client(timeout).map_err(RagError::Configuration)?;
        Ok(Self {
            api_key,
            client,
            model: model.trim_start_matches("models/").to_string(),
        })
    }

    fn body(request: &GenerationRequest) -> GenerateRequest {
        GenerateRequest {
            system_instruction: (!request.system.is_empty()).then(|| Content {
                role: None,
                parts: vec![Part {
                    text: request.system.clone(),
                }],
            }),
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: request.prompt.clone(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            },
        }
    }
}

/// 응답에서 답변 텍스트 추출
fn extract_answer(response: GenerateResponse) -> Result<String> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(RagError::Generation(format!("prompt blocked: {}", reason)));
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| RagError::Generation("Gemini returned no candidates".to_string()))?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().map(|p| p.text).collect::<Vec<_>>().join(""))
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(RagError::Generation(format!(
            "Gemini returned an empty answer (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        )));
    }

    Ok(text.trim().to_string())
}

#[async_trait]
impl GenerationModel for GeminiGeneration {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let url = format!("{}/{}:generateContent", GEMINI_BASE_URL, self.model);

        let response: GenerateResponse = post_json(
            &self.client,
            "Gemini generateContent",
            &url,
            &[("x-goog-api-key", self.api_key.as_str())],
            &Self::body(request),
            None,
            0,
        )
        .await
        .map_err(|e| RagError::Generation(format!("Gemini API error: {}", e)))?;

        extract_answer(response)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest {
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback", default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason", default)]
    block_reason: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================
