//! OpenAI Chat Completions (`POST /v1/chat/completions`)

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::http::{build_client, post_json};

use super::{GenerationModel, GenerationRequest};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI 채팅 모델
#[derive(Debug)]
pub struct OpenAIChat {
    api_key: String,
    client: reqwest::Client,
    model: String,
}

impl OpenAIChat {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self> {
        let client = build_client(timeout).map_err(RagError::Configuration)?;
        Ok(Self {
            api_key,
            client,
            model,
        })
    }

    fn body<'a>(&'a self, request: &'a GenerationRequest) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if !request.system.is_empty() {
            messages.push(Message {
                role: "system",
                content: &request.system,
            });
        }
        messages.push(Message {
            role: "user",
            content: &request.prompt,
        });

        ChatRequest {
            model: &self.model,
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }
}

#[async_trait]
impl GenerationModel for OpenAIChat {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let bearer = format!("Bearer {}", self.api_key);

        let response: ChatResponse = post_json(
            &self.client,
            "OpenAI chat",
            OPENAI_CHAT_URL,
            &[("Authorization", bearer.as_str())],
            &self.body(request),
            None,
            0,
        )
        .await
        .map_err(|e| RagError::Generation(format!("OpenAI API error: {}", e)))?;

        let answer = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        if answer.is_empty() {
            return Err(RagError::Generation("OpenAI returned an empty answer".to_string()));
        }
        Ok(answer)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}
