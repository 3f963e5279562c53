//! Answer Generator - 컨텍스트 기반 프롬프트 구성 + 생성 모델 호출
//!
//! 컨텍스트는 검색 순서대로 `Document i:` 블록으로 넣고,
//! `max_context_length`(문자 수)를 넘으면 거기서 멈춥니다.
//! 첫 블록이 예산보다 크면 예산에 맞게 잘라서라도 넣습니다.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::{GenerationConfig, NoContextPolicy};
use crate::error::{with_timeout, Result};
use crate::generation::{GenerationModel, GenerationRequest};

use super::retriever::{RetrievedChunk, RetrievedContext};

/// 컨텍스트 기반 답변용 시스템 지시문
pub const GROUNDED_SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions using only the provided context. \
If the context does not contain the answer, say that you don't know instead of guessing, \
and mention what information would help. Be concise, and cite the document numbers you relied on.";

/// 컨텍스트 없이 답할 때의 시스템 지시문
pub const GENERAL_SYSTEM_PROMPT: &str = "You are a helpful assistant. No reference documents were found for this question. \
Answer from general knowledge, be concise, and say so when you are unsure.";

/// 일반 지식 답변 앞에 붙는 경고
pub const GENERAL_KNOWLEDGE_CAVEAT: &str =
    "I couldn't find this in my knowledge base, so this answer is based on general knowledge:\n\n";

/// 생성 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedAnswer {
    pub answer: String,
    /// 컨텍스트가 프롬프트에 포함되었는지
    pub used_context: bool,
    /// 프롬프트에 포함된 컨텍스트 수 (검색 순서 앞에서부터)
    pub included: usize,
}

/// 예산 내 컨텍스트 블록
struct ContextBlock {
    text: String,
}

/// 답변 생성기
pub struct AnswerGenerator {
    model: Arc<dyn GenerationModel>,
    config: GenerationConfig,
    timeout: Duration,
}

impl AnswerGenerator {
    pub fn new(model: Arc<dyn GenerationModel>, config: GenerationConfig, timeout: Duration) -> Self {
        Self {
            model,
            config,
            timeout,
        }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// 답변 생성
    ///
    /// 빈 컨텍스트는 `NoContextPolicy`에 따라 처리합니다.
    pub async fn generate(&self, query: &str, context: &RetrievedContext) -> Result<GeneratedAnswer> {
        let blocks = self.fit_context(context.entries());

        if blocks.is_empty() {
            return self.generate_without_context(query).await;
        }

        let request = self.grounded_request(query, &blocks);
        let answer = self.call(&request).await?;

        Ok(GeneratedAnswer {
            answer,
            used_context: true,
            included: blocks.len(),
        })
    }

    async fn generate_without_context(&self, query: &str) -> Result<GeneratedAnswer> {
        let answer = match self.config.no_context_policy {
            NoContextPolicy::FixedResponse => self.config.no_context_response.clone(),
            NoContextPolicy::GeneralKnowledge => {
                let request = GenerationRequest {
                    system: GENERAL_SYSTEM_PROMPT.to_string(),
                    prompt: format!("Question: {}", query),
                    question: query.to_string(),
                    passages: vec![],
                    max_tokens: self.config.max_tokens,
                    temperature: self.config.temperature,
                };
                format!("{}{}", GENERAL_KNOWLEDGE_CAVEAT, self.call(&request).await?)
            }
        };

        Ok(GeneratedAnswer {
            answer,
            used_context: false,
            included: 0,
        })
    }

    async fn call(&self, request: &GenerationRequest) -> Result<String> {
        with_timeout("generation", self.timeout, self.model.generate(request)).await
    }

    /// 예산 내 컨텍스트 블록 선택 (검색 순서 유지)
    fn fit_context(&self, entries: &[RetrievedChunk]) -> Vec<ContextBlock> {
        let budget = self.config.max_context_length;
        let mut used = 0;
        let mut blocks = Vec::new();

        for entry in entries {
            let text = entry.text.trim();
            if text.is_empty() {
                continue;
            }

            let len = text.chars().count();
            if used + len <= budget {
                used += len;
                blocks.push(ContextBlock {
                    text: text.to_string(),
                });
            } else if blocks.is_empty() {
                blocks.push(ContextBlock {
                    text: text.chars().take(budget).collect(),
                });
                break;
            } else {
                break;
            }
        }

        blocks
    }

    fn grounded_request(&self, query: &str, blocks: &[ContextBlock]) -> GenerationRequest {
        let context = blocks
            .iter()
            .enumerate()
            .map(|(i, b)| format!("Document {}:\n{}\n", i + 1, b.text))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Context:\n{}\nQuestion: {}\n\nAnswer the question using the context above.",
            context, query
        );

        GenerationRequest {
            system: GROUNDED_SYSTEM_PROMPT.to_string(),
            prompt,
            question: query.to_string(),
            passages: blocks.iter().map(|b| b.text.clone()).collect(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
