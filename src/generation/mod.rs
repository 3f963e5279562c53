//! 생성 모듈 - 프롬프트 → 답변 텍스트
//!
//! 모델 백엔드만 담당합니다. 프롬프트 구성과 컨텍스트 예산은 `rag::generator`에 있습니다.

mod extractive;
mod gemini;
mod openai;

pub use extractive::ExtractiveGenerator;
pub use gemini::GeminiGeneration;
pub use openai::OpenAIChat;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::{GenerationBackend, GenerationConfig};
use crate::embedding::{get_api_key, get_openai_api_key};
use crate::error::Result;

/// 생성 요청
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    /// 시스템 지시문
    pub system: String,
    /// 사용자 프롬프트 (컨텍스트 + 질문)
    pub prompt: String,
    /// 원래 질문
    pub question: String,
    /// 프롬프트에 포함된 컨텍스트 본문 (순서 유지)
    pub passages: Vec<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// 생성 모델 트레이트
///
/// 실패는 `RagError::Generation`으로 보고합니다.
#[async_trait]
pub trait GenerationModel: Send + Sync {
    /// 답변 생성
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    /// 모델 이름
    fn name(&self) -> &str;
}

/// 설정에 맞는 생성 모델 생성
pub fn create_generator(
    config: &GenerationConfig,
    timeout: Duration,
) -> Result<Arc<dyn GenerationModel>> {
    let model: Arc<dyn GenerationModel> = match config.provider {
        GenerationBackend::Gemini => Arc::new(GeminiGeneration::new(
            get_api_key()?,
            config.model_name(),
            timeout,
        )?),
        GenerationBackend::OpenAI => Arc::new(OpenAIChat::new(
            get_openai_api_key()?,
            config.model_name(),
            timeout,
        )?),
        GenerationBackend::Extractive => Arc::new(ExtractiveGenerator::default()),
    };

    tracing::info!("Using {} for generation", model.name());
    Ok(model)
}
