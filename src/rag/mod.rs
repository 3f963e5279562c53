//! RAG 모듈 - 검색 → 프롬프트 구성 → 생성
//!
//! - ContextRetriever: 질의 임베딩, 후보 검색, 임계값 필터, top-K
//! - AnswerGenerator: 컨텍스트 예산 내 프롬프트 구성, 컨텍스트 없음 정책
//! - RagPipeline: 질의 한 건의 단계 전이와 지식 베이스 관리

mod generator;
mod pipeline;
mod retriever;

pub use generator::{
    AnswerGenerator, GeneratedAnswer, GENERAL_KNOWLEDGE_CAVEAT, GENERAL_SYSTEM_PROMPT,
    GROUNDED_SYSTEM_PROMPT,
};
pub use pipeline::{ChatResponse, ChatStage, HealthStatus, KnowledgeBaseStats, RagPipeline, Source};
pub use retriever::{ContextRetriever, RetrievalOptions, RetrievedChunk, RetrievedContext};
