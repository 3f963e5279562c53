//! RAG Pipeline - 질의 한 건의 오케스트레이션
//!
//! ```text
//! Received → Retrieving → ContextFound | NoContext → Generating → Responded
//!                 └──────────────┴──────────────────────┴──→ Failed
//! ```
//!
//! 질의당 검색은 정확히 한 번, 생성은 최대 한 번입니다.
//! 오케스트레이터는 재시도하지 않고 컴포넌트 에러를 그대로 돌려줍니다.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::config::RagConfig;
use crate::embedding::{create_embedder, EmbeddingProvider};
use crate::error::{with_timeout, RagError, Result};
use crate::generation::{create_generator, GenerationModel};
use crate::ingest::{AddDocumentsReport, Ingestor};
use crate::knowledge::{
    create_chunker, open_index, Chunker, DocumentCatalog, NewDocument, VectorIndex,
};

use super::generator::AnswerGenerator;
use super::retriever::{ContextRetriever, RetrievalOptions, RetrievedChunk};

// ============================================================================
// Types
// ============================================================================

/// 질의 처리 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatStage {
    Received,
    Retrieving,
    ContextFound,
    NoContext,
    Generating,
    Responded,
    Failed,
}

impl fmt::Display for ChatStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChatStage::Received => "RECEIVED",
            ChatStage::Retrieving => "RETRIEVING",
            ChatStage::ContextFound => "CONTEXT_FOUND",
            ChatStage::NoContext => "NO_CONTEXT",
            ChatStage::Generating => "GENERATING",
            ChatStage::Responded => "RESPONDED",
            ChatStage::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// 답변 근거 (프롬프트에 실제로 포함된 컨텍스트)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub chunk_id: String,
    pub document_id: String,
    pub title: String,
    pub source: String,
    pub score: f32,
}

impl From<&RetrievedChunk> for Source {
    fn from(chunk: &RetrievedChunk) -> Self {
        Self {
            chunk_id: chunk.chunk_id.clone(),
            document_id: chunk.metadata.document_id.clone(),
            title: chunk.metadata.title.clone(),
            source: chunk.metadata.source.clone(),
            score: chunk.score,
        }
    }
}

/// 채팅 응답
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<Source>,
    /// false면 "관련 정보 없음" 응답
    pub used_context: bool,
}

/// 지식 베이스 통계
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeBaseStats {
    pub chunk_count: usize,
    pub dimension: usize,
    pub index_backend: String,
    pub embedding_model: String,
    pub generation_model: String,
    /// 카탈로그가 연결된 경우에만
    pub document_count: Option<usize>,
}

/// 헬스 체크 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl HealthStatus {
    fn ready() -> Self {
        Self {
            ready: true,
            reason: None,
        }
    }

    fn not_ready(reason: impl Into<String>) -> Self {
        Self {
            ready: false,
            reason: Some(reason.into()),
        }
    }
}

// ============================================================================
// RagPipeline
// ============================================================================

/// RAG 파이프라인
///
/// 모든 의존성은 생성 시 주입되며, 요청 간 공유되는 가변 상태는 없습니다.
pub struct RagPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    retriever: ContextRetriever,
    generator: AnswerGenerator,
    ingestor: Ingestor,
    config: RagConfig,
}

impl RagPipeline {
    /// 파이프라인 생성
    ///
    /// 설정이 잘못되었으면 `RagError::Configuration`으로 즉시 실패합니다.
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        model: Arc<dyn GenerationModel>,
        config: RagConfig,
    ) -> Result<Self> {
        config.validate()?;

        let chunker: Arc<dyn Chunker> = Arc::from(create_chunker(&config.chunking)?);
        let ingestor = Ingestor::new(
            embedder.clone(),
            index.clone(),
            chunker,
            config.timeouts.clone(),
            config.ingest.concurrency,
        );
        let retriever = ContextRetriever::new(
            embedder.clone(),
            index.clone(),
            config.retrieval.clone(),
            config.timeouts.clone(),
        );
        let generator = AnswerGenerator::new(
            model,
            config.generation.clone(),
            config.timeouts.generation(),
        );

        Ok(Self {
            embedder,
            index,
            retriever,
            generator,
            ingestor,
            config,
        })
    }

    /// 설정의 백엔드로 모든 컴포넌트를 만들어 파이프라인 생성
    pub async fn from_config(config: RagConfig) -> Result<Self> {
        config.validate()?;
        config.check_credentials()?;

        let embedder = create_embedder(&config.embedding, config.timeouts.embedding())?;
        let index = open_index(&config, embedder.dimension()).await?;
        let model = create_generator(&config.generation, config.timeouts.generation())?;

        Self::new(embedder, index, model, config)
    }

    /// 문서 카탈로그 연결
    pub fn with_catalog(mut self, catalog: Arc<DocumentCatalog>) -> Self {
        self.ingestor = self.ingestor.with_catalog(catalog);
        self
    }

    /// 내용이 바뀌지 않은 문서는 재수집하지 않음 (카탈로그 필요)
    pub fn skip_unchanged(mut self, skip: bool) -> Self {
        self.ingestor = self.ingestor.skip_unchanged(skip);
        self
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn catalog(&self) -> Option<&Arc<DocumentCatalog>> {
        self.ingestor.catalog()
    }

    // ========================================================================
    // Chat
    // ========================================================================

    /// 질문에 답변
    pub async fn chat(&self, message: &str) -> Result<ChatResponse> {
        self.chat_with(message, &RetrievalOptions::default()).await
    }

    /// 검색 옵션을 지정하여 답변
    pub async fn chat_with(&self, message: &str, options: &RetrievalOptions) -> Result<ChatResponse> {
        let result = self.run(message, options).await;

        match &result {
            Ok(response) => {
                transition(ChatStage::Responded);
                tracing::info!(
                    "Answered with {} sources (used_context: {})",
                    response.sources.len(),
                    response.used_context
                );
            }
            Err(e) => {
                tracing::error!("Stage {}: chat failed [{}]: {}", ChatStage::Failed, e.code(), e);
            }
        }

        result
    }

    async fn run(&self, message: &str, options: &RetrievalOptions) -> Result<ChatResponse> {
        transition(ChatStage::Received);

        transition(ChatStage::Retrieving);
        let context = self.retriever.retrieve_with(message, options).await?;

        if context.is_empty() {
            transition(ChatStage::NoContext);
        } else {
            transition(ChatStage::ContextFound);
        }

        transition(ChatStage::Generating);
        let generated = self.generator.generate(message.trim(), &context).await?;

        let sources = context
            .iter()
            .take(generated.included)
            .map(Source::from)
            .collect();

        Ok(ChatResponse {
            answer: generated.answer,
            sources,
            used_context: generated.used_context,
        })
    }

    // ========================================================================
    // Knowledge Base
    // ========================================================================

    /// 문서 추가 (문서별 성공/실패 보고)
    pub async fn add_documents(&self, docs: Vec<NewDocument>) -> AddDocumentsReport {
        self.ingestor.add_documents(docs).await
    }

    /// 문서 삭제, 삭제된 청크 수 반환
    pub async fn delete_document(&self, document_id: &str) -> Result<usize> {
        self.ingestor.delete_document(document_id).await
    }

    /// source가 같은 문서 모두 삭제 (카탈로그 필요)
    pub async fn delete_by_source(&self, source: &str) -> Result<Vec<String>> {
        self.ingestor.delete_by_source(source).await
    }

    /// 지식 베이스 통계
    pub async fn stats(&self) -> Result<KnowledgeBaseStats> {
        let index_stats = with_timeout("index stats", self.config.timeouts.index(), self.index.stats())
            .await?;

        let document_count = match self.catalog() {
            Some(catalog) => match catalog.stats() {
                Ok(s) => Some(s.document_count),
                Err(e) => {
                    tracing::warn!("Catalog stats unavailable: {:#}", e);
                    None
                }
            },
            None => None,
        };

        Ok(KnowledgeBaseStats {
            chunk_count: index_stats.count,
            dimension: index_stats.dimension,
            index_backend: index_stats.backend,
            embedding_model: self.embedder.name().to_string(),
            generation_model: self.generator.model_name().to_string(),
            document_count,
        })
    }

    /// 준비 상태 확인
    ///
    /// 임베딩 프로바이더와 인덱스가 응답하고, 두 차원이 같아야 ready입니다.
    pub async fn health(&self) -> HealthStatus {
        let timeouts = &self.config.timeouts;

        if let Err(e) = with_timeout("embedding ping", timeouts.embedding(), self.embedder.ping()).await {
            tracing::warn!("Embedding provider not ready: {}", e);
            return HealthStatus::not_ready(format!("embedding provider unreachable: {}", e));
        }

        let stats = match with_timeout("index stats", timeouts.index(), self.index.stats()).await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!("Vector index not ready: {}", e);
                return HealthStatus::not_ready(format!("vector index unreachable: {}", e));
            }
        };

        if stats.dimension != self.embedder.dimension() {
            let mismatch = RagError::DimensionMismatch {
                expected: stats.dimension,
                actual: self.embedder.dimension(),
            };
            tracing::warn!("Not ready: {}", mismatch);
            return HealthStatus::not_ready(mismatch.to_string());
        }

        HealthStatus::ready()
    }
}

fn transition(stage: ChatStage) {
    tracing::debug!("Stage {}", stage);
}

// ============================================================================
// Tests
// ============================================================================
