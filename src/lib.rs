//! rag-chatbot - 검색 증강 생성(RAG) 챗봇 파이프라인
//!
//! 문서를 청크로 나눠 임베딩하고 벡터 인덱스에 저장한 뒤,
//! 질문과 가까운 청크만 근거로 삼아 답변을 생성합니다.
//! 근거가 없으면 지어내지 않고 "관련 정보 없음"으로 답합니다.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod generation;
mod http;
pub mod ingest;
pub mod knowledge;
pub mod rag;

// Re-exports
pub use config::{get_data_dir, NoContextPolicy, RagConfig};
pub use embedding::{create_embedder, get_api_key, has_api_key, EmbeddingProvider, HashingEmbedding};
pub use error::{RagError, Result};
pub use generation::{create_generator, ExtractiveGenerator, GenerationModel, GenerationRequest};
pub use ingest::{AddDocumentsReport, IngestReport, Ingestor};
pub use knowledge::{
    open_index, Chunk, ChunkMetadata, Document, DocumentCatalog, IndexMatch, MemoryVectorIndex,
    MetadataFilter, NewDocument, VectorIndex,
};
pub use rag::{
    ChatResponse, ContextRetriever, HealthStatus, KnowledgeBaseStats, RagPipeline,
    RetrievalOptions, RetrievedContext,
};
