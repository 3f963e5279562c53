//! Knowledge 모듈 - 문서, 청킹, 벡터 인덱스
//!
//! - Document/Chunk: 검증된 문서와 인덱스에 들어가는 청크
//! - Chunker: 단어 윈도우 / Markdown 인식 분할
//! - VectorIndex: 메모리, LanceDB, Pinecone 백엔드
//! - Catalog: SQLite 문서 목록 (수집 이력)

mod catalog;
mod chunker;
mod document;
mod lance;
mod memory;
mod pinecone;
mod vector;

use std::sync::Arc;

use crate::config::{IndexBackend, RagConfig};
use crate::error::Result;

// Re-exports
pub use catalog::{CatalogEntry, CatalogStats, DocumentCatalog};
pub use chunker::{create_chunker, Chunker, MarkdownChunker, WordChunker};
pub use document::{chunk_id, document_id_of, Chunk, ChunkMetadata, Document, NewDocument};
pub use lance::LanceVectorIndex;
pub use memory::MemoryVectorIndex;
pub use pinecone::{get_pinecone_api_key, PineconeIndex};
pub use vector::{
    check_dimension, clamp_score, cosine_similarity, sort_matches, IndexMatch, IndexStats,
    MetadataFilter, VectorIndex,
};

/// 설정에 맞는 벡터 인덱스 열기
///
/// 기존 인덱스의 차원이 `dimension`과 다르면 `RagError::DimensionMismatch`를 반환합니다.
pub async fn open_index(config: &RagConfig, dimension: usize) -> Result<Arc<dyn VectorIndex>> {
    let index: Arc<dyn VectorIndex> = match config.index.backend {
        IndexBackend::Memory => Arc::new(MemoryVectorIndex::new(dimension)),
        IndexBackend::Lance => {
            Arc::new(LanceVectorIndex::open(&config.index.lance_path(), dimension).await?)
        }
        IndexBackend::Pinecone => {
            let host = config.index.pinecone_host.as_deref().unwrap_or_default();
            Arc::new(
                PineconeIndex::connect(
                    host,
                    get_pinecone_api_key()?,
                    config.index.namespace.clone(),
                    dimension,
                    config.timeouts.index(),
                )
                .await?,
            )
        }
    };

    tracing::info!("Opened {} vector index (dimension: {})", index.name(), dimension);
    Ok(index)
}
