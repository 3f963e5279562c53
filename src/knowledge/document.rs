//! 문서 / 청크 타입
//!
//! 호출자가 넘기는 느슨한 입력(`NewDocument`)은 수집 경계에서
//! 검증된 `Document`로 변환됩니다. 제목이나 본문이 비어 있으면
//! `RagError::Validation`으로 거부합니다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{RagError, Result};

// ============================================================================
// Types
// ============================================================================

/// 새 문서 입력용 구조체
///
/// JSON으로 받을 때 `id`, `source`, `category`는 생략할 수 있습니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewDocument {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub category: String,
}

impl NewDocument {
    /// 제목과 본문으로 생성
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// 검증 후 `Document`로 변환
    ///
    /// id가 없으면 UUID v4를 생성합니다.
    pub fn validate(self) -> Result<Document> {
        let id = match self.id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            Some(_) => return Err(RagError::Validation("document id must not be blank".to_string())),
            None => uuid::Uuid::new_v4().to_string(),
        };

        // chunk_id 구분자와 충돌하는 id 거부
        if id.contains('#') {
            return Err(RagError::Validation(format!(
                "document id '{}' must not contain '#'",
                id
            )));
        }

        if self.title.trim().is_empty() {
            return Err(RagError::Validation(format!("document '{}' has no title", id)));
        }
        if self.content.trim().is_empty() {
            return Err(RagError::Validation(format!("document '{}' has no content", id)));
        }

        Ok(Document {
            id,
            title: self.title.trim().to_string(),
            content: self.content,
            source: self.source.trim().to_string(),
            category: self.category.trim().to_string(),
            created_at: Utc::now(),
        })
    }
}

/// 검증된 문서
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    pub source: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// 청크가 물려받는 메타데이터
    pub fn metadata(&self) -> ChunkMetadata {
        ChunkMetadata {
            document_id: self.id.clone(),
            title: self.title.clone(),
            source: self.source.clone(),
            category: self.category.clone(),
        }
    }

    /// 본문 SHA-256 (hex) - 변경 감지용
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.title.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.content.as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

/// 청크 메타데이터 (부모 문서에서 상속)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// 부모 문서 ID (비소유 역참조)
    pub document_id: String,
    pub title: String,
    pub source: String,
    pub category: String,
}

/// 인덱스에 저장되는 청크
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn document_id(&self) -> &str {
        &self.metadata.document_id
    }
}

/// 문서 ID + 청크 오프셋으로 chunk_id 생성
pub fn chunk_id(document_id: &str, chunk_index: usize) -> String {
    format!("{}#{}", document_id, chunk_index)
}

/// chunk_id에서 문서 ID 추출
pub fn document_id_of(chunk_id: &str) -> &str {
    chunk_id
        .rsplit_once('#')
        .map(|(doc, _)| doc)
        .unwrap_or(chunk_id)
}

// ============================================================================
// Tests
// ============================================================================
