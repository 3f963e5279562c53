//! Feature hashing 임베딩 - 자격 증명 없이 동작하는 로컬 프로바이더
//!
//! 토큰(소문자 영숫자 단어, 불용어 제외)을 SHA-256으로 해싱해
//! 고정 차원 버킷에 부호 있는 가중치로 누적한 뒤 L2 정규화합니다.
//! 남는 토큰이 없는 텍스트는 영벡터 대신 `RagError::Embedding`으로 거부합니다.
//! 의미 유사도가 아니라 어휘 겹침을 측정하므로 임계값은 낮게 잡아야 합니다.

use std::collections::HashMap;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::{RagError, Result};

use super::{check_input, EmbeddingProvider};

/// 검색에 기여하지 않는 영어 불용어
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "how",
    "i", "in", "is", "it", "me", "of", "on", "or", "tell", "that", "the", "this", "to", "was",
    "what", "when", "where", "which", "who", "why", "with", "you", "about",
];

/// 로컬 해싱 임베딩
#[derive(Debug, Clone)]
pub struct HashingEmbedding {
    dimension: usize,
    max_input_chars: usize,
}

impl HashingEmbedding {
    pub fn new(dimension: usize, max_input_chars: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::Configuration(
                "hashing embedding dimension must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            dimension,
            max_input_chars,
        })
    }

    /// 동기 임베딩 계산
    pub fn embed_sync(&self, text: &str) -> Result<Vec<f32>> {
        check_input(text, self.max_input_chars)?;

        let mut counts: HashMap<String, u32> = HashMap::new();
        for token in tokenize(text) {
            *counts.entry(token).or_insert(0) += 1;
        }

        let mut vector = vec![0.0f32; self.dimension];
        for (token, count) in &counts {
            let (bucket, sign) = self.bucket(token);
            // 1 + ln(tf)
            vector[bucket] += sign * (1.0 + (*count as f32).ln());
        }

        // 불용어/1글자 토큰만 있으면 영벡터가 되므로 거부
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            return Err(RagError::Embedding(format!(
                "text has no indexable terms: {:?}",
                text.chars().take(80).collect::<String>()
            )));
        }
        for x in vector.iter_mut() {
            *x /= norm;
        }
        Ok(vector)
    }

    fn bucket(&self, token: &str) -> (usize, f32) {
        let digest = Sha256::digest(token.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        let index = (u64::from_le_bytes(head) % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }
}

/// 소문자 영숫자 토큰 (불용어, 1글자 토큰 제외)
pub(crate) fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .map(|t| t.to_lowercase())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_sync(text)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "feature-hashing"
    }
}

// ============================================================================
// Tests
// ============================================================================
