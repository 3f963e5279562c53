//! 설정 모듈 - TOML 파일 + 환경변수 오버라이드
//!
//! 로드 순서:
//! 1. 기본값 (`RagConfig::default()`)
//! 2. TOML 파일 (`--config` 또는 `get_data_dir()/config.toml`)
//! 3. `RAG_*` 환경변수
//!
//! 자격 증명(API 키)은 파일에 두지 않고 환경변수에서만 읽습니다.
//! 모든 값은 시작 시점에 검증되며, 잘못된 값은 즉시 `RagError::Configuration`으로 실패합니다.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// 설정 파일 이름
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// 오프라인(해싱 임베딩) 기본 유사도 임계값
pub const OFFLINE_SIMILARITY_THRESHOLD: f32 = 0.3;

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로
///
/// `dirs::data_local_dir()/.rag-chatbot` (Linux: `~/.local/share/.rag-chatbot`,
/// macOS: `~/Library/Application Support/.rag-chatbot`).
/// 로컬 데이터 디렉토리를 모르면 홈 디렉토리 아래 `.rag-chatbot`을 사용합니다.
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".rag-chatbot")
}

// ============================================================================
// Backends
// ============================================================================

/// 임베딩 백엔드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// Google Gemini `embedContent`
    Gemini,
    /// OpenAI `/v1/embeddings`
    #[serde(rename = "openai")]
    OpenAI,
    /// 로컬 feature hashing (오프라인)
    Hashing,
}

/// 생성 모델 백엔드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationBackend {
    /// Google Gemini `generateContent`
    Gemini,
    /// OpenAI `/v1/chat/completions`
    #[serde(rename = "openai")]
    OpenAI,
    /// 모델 없이 컨텍스트에서 문장 추출 (오프라인)
    Extractive,
}

/// 벡터 인덱스 백엔드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackend {
    /// 프로세스 내 메모리 (비영속)
    Memory,
    /// 로컬 LanceDB 테이블
    Lance,
    /// Pinecone REST API
    Pinecone,
}

/// 컨텍스트가 비었을 때의 응답 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoContextPolicy {
    /// 모델 호출 없이 고정 응답 반환
    FixedResponse,
    /// 일반 지식으로 답변하되 경고 문구 추가
    GeneralKnowledge,
}

/// 청킹 전략
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// 단어 윈도우 (chunk_size/overlap = 단어 수)
    Words,
    /// Markdown 구조 인식 (chunk_size/overlap = 문자 수)
    Markdown,
}

// ============================================================================
// Sections
// ============================================================================

/// 검색 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// 최소 유사도 (0.0 ~ 1.0)
    pub similarity_threshold: f32,
    /// 최종 결과 수
    pub top_k: usize,
    /// 후보 배수 (인덱스에는 top_k * multiplier 개를 요청)
    pub candidate_multiplier: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            top_k: 5,
            candidate_multiplier: 4,
        }
    }
}

impl RetrievalConfig {
    /// 인덱스에 요청할 후보 수
    pub fn candidate_k(&self) -> usize {
        self.top_k.saturating_mul(self.candidate_multiplier.max(1))
    }
}

/// 청킹 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub strategy: ChunkStrategy,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::Words,
            chunk_size: 200,
            chunk_overlap: 20,
        }
    }
}

/// 임베딩 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingBackend,
    /// 모델 이름 (없으면 프로바이더 기본값)
    pub model: Option<String>,
    /// 벡터 차원 (없으면 프로바이더 기본값)
    pub dimension: Option<usize>,
    /// 입력 최대 문자 수 (초과 시 요청 전에 거부)
    pub max_input_chars: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingBackend::Gemini,
            model: None,
            dimension: None,
            max_input_chars: 8000,
        }
    }
}

impl EmbeddingConfig {
    /// 실제 사용할 모델 이름
    pub fn model_name(&self) -> String {
        match (&self.model, self.provider) {
            (Some(model), _) => model.clone(),
            (None, EmbeddingBackend::Gemini) => "gemini-embedding-001".to_string(),
            (None, EmbeddingBackend::OpenAI) => "text-embedding-ada-002".to_string(),
            (None, EmbeddingBackend::Hashing) => "feature-hashing".to_string(),
        }
    }

    /// 실제 사용할 벡터 차원
    pub fn dimension(&self) -> usize {
        match (self.dimension, self.provider) {
            (Some(dim), _) => dim,
            (None, EmbeddingBackend::Gemini) => 768,
            (None, EmbeddingBackend::OpenAI) => 1536,
            (None, EmbeddingBackend::Hashing) => 384,
        }
    }
}

/// 기본 "정보 없음" 응답
pub const DEFAULT_NO_CONTEXT_RESPONSE: &str =
    "I don't have information about that in my knowledge base. \
     Try asking about one of the topics that have been added to it.";

/// 생성 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub provider: GenerationBackend,
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// 프롬프트에 넣을 컨텍스트 최대 길이 (문자 수)
    pub max_context_length: usize,
    pub no_context_policy: NoContextPolicy,
    pub no_context_response: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: GenerationBackend::Gemini,
            model: None,
            max_tokens: 500,
            temperature: 0.7,
            max_context_length: 4000,
            no_context_policy: NoContextPolicy::FixedResponse,
            no_context_response: DEFAULT_NO_CONTEXT_RESPONSE.to_string(),
        }
    }
}

impl GenerationConfig {
    /// 실제 사용할 모델 이름
    pub fn model_name(&self) -> String {
        match (&self.model, self.provider) {
            (Some(model), _) => model.clone(),
            (None, GenerationBackend::Gemini) => "gemini-2.0-flash".to_string(),
            (None, GenerationBackend::OpenAI) => "gpt-3.5-turbo".to_string(),
            (None, GenerationBackend::Extractive) => "extractive".to_string(),
        }
    }
}

/// 벡터 인덱스 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub backend: IndexBackend,
    /// LanceDB 디렉토리 (없으면 <data_dir>/vectors.lance)
    pub path: Option<PathBuf>,
    /// Pinecone 인덱스 호스트 (예: https://rag-chatbot-xxxx.svc.pinecone.io)
    pub pinecone_host: Option<String>,
    /// Pinecone 네임스페이스
    pub namespace: Option<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Lance,
            path: None,
            pinecone_host: None,
            namespace: None,
        }
    }
}

impl IndexConfig {
    /// LanceDB 경로
    pub fn lance_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| get_data_dir().join("vectors.lance"))
    }
}

/// 네트워크 호출 타임아웃 (초)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub embedding_secs: u64,
    pub index_secs: u64,
    pub generation_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            embedding_secs: 30,
            index_secs: 30,
            generation_secs: 60,
        }
    }
}

impl TimeoutConfig {
    pub fn embedding(&self) -> Duration {
        Duration::from_secs(self.embedding_secs)
    }

    pub fn index(&self) -> Duration {
        Duration::from_secs(self.index_secs)
    }

    pub fn generation(&self) -> Duration {
        Duration::from_secs(self.generation_secs)
    }
}

/// 수집 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// 문서당 동시 처리 청크 수
    pub concurrency: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

// ============================================================================
// RagConfig
// ============================================================================

/// 전체 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub retrieval: RetrievalConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub index: IndexConfig,
    pub timeouts: TimeoutConfig,
    pub ingest: IngestConfig,
}

impl RagConfig {
    /// 자격 증명 없이 동작하는 오프라인 설정
    ///
    /// feature hashing 임베딩 + 추출식 생성기 + 로컬 LanceDB
    pub fn offline() -> Self {
        let mut config = Self::default();
        config.use_offline_backends(false);
        config
    }

    /// 프로바이더를 오프라인 백엔드로 교체
    ///
    /// `keep_threshold`가 false면 임계값도 오프라인 기본값으로 낮춥니다.
    pub fn use_offline_backends(&mut self, keep_threshold: bool) {
        self.embedding.provider = EmbeddingBackend::Hashing;
        self.embedding.model = None;
        self.generation.provider = GenerationBackend::Extractive;
        self.generation.model = None;
        // 해싱 임베딩은 어휘 겹침 기반이라 임계값을 낮춤
        if !keep_threshold {
            self.retrieval.similarity_threshold = OFFLINE_SIMILARITY_THRESHOLD;
        }
    }

    /// 설정 로드 (파일 → 환경변수 → 검증)
    ///
    /// `path`가 주어지면 반드시 존재해야 하고,
    /// 없으면 데이터 디렉토리의 config.toml을 (있을 때만) 읽습니다.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, false)
    }

    /// 설정 로드, `offline`이면 오프라인 백엔드 강제
    ///
    /// 파일이나 `RAG_SIMILARITY_THRESHOLD`로 지정한 임계값은 그대로 둡니다.
    pub fn load_with(path: Option<&Path>, offline: bool) -> Result<Self> {
        let content = match path {
            Some(p) => Some(read_config_file(p)?),
            None => {
                let default_path = get_data_dir().join(CONFIG_FILE_NAME);
                if default_path.exists() {
                    Some(read_config_file(&default_path)?)
                } else {
                    None
                }
            }
        };

        Self::from_sources(content.as_deref(), offline, |key| std::env::var(key).ok())
    }

    /// 파일 내용 + 키 조회 함수로 설정 조립 (테스트에서 환경변수 대신 사용)
    pub fn from_sources<F>(content: Option<&str>, offline: bool, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match content {
            Some(text) => Self::from_toml(text)?,
            None => Self::default(),
        };

        config.apply_overrides(&lookup)?;

        if offline {
            let threshold_set = content.is_some_and(sets_similarity_threshold)
                || lookup("RAG_SIMILARITY_THRESHOLD").is_some_and(|v| !v.trim().is_empty());
            config.use_offline_backends(threshold_set);
        }

        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 읽기
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_toml(&read_config_file(path)?)
    }

    /// TOML 문자열 파싱
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| RagError::Configuration(format!("Invalid config file: {}", e)))
    }

    /// 환경변수 오버라이드 적용
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// 키 조회 함수로 오버라이드 적용 (테스트에서 환경변수 대신 사용)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("RAG_SIMILARITY_THRESHOLD") {
            self.retrieval.similarity_threshold = parse_env("RAG_SIMILARITY_THRESHOLD", &v)?;
        }
        if let Some(v) = get("RAG_TOP_K") {
            self.retrieval.top_k = parse_env("RAG_TOP_K", &v)?;
        }
        if let Some(v) = get("RAG_MAX_CONTEXT_LENGTH") {
            self.generation.max_context_length = parse_env("RAG_MAX_CONTEXT_LENGTH", &v)?;
        }
        if let Some(v) = get("RAG_CHUNK_SIZE") {
            self.chunking.chunk_size = parse_env("RAG_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = get("RAG_CHUNK_OVERLAP") {
            self.chunking.chunk_overlap = parse_env("RAG_CHUNK_OVERLAP", &v)?;
        }
        if let Some(v) = get("RAG_EMBEDDING_PROVIDER") {
            self.embedding.provider = parse_enum("RAG_EMBEDDING_PROVIDER", &v)?;
        }
        if let Some(v) = get("RAG_EMBEDDING_MODEL") {
            self.embedding.model = Some(v);
        }
        if let Some(v) = get("RAG_GENERATION_PROVIDER") {
            self.generation.provider = parse_enum("RAG_GENERATION_PROVIDER", &v)?;
        }
        if let Some(v) = get("RAG_GENERATION_MODEL") {
            self.generation.model = Some(v);
        }
        if let Some(v) = get("RAG_INDEX_BACKEND") {
            self.index.backend = parse_enum("RAG_INDEX_BACKEND", &v)?;
        }
        if let Some(v) = get("PINECONE_INDEX_HOST") {
            self.index.pinecone_host = Some(v);
        }

        Ok(())
    }

    /// 값 검증 (범위, 필수값)
    pub fn validate(&self) -> Result<()> {
        let r = &self.retrieval;
        if !(0.0..=1.0).contains(&r.similarity_threshold) || r.similarity_threshold.is_nan() {
            return Err(RagError::Configuration(format!(
                "similarity_threshold must be within [0, 1], got {}",
                r.similarity_threshold
            )));
        }
        if r.top_k == 0 {
            return Err(RagError::Configuration("top_k must be at least 1".to_string()));
        }
        if r.candidate_multiplier == 0 {
            return Err(RagError::Configuration(
                "candidate_multiplier must be at least 1".to_string(),
            ));
        }

        let c = &self.chunking;
        if c.chunk_size == 0 {
            return Err(RagError::Configuration("chunk_size must be at least 1".to_string()));
        }
        if c.chunk_overlap >= c.chunk_size {
            return Err(RagError::Configuration(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                c.chunk_overlap, c.chunk_size
            )));
        }

        if self.embedding.model_name().trim().is_empty() {
            return Err(RagError::Configuration("embedding model must not be empty".to_string()));
        }
        if self.embedding.dimension() == 0 {
            return Err(RagError::Configuration("embedding dimension must be at least 1".to_string()));
        }
        if self.embedding.max_input_chars == 0 {
            return Err(RagError::Configuration("max_input_chars must be at least 1".to_string()));
        }

        let g = &self.generation;
        if g.model_name().trim().is_empty() {
            return Err(RagError::Configuration("generation model must not be empty".to_string()));
        }
        if g.max_context_length == 0 {
            return Err(RagError::Configuration(
                "max_context_length must be at least 1".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&g.temperature) {
            return Err(RagError::Configuration(format!(
                "temperature must be within [0, 2], got {}",
                g.temperature
            )));
        }
        if g.no_context_policy == NoContextPolicy::FixedResponse
            && g.no_context_response.trim().is_empty()
        {
            return Err(RagError::Configuration(
                "no_context_response must not be empty with the fixed_response policy".to_string(),
            ));
        }

        if self.index.backend == IndexBackend::Pinecone
            && self
                .index
                .pinecone_host
                .as_deref()
                .map(|h| h.trim().is_empty())
                .unwrap_or(true)
        {
            return Err(RagError::Configuration(
                "index.pinecone_host (or PINECONE_INDEX_HOST) is required for the pinecone backend"
                    .to_string(),
            ));
        }

        let t = &self.timeouts;
        if t.embedding_secs == 0 || t.index_secs == 0 || t.generation_secs == 0 {
            return Err(RagError::Configuration("timeouts must be at least 1 second".to_string()));
        }
        if self.ingest.concurrency == 0 {
            return Err(RagError::Configuration("ingest.concurrency must be at least 1".to_string()));
        }

        Ok(())
    }

    /// 선택된 프로바이더의 자격 증명 존재 확인
    pub fn check_credentials(&self) -> Result<()> {
        let needs_gemini = self.embedding.provider == EmbeddingBackend::Gemini
            || self.generation.provider == GenerationBackend::Gemini;
        let needs_openai = self.embedding.provider == EmbeddingBackend::OpenAI
            || self.generation.provider == GenerationBackend::OpenAI;

        if needs_gemini && !crate::embedding::has_api_key() {
            return Err(RagError::Configuration(
                "GEMINI_API_KEY or GOOGLE_AI_API_KEY not set".to_string(),
            ));
        }
        if needs_openai && !has_env("OPENAI_API_KEY") {
            return Err(RagError::Configuration("OPENAI_API_KEY not set".to_string()));
        }
        if self.index.backend == IndexBackend::Pinecone && !has_env("PINECONE_API_KEY") {
            return Err(RagError::Configuration("PINECONE_API_KEY not set".to_string()));
        }
        Ok(())
    }

    /// TOML 문자열로 직렬화
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| RagError::Configuration(format!("Failed to serialize config: {}", e)))
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn read_config_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        RagError::Configuration(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })
}

/// TOML에 `[retrieval] similarity_threshold`가 적혀 있는지
fn sets_similarity_threshold(content: &str) -> bool {
    content.parse::<toml::Table>().is_ok_and(|table| {
        table
            .get("retrieval")
            .and_then(|r| r.get("similarity_threshold"))
            .is_some()
    })
}

/// 비어있지 않은 환경변수 존재 여부
pub(crate) fn has_env(key: &str) -> bool {
    std::env::var(key).map(|v| !v.is_empty()).unwrap_or(false)
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| RagError::Configuration(format!("Invalid {}='{}': {}", key, value, e)))
}

/// serde 이름으로 enum 파싱 ("openai", "lance" 등)
fn parse_enum<T: serde::de::DeserializeOwned>(key: &str, value: &str) -> Result<T> {
    let normalized = value.trim().to_lowercase();
    serde_json::from_value(serde_json::Value::String(normalized))
        .map_err(|_| RagError::Configuration(format!("Invalid {}='{}'", key, value)))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = RagConfig::default();
        assert!(config.validate().is_ok());
        assert!((config.retrieval.similarity_threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.candidate_k(), 20);
        assert_eq!(config.embedding.dimension(), 768);
    }

    #[test]
    fn test_offline_preset() {
        let config = RagConfig::offline();
        assert!(config.validate().is_ok());
        assert_eq!(config.embedding.provider, EmbeddingBackend::Hashing);
        assert_eq!(config.generation.provider, GenerationBackend::Extractive);
        // 오프라인 프리셋은 자격 증명이 필요 없음
        assert!(config.check_credentials().is_ok());
    }

    #[test]
    fn test_offline_keeps_explicit_threshold() {
        let none = |_: &str| None;

        let config = RagConfig::from_sources(None, true, none).unwrap();
        assert_eq!(config.retrieval.similarity_threshold, OFFLINE_SIMILARITY_THRESHOLD);

        let file = "[retrieval]\nsimilarity_threshold = 0.6\n\n[embedding]\nprovider = \"openai\"";
        let config = RagConfig::from_sources(Some(file), true, none).unwrap();
        assert!((config.retrieval.similarity_threshold - 0.6).abs() < f32::EPSILON);
        assert_eq!(config.embedding.provider, EmbeddingBackend::Hashing);

        let env = |k: &str| (k == "RAG_SIMILARITY_THRESHOLD").then(|| "0.45".to_string());
        let config = RagConfig::from_sources(None, true, env).unwrap();
        assert!((config.retrieval.similarity_threshold - 0.45).abs() < f32::EPSILON);
        assert_eq!(config.generation.provider, GenerationBackend::Extractive);

        // 오프라인이 아니면 기본값 유지
        let config = RagConfig::from_sources(Some("[retrieval]\ntop_k = 2"), false, none).unwrap();
        assert!((config.retrieval.similarity_threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.retrieval.top_k, 2);
    }

    #[test]
    fn test_data_dir_under_local_data() {
        let dir = get_data_dir();
        assert!(dir.ends_with(".rag-chatbot"));
        if let Some(local) = dirs::data_local_dir() {
            assert_eq!(dir, local.join(".rag-chatbot"));
        }
    }

    #[test]
    fn test_partial_toml() {
        let config = RagConfig::from_toml(
            r#"
            [retrieval]
            similarity_threshold = 0.5

            [embedding]
            provider = "openai"

            [index]
            backend = "memory"
            "#,
        )
        .unwrap();

        assert!((config.retrieval.similarity_threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.embedding.provider, EmbeddingBackend::OpenAI);
        assert_eq!(config.embedding.model_name(), "text-embedding-ada-002");
        assert_eq!(config.embedding.dimension(), 1536);
        assert_eq!(config.index.backend, IndexBackend::Memory);
    }

    #[test]
    fn test_invalid_toml() {
        let result = RagConfig::from_toml("[retrieval]\ntop_k = \"five\"");
        assert!(matches!(result, Err(RagError::Configuration(_))));
    }

    #[test]
    fn test_threshold_out_of_range() {
        let mut config = RagConfig::default();
        config.retrieval.similarity_threshold = 1.5;
        assert!(matches!(config.validate(), Err(RagError::Configuration(_))));

        config.retrieval.similarity_threshold = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let mut config = RagConfig::default();
        config.chunking.chunk_size = 10;
        config.chunking.chunk_overlap = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pinecone_requires_host() {
        let mut config = RagConfig::default();
        config.index.backend = IndexBackend::Pinecone;
        assert!(config.validate().is_err());

        config.index.pinecone_host = Some("https://example.svc.pinecone.io".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("RAG_SIMILARITY_THRESHOLD", "0.55"),
            ("RAG_TOP_K", "3"),
            ("RAG_INDEX_BACKEND", "Memory"),
            ("RAG_GENERATION_PROVIDER", "extractive"),
            ("RAG_EMBEDDING_MODEL", ""),
        ]
        .into_iter()
        .collect();

        let mut config = RagConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert!((config.retrieval.similarity_threshold - 0.55).abs() < f32::EPSILON);
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.index.backend, IndexBackend::Memory);
        assert_eq!(config.generation.provider, GenerationBackend::Extractive);
        // 빈 값은 무시
        assert_eq!(config.embedding.model, None);
    }

    #[test]
    fn test_invalid_override() {
        let mut config = RagConfig::default();
        let result = config.apply_overrides(|k| {
            (k == "RAG_TOP_K").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(RagError::Configuration(_))));

        let result = config.apply_overrides(|k| {
            (k == "RAG_INDEX_BACKEND").then(|| "redis".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_toml_roundtrip_keeps_policy() {
        let mut config = RagConfig::default();
        config.generation.no_context_policy = NoContextPolicy::GeneralKnowledge;
        let text = config.to_toml().unwrap();
        assert!(text.contains("general_knowledge"));
        let parsed = RagConfig::from_toml(&text).unwrap();
        assert_eq!(
            parsed.generation.no_context_policy,
            NoContextPolicy::GeneralKnowledge
        );
    }
}
