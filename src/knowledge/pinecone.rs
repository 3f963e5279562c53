//! Pinecone Vector Index - 원격 벡터 인덱스 (REST data plane)
//!
//! ref: https://docs.pinecone.io/reference/api/data-plane
//!
//! 청크 본문은 메타데이터 `content` 필드에 함께 저장합니다.
//! chunk_id가 `<document_id>#<index>` 형식이므로 문서 단위 삭제는
//! prefix 목록 조회 후 id 삭제로 처리합니다 (serverless 인덱스는 필터 삭제 미지원).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

use super::document::{Chunk, ChunkMetadata};
use super::vector::{
    check_dimension, clamp_score, sort_matches, IndexMatch, IndexStats, MetadataFilter,
    VectorIndex,
};

/// 한 번에 upsert할 최대 벡터 수
const UPSERT_BATCH_SIZE: usize = 100;

/// Pinecone API 키 로드
pub fn get_pinecone_api_key() -> Result<String> {
    match std::env::var("PINECONE_API_KEY") {
        Ok(key) if !key.is_empty() => Ok(key),
        _ => Err(RagError::Configuration(
            "PINECONE_API_KEY environment variable not set".to_string(),
        )),
    }
}

// ============================================================================
// PineconeIndex
// ============================================================================

/// Pinecone 인덱스 클라이언트
#[derive(Debug)]
pub struct PineconeIndex {
    client: reqwest::Client,
    host: String,
    api_key: String,
    namespace: Option<String>,
    dimension: usize,
}

impl PineconeIndex {
    /// 클라이언트 생성 (네트워크 호출 없음)
    ///
    /// # Arguments
    /// * `host` - 인덱스 호스트 (https:// 생략 가능)
    /// * `dimension` - 임베딩 차원
    pub fn new(
        host: &str,
        api_key: String,
        namespace: Option<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let host = host.trim().trim_end_matches('/');
        if host.is_empty() {
            return Err(RagError::Configuration("Pinecone host must not be empty".to_string()));
        }
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{}", host)
        };

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            host,
            api_key,
            namespace: namespace.filter(|n| !n.is_empty()),
            dimension,
        })
    }

    /// 생성 후 인덱스 차원 확인
    pub async fn connect(
        host: &str,
        api_key: String,
        namespace: Option<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let index = Self::new(host, api_key, namespace, dimension, timeout)?;
        let stats = index.describe().await?;
        if let Some(remote) = stats.dimension {
            check_dimension(dimension, remote)?;
        }
        tracing::info!("Connected to Pinecone index: {}", index.host);
        Ok(index)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.host, path)
    }

    /// POST JSON 요청 후 응답 파싱
    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let response = self
            .client
            .post(self.url(path))
            .header("Api-Key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| RagError::IndexUnavailable(format!("Pinecone request failed: {}", e)))?;

        Self::parse_response(path, response).await
    }

    /// GET 요청 후 응답 파싱
    async fn get<R>(&self, path: &str, query: &[(&str, String)]) -> Result<R>
    where
        R: for<'de> Deserialize<'de>,
    {
        let response = self
            .client
            .get(self.url(path))
            .header("Api-Key", &self.api_key)
            .query(query)
            .send()
            .await
            .map_err(|e| RagError::IndexUnavailable(format!("Pinecone request failed: {}", e)))?;

        Self::parse_response(path, response).await
    }

    async fn parse_response<R>(path: &str, response: reqwest::Response) -> Result<R>
    where
        R: for<'de> Deserialize<'de>,
    {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RagError::IndexUnavailable(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(RagError::IndexUnavailable(format!(
                "Pinecone {} failed ({}): {}",
                path, status, body
            )));
        }

        // delete 등은 빈 객체를 반환
        let body = if body.trim().is_empty() { "{}" } else { body.as_str() };
        serde_json::from_str(body).map_err(|e| {
            RagError::IndexUnavailable(format!("Failed to parse Pinecone {} response: {}", path, e))
        })
    }

    async fn describe(&self) -> Result<DescribeStatsResponse> {
        self.post("/describe_index_stats", &serde_json::json!({})).await
    }

    /// prefix로 시작하는 모든 벡터 id 조회 (페이지네이션)
    async fn list_ids(&self, prefix: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let mut query = vec![("prefix", prefix.to_string())];
            if let Some(ref ns) = self.namespace {
                query.push(("namespace", ns.clone()));
            }
            if let Some(ref t) = token {
                query.push(("paginationToken", t.clone()));
            }

            let page: ListResponse = self.get("/vectors/list", &query).await?;
            ids.extend(page.vectors.into_iter().map(|v| v.id));

            match page.pagination.and_then(|p| p.next) {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        Ok(ids)
    }

    async fn delete_ids(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let request = DeleteRequest {
            ids,
            namespace: self.namespace.as_deref(),
        };
        let _: serde_json::Value = self.post("/vectors/delete", &request).await?;
        Ok(())
    }
}

/// 메타데이터 필터를 Pinecone 필터 표현식으로 변환
fn filter_to_json(filter: &MetadataFilter) -> Option<serde_json::Value> {
    let mut conditions = serde_json::Map::new();
    if let Some(ref doc) = filter.document_id {
        conditions.insert("document_id".to_string(), serde_json::json!({ "$eq": doc }));
    }
    if let Some(ref source) = filter.source {
        conditions.insert("source".to_string(), serde_json::json!({ "$eq": source }));
    }
    if let Some(ref category) = filter.category {
        conditions.insert("category".to_string(), serde_json::json!({ "$eq": category }));
    }

    if conditions.is_empty() {
        None
    } else {
        Some(serde_json::Value::Object(conditions))
    }
}

impl From<&Chunk> for PineconeVector {
    fn from(chunk: &Chunk) -> Self {
        Self {
            id: chunk.chunk_id.clone(),
            values: chunk.embedding.clone(),
            metadata: PineconeMetadata {
                content: chunk.text.clone(),
                document_id: chunk.metadata.document_id.clone(),
                title: chunk.metadata.title.clone(),
                source: chunk.metadata.source.clone(),
                category: chunk.metadata.category.clone(),
            },
        }
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn upsert(&self, chunks: &[Chunk]) -> Result<usize> {
        for chunk in chunks {
            check_dimension(self.dimension, chunk.embedding.len())?;
        }

        for batch in chunks.chunks(UPSERT_BATCH_SIZE) {
            let request = UpsertRequest {
                vectors: batch.iter().map(PineconeVector::from).collect(),
                namespace: self.namespace.as_deref(),
            };
            let response: UpsertResponse = self.post("/vectors/upsert", &request).await?;
            tracing::debug!("Pinecone upserted {} vectors", response.upserted_count);
        }

        Ok(chunks.len())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<IndexMatch>> {
        check_dimension(self.dimension, vector.len())?;

        let request = QueryRequest {
            vector,
            top_k,
            include_metadata: true,
            filter: filter.and_then(filter_to_json),
            namespace: self.namespace.as_deref(),
        };

        let response: QueryResponse = self.post("/query", &request).await?;

        let mut matches: Vec<IndexMatch> = response
            .matches
            .into_iter()
            .map(|m| {
                let meta = m.metadata.unwrap_or_default();
                IndexMatch {
                    chunk_id: m.id,
                    score: clamp_score(m.score),
                    text: meta.content,
                    metadata: ChunkMetadata {
                        document_id: meta.document_id,
                        title: meta.title,
                        source: meta.source,
                        category: meta.category,
                    },
                }
            })
            .collect();

        sort_matches(&mut matches);
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete(&self, chunk_id: &str) -> Result<bool> {
        let mut query = vec![("ids", chunk_id.to_string())];
        if let Some(ref ns) = self.namespace {
            query.push(("namespace", ns.clone()));
        }
        let fetched: FetchResponse = self.get("/vectors/fetch", &query).await?;
        if !fetched.vectors.contains_key(chunk_id) {
            return Ok(false);
        }

        self.delete_ids(&[chunk_id.to_string()]).await?;
        Ok(true)
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize> {
        let ids = self.list_ids(&format!("{}#", document_id)).await?;
        for batch in ids.chunks(1000) {
            self.delete_ids(batch).await?;
        }
        Ok(ids.len())
    }

    async fn stats(&self) -> Result<IndexStats> {
        let stats = self.describe().await?;

        let count = match self.namespace {
            Some(ref ns) => stats
                .namespaces
                .get(ns)
                .map(|n| n.vector_count)
                .unwrap_or(0),
            None => stats.total_vector_count,
        };

        Ok(IndexStats {
            count,
            dimension: stats.dimension.unwrap_or(self.dimension),
            backend: self.name().to_string(),
        })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "pinecone"
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct PineconeVector {
    id: String,
    values: Vec<f32>,
    metadata: PineconeMetadata,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PineconeMetadata {
    #[serde(default)]
    content: String,
    #[serde(default)]
    document_id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    category: String,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<PineconeVector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct UpsertResponse {
    #[serde(rename = "upsertedCount", default)]
    upserted_count: usize,
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    vector: &'a [f32],
    #[serde(rename = "topK")]
    top_k: usize,
    #[serde(rename = "includeMetadata")]
    include_metadata: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<PineconeMetadata>,
}

#[derive(Debug, Serialize)]
struct DeleteRequest<'a> {
    ids: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct DescribeStatsResponse {
    #[serde(default)]
    dimension: Option<usize>,
    #[serde(rename = "totalVectorCount", default)]
    total_vector_count: usize,
    #[serde(default)]
    namespaces: HashMap<String, NamespaceSummary>,
}

#[derive(Debug, Deserialize)]
struct NamespaceSummary {
    #[serde(rename = "vectorCount", default)]
    vector_count: usize,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    vectors: Vec<ListedVector>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct ListedVector {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    #[serde(default)]
    vectors: HashMap<String, serde_json::Value>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> PineconeIndex {
        PineconeIndex::new(
            "rag-chatbot-abc123.svc.pinecone.io/",
            "fake_key".to_string(),
            Some(String::new()),
            3,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_host_normalization() {
        let index = index();
        assert_eq!(index.url("/query"), "https://rag-chatbot-abc123.svc.pinecone.io/query");
        // 빈 네임스페이스는 기본 네임스페이스로 취급
        assert!(index.namespace.is_none());

        assert!(PineconeIndex::new("  ", "k".to_string(), None, 3, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_query_request_shape() {
        let filter = MetadataFilter::by_category("AI");
        let request = QueryRequest {
            vector: &[0.1, 0.2, 0.3],
            top_k: 20,
            include_metadata: true,
            filter: filter_to_json(&filter),
            namespace: None,
        };
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["topK"], 20);
        assert_eq!(json["includeMetadata"], true);
        assert_eq!(json["filter"]["category"]["$eq"], "AI");
        assert!(json.get("namespace").is_none());
    }

    #[test]
    fn test_parse_query_response() {
        let body = r#"{
            "matches": [
                {"id": "doc-1#0", "score": 0.91, "metadata": {
                    "content": "Machine learning is a subset of AI.",
                    "document_id": "doc-1", "title": "ML Basics",
                    "source": "test", "category": "AI"}},
                {"id": "doc-2#0", "score": -0.2}
            ],
            "namespace": ""
        }"#;
        let response: QueryResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.matches.len(), 2);
        assert_eq!(
            response.matches[0].metadata.as_ref().unwrap().title,
            "ML Basics"
        );
        assert!(response.matches[1].metadata.is_none());
    }

    #[test]
    fn test_parse_stats_response() {
        let body = r#"{"namespaces": {"docs": {"vectorCount": 7}},
                       "dimension": 1536, "indexFullness": 0.0, "totalVectorCount": 9}"#;
        let stats: DescribeStatsResponse = serde_json::from_str(body).unwrap();
        assert_eq!(stats.dimension, Some(1536));
        assert_eq!(stats.total_vector_count, 9);
        assert_eq!(stats.namespaces["docs"].vector_count, 7);
    }

    #[tokio::test]
    async fn test_dimension_checked_before_request() {
        let index = index();
        let err = index.query(&[1.0, 0.0], 5, None).await.unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { expected: 3, actual: 2 }));
    }
}
