//! LanceDB Vector Index - 로컬 디스크 기반 벡터 검색
//!
//! 청크 텍스트와 메타데이터를 벡터와 같은 행에 저장하므로
//! 검색 결과만으로 프롬프트를 조립할 수 있습니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::DistanceType;
use tokio::sync::Mutex;

use crate::error::{RagError, Result};

use super::document::{Chunk, ChunkMetadata};
use super::vector::{
    check_dimension, clamp_score, sort_matches, IndexMatch, IndexStats, MetadataFilter,
    VectorIndex,
};

/// 벡터 테이블 이름
const TABLE_NAME: &str = "chunks";

// ============================================================================
// LanceVectorIndex
// ============================================================================

/// LanceDB 벡터 인덱스 구현
///
/// 코사인 거리로 검색하고 `1 - distance`를 유사도로 사용합니다.
/// 테이블은 `open`에서 만들어지고, 쓰기(upsert/delete)는 인스턴스 안에서 직렬화됩니다.
pub struct LanceVectorIndex {
    db: Connection,
    dimension: usize,
    write_lock: Mutex<()>,
}

impl LanceVectorIndex {
    /// LanceDB 인덱스 열기
    ///
    /// 기존 테이블의 벡터 차원이 `dimension`과 다르면
    /// `RagError::DimensionMismatch`를 반환합니다.
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::Configuration(
                "vector dimension must be at least 1".to_string(),
            ));
        }

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(unavailable("Failed to create LanceDB directory"))?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| RagError::Configuration(format!("Invalid path encoding: {:?}", path)))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .map_err(unavailable("Failed to connect to LanceDB"))?;

        let index = Self {
            db,
            dimension,
            write_lock: Mutex::new(()),
        };

        if let Some(existing) = index.stored_dimension().await? {
            check_dimension(dimension, existing)?;
        }
        index.ensure_table().await?;

        tracing::debug!("LanceDB index opened at {:?} (dimension: {})", path, dimension);
        Ok(index)
    }

    /// 청크 테이블 스키마
    fn create_schema(dimension: usize) -> Schema {
        Schema::new(vec![
            Field::new("chunk_id", DataType::Utf8, false),
            Field::new("document_id", DataType::Utf8, false),
            Field::new("title", DataType::Utf8, false),
            Field::new("source", DataType::Utf8, false),
            Field::new("category", DataType::Utf8, false),
            Field::new("chunk_text", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension as i32,
                ),
                false,
            ),
        ])
    }

    /// 청크들을 Arrow RecordBatch로 변환
    fn chunks_to_batch(&self, chunks: &[Chunk]) -> Result<RecordBatch> {
        let embeddings_flat: Vec<f32> = chunks
            .iter()
            .flat_map(|c| c.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            self.dimension as i32,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .map_err(|e| RagError::IndexUnavailable(format!("Failed to create embedding array: {}", e)))?;

        RecordBatch::try_new(
            Arc::new(Self::create_schema(self.dimension)),
            vec![
                Arc::new(string_array(chunks, |c| c.chunk_id.as_str())),
                Arc::new(string_array(chunks, |c| c.metadata.document_id.as_str())),
                Arc::new(string_array(chunks, |c| c.metadata.title.as_str())),
                Arc::new(string_array(chunks, |c| c.metadata.source.as_str())),
                Arc::new(string_array(chunks, |c| c.metadata.category.as_str())),
                Arc::new(string_array(chunks, |c| c.text.as_str())),
                Arc::new(embeddings_list),
            ],
        )
        .map_err(|e| RagError::IndexUnavailable(format!("Failed to create RecordBatch: {}", e)))
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(&self) -> Result<bool> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(unavailable("Failed to list tables"))?;
        Ok(names.iter().any(|n| n == TABLE_NAME))
    }

    /// 테이블 열기 (없으면 None)
    async fn open_table(&self) -> Result<Option<lancedb::table::Table>> {
        if !self.table_exists().await? {
            return Ok(None);
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(unavailable("Failed to open table"))?;
        Ok(Some(table))
    }

    /// 테이블 열기, 없으면 빈 테이블 생성
    async fn ensure_table(&self) -> Result<lancedb::table::Table> {
        if let Some(table) = self.open_table().await? {
            return Ok(table);
        }

        let schema = Arc::new(Self::create_schema(self.dimension));
        match self.db.create_empty_table(TABLE_NAME, schema).execute().await {
            Ok(table) => {
                tracing::debug!("Created LanceDB table '{}'", TABLE_NAME);
                Ok(table)
            }
            // 다른 프로세스가 먼저 생성
            Err(lancedb::Error::TableAlreadyExists { .. }) => {
                self.open_table().await?.ok_or_else(|| {
                    RagError::IndexUnavailable(format!("Table '{}' disappeared", TABLE_NAME))
                })
            }
            Err(e) => Err(unavailable("Failed to create table")(e)),
        }
    }

    /// 기존 테이블의 벡터 차원
    async fn stored_dimension(&self) -> Result<Option<usize>> {
        let Some(table) = self.open_table().await? else {
            return Ok(None);
        };

        let schema = table
            .schema()
            .await
            .map_err(unavailable("Failed to read table schema"))?;

        let dimension = schema
            .field_with_name("embedding")
            .ok()
            .and_then(|f| match f.data_type() {
                DataType::FixedSizeList(_, size) => Some(*size as usize),
                _ => None,
            });

        Ok(dimension)
    }
}

/// lancedb 에러를 IndexUnavailable로 변환
fn unavailable<E: std::fmt::Display>(context: &'static str) -> impl FnOnce(E) -> RagError {
    move |e| RagError::IndexUnavailable(format!("{}: {}", context, e))
}

/// 청크 필드 하나를 StringArray 컬럼으로
fn string_array(chunks: &[Chunk], field: impl Fn(&Chunk) -> &str) -> StringArray {
    StringArray::from(chunks.iter().map(field).collect::<Vec<&str>>())
}

/// SQL 문자열 리터럴 이스케이프
fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// 메타데이터 필터를 LanceDB SQL 조건으로 변환
fn filter_to_sql(filter: &MetadataFilter) -> Option<String> {
    let mut conditions = Vec::new();
    if let Some(ref doc) = filter.document_id {
        conditions.push(format!("document_id = {}", sql_literal(doc)));
    }
    if let Some(ref source) = filter.source {
        conditions.push(format!("source = {}", sql_literal(source)));
    }
    if let Some(ref category) = filter.category {
        conditions.push(format!("category = {}", sql_literal(category)));
    }

    if conditions.is_empty() {
        None
    } else {
        Some(conditions.join(" AND "))
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| RagError::IndexUnavailable(format!("Missing {} column", name)))
}

#[async_trait]
impl VectorIndex for LanceVectorIndex {
    async fn upsert(&self, chunks: &[Chunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        for chunk in chunks {
            check_dimension(self.dimension, chunk.embedding.len())?;
        }

        let batch = self.chunks_to_batch(chunks)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        let _guard = self.write_lock.lock().await;
        let table = self.ensure_table().await?;

        // 같은 chunk_id 행을 지운 뒤 추가 (upsert)
        let ids = chunks
            .iter()
            .map(|c| sql_literal(&c.chunk_id))
            .collect::<Vec<_>>()
            .join(", ");
        table
            .delete(&format!("chunk_id IN ({})", ids))
            .await
            .map_err(unavailable("Failed to replace existing chunks"))?;

        table
            .add(batches)
            .execute()
            .await
            .map_err(unavailable("Failed to add chunks to table"))?;

        Ok(chunks.len())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<IndexMatch>> {
        check_dimension(self.dimension, vector.len())?;

        let Some(table) = self.open_table().await? else {
            return Ok(vec![]);
        };

        let mut search = table
            .vector_search(vector.to_vec())
            .map_err(unavailable("Failed to create vector search"))?
            .distance_type(DistanceType::Cosine)
            .limit(top_k);

        if let Some(condition) = filter.and_then(filter_to_sql) {
            search = search.only_if(condition);
        }

        let stream = search
            .execute()
            .await
            .map_err(unavailable("Failed to execute vector search"))?;

        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(unavailable("Failed to read search results"))?;

        let mut matches = Vec::new();

        for batch in batches {
            let chunk_ids = string_column(&batch, "chunk_id")?;
            let document_ids = string_column(&batch, "document_id")?;
            let titles = string_column(&batch, "title")?;
            let sources = string_column(&batch, "source")?;
            let categories = string_column(&batch, "category")?;
            let texts = string_column(&batch, "chunk_text")?;

            // _distance 컬럼 (LanceDB가 자동 추가)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| RagError::IndexUnavailable("Missing _distance column".to_string()))?;

            for i in 0..batch.num_rows() {
                matches.push(IndexMatch {
                    chunk_id: chunk_ids.value(i).to_string(),
                    // 코사인 거리 -> 코사인 유사도
                    score: clamp_score(1.0 - distances.value(i)),
                    text: texts.value(i).to_string(),
                    metadata: ChunkMetadata {
                        document_id: document_ids.value(i).to_string(),
                        title: titles.value(i).to_string(),
                        source: sources.value(i).to_string(),
                        category: categories.value(i).to_string(),
                    },
                });
            }
        }

        sort_matches(&mut matches);
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete(&self, chunk_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let Some(table) = self.open_table().await? else {
            return Ok(false);
        };

        let filter = format!("chunk_id = {}", sql_literal(chunk_id));
        let existing = table
            .count_rows(Some(filter.clone()))
            .await
            .map_err(unavailable("Failed to count rows"))?;

        if existing == 0 {
            return Ok(false);
        }

        table
            .delete(&filter)
            .await
            .map_err(unavailable("Failed to delete chunk"))?;
        Ok(true)
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let Some(table) = self.open_table().await? else {
            return Ok(0);
        };

        let filter = format!("document_id = {}", sql_literal(document_id));
        let existing = table
            .count_rows(Some(filter.clone()))
            .await
            .map_err(unavailable("Failed to count rows"))?;

        if existing > 0 {
            table
                .delete(&filter)
                .await
                .map_err(unavailable("Failed to delete document chunks"))?;
        }

        Ok(existing)
    }

    async fn stats(&self) -> Result<IndexStats> {
        let count = match self.open_table().await? {
            Some(table) => table
                .count_rows(None)
                .await
                .map_err(unavailable("Failed to count rows"))?,
            None => 0,
        };

        Ok(IndexStats {
            count,
            dimension: self.dimension,
            backend: self.name().to_string(),
        })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "lancedb"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::document::chunk_id;
    use tempfile::TempDir;

    const DIM: usize = 4;

    fn create_test_chunk(doc: &str, index: usize, embedding: [f32; DIM]) -> Chunk {
        Chunk {
            chunk_id: chunk_id(doc, index),
            text: format!("Test chunk {} for doc {}", index, doc),
            embedding: embedding.to_vec(),
            metadata: ChunkMetadata {
                document_id: doc.to_string(),
                title: format!("Doc {}", doc),
                source: "test".to_string(),
                category: if doc == "nepal" { "Nepal" } else { "AI" }.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_lance_index_basic() {
        let temp_dir = TempDir::new().unwrap();
        let index = LanceVectorIndex::open(&temp_dir.path().join("test.lance"), DIM)
            .await
            .unwrap();

        assert_eq!(index.stats().await.unwrap().count, 0);
        assert!(index.query(&[1.0, 0.0, 0.0, 0.0], 5, None).await.unwrap().is_empty());

        let chunks = vec![
            create_test_chunk("ml", 0, [1.0, 0.0, 0.0, 0.0]),
            create_test_chunk("ml", 1, [0.9, 0.1, 0.0, 0.0]),
        ];
        assert_eq!(index.upsert(&chunks).await.unwrap(), 2);
        assert_eq!(index.stats().await.unwrap().count, 2);

        // 같은 chunk_id 재삽입은 덮어쓰기
        index.upsert(&chunks).await.unwrap();
        assert_eq!(index.stats().await.unwrap().count, 2);
    }

    #[tokio::test]
    async fn test_lance_search() {
        let temp_dir = TempDir::new().unwrap();
        let index = LanceVectorIndex::open(&temp_dir.path().join("search.lance"), DIM)
            .await
            .unwrap();

        index
            .upsert(&[
                create_test_chunk("ml", 0, [1.0, 0.0, 0.0, 0.0]),
                create_test_chunk("python", 0, [0.0, 1.0, 0.0, 0.0]),
                create_test_chunk("nepal", 0, [0.0, 0.0, 1.0, 0.0]),
            ])
            .await
            .unwrap();

        let results = index.query(&[1.0, 0.0, 0.0, 0.0], 2, None).await.unwrap();
        assert!(!results.is_empty());
        assert!(results.len() <= 2);
        assert_eq!(results[0].chunk_id, "ml#0");
        assert!(results[0].score > 0.99);

        let filter = MetadataFilter::by_category("Nepal");
        let results = index
            .query(&[1.0, 0.0, 0.0, 0.0], 5, Some(&filter))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metadata.document_id, "nepal");
    }

    #[tokio::test]
    async fn test_lance_delete() {
        let temp_dir = TempDir::new().unwrap();
        let index = LanceVectorIndex::open(&temp_dir.path().join("delete.lance"), DIM)
            .await
            .unwrap();

        index
            .upsert(&[
                create_test_chunk("ml", 0, [1.0, 0.0, 0.0, 0.0]),
                create_test_chunk("ml", 1, [1.0, 0.0, 0.0, 0.0]),
                create_test_chunk("python", 0, [0.0, 1.0, 0.0, 0.0]),
            ])
            .await
            .unwrap();

        assert_eq!(index.delete_by_document("ml").await.unwrap(), 2);
        assert_eq!(index.stats().await.unwrap().count, 1);
        assert!(index.delete("python#0").await.unwrap());
        assert!(!index.delete("python#0").await.unwrap());
    }

    #[tokio::test]
    async fn test_lance_dimension_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("dims.lance");

        let index = LanceVectorIndex::open(&path, DIM).await.unwrap();
        let err = index
            .upsert(&[Chunk {
                embedding: vec![1.0, 0.0],
                ..create_test_chunk("ml", 0, [1.0, 0.0, 0.0, 0.0])
            }])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { .. }));

        index
            .upsert(&[create_test_chunk("ml", 0, [1.0, 0.0, 0.0, 0.0])])
            .await
            .unwrap();

        // 다른 차원으로 다시 열면 실패
        let reopened = LanceVectorIndex::open(&path, 8).await;
        assert!(matches!(
            reopened,
            Err(RagError::DimensionMismatch { expected: 8, actual: 4 })
        ));
    }

    #[tokio::test]
    async fn test_lance_concurrent_upserts_on_fresh_index() {
        let temp_dir = TempDir::new().unwrap();
        let index = Arc::new(
            LanceVectorIndex::open(&temp_dir.path().join("fresh.lance"), DIM)
                .await
                .unwrap(),
        );

        let writes = (0..4).map(|i| {
            let index = index.clone();
            tokio::spawn(async move {
                index
                    .upsert(&[create_test_chunk("ml", i, [1.0, i as f32, 0.0, 0.0])])
                    .await
            })
        });
        for write in futures::future::join_all(writes).await {
            assert_eq!(write.unwrap().unwrap(), 1);
        }

        assert_eq!(index.stats().await.unwrap().count, 4);
    }

    #[tokio::test]
    async fn test_lance_open_creates_empty_table() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty.lance");

        let index = LanceVectorIndex::open(&path, DIM).await.unwrap();
        assert!(index.table_exists().await.unwrap());

        // 빈 테이블도 차원을 기억
        let reopened = LanceVectorIndex::open(&path, 8).await;
        assert!(matches!(
            reopened,
            Err(RagError::DimensionMismatch { expected: 8, actual: 4 })
        ));
    }

    #[test]
    fn test_filter_to_sql() {
        assert_eq!(filter_to_sql(&MetadataFilter::default()), None);

        let filter = MetadataFilter {
            document_id: None,
            source: Some("O'Reilly".to_string()),
            category: Some("AI".to_string()),
        };
        assert_eq!(
            filter_to_sql(&filter).unwrap(),
            "source = 'O''Reilly' AND category = 'AI'"
        );
    }
}
