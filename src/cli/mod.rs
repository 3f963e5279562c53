//! CLI 모듈
//!
//! rag-chatbot 명령어 정의 및 구현. 라이브러리 위의 얇은 래퍼입니다.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{get_data_dir, IndexBackend, RagConfig};
use crate::ingest::loader::{load_dir, load_file, load_json_file};
use crate::ingest::AddDocumentsReport;
use crate::knowledge::{DocumentCatalog, MetadataFilter, NewDocument};
use crate::rag::{RagPipeline, RetrievalOptions};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "rag-chatbot")]
#[command(version, about = "근거 기반 RAG 챗봇", long_about = None)]
pub struct Cli {
    /// 설정 파일 경로 (기본: <data_dir>/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// 자격 증명 없이 로컬 임베딩/추출식 답변 사용
    #[arg(long, global = true)]
    pub offline: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 파일, 폴더, JSON, 또는 텍스트를 지식베이스에 추가
    Ingest {
        /// 수집할 파일 경로 (txt, md, pdf)
        #[arg(long)]
        file: Option<PathBuf>,

        /// 수집할 폴더 경로 (재귀, .gitignore 적용)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// 문서 배열 JSON 파일
        #[arg(long)]
        json: Option<PathBuf>,

        /// 직접 입력할 텍스트 (--title 필요)
        #[arg(short, long)]
        text: Option<String>,

        /// --text 문서의 제목
        #[arg(long)]
        title: Option<String>,

        /// --text 문서의 ID (기본: 자동 생성)
        #[arg(long)]
        id: Option<String>,

        /// 카테고리 태그
        #[arg(long)]
        category: Option<String>,

        /// source 덮어쓰기
        #[arg(short, long)]
        source: Option<String>,

        /// 강제 재수집 (내용이 같아도 다시 임베딩)
        #[arg(long)]
        force: bool,
    },

    /// 질문하기
    Chat {
        /// 질문
        message: String,

        /// 사용할 컨텍스트 수
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// 유사도 임계값 (0.0 ~ 1.0)
        #[arg(long)]
        threshold: Option<f32>,

        /// 카테고리 필터
        #[arg(long)]
        category: Option<String>,
    },

    /// 저장된 문서 목록
    List {
        /// 카테고리 필터
        #[arg(long)]
        category: Option<String>,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 문서 삭제
    Delete {
        /// 삭제할 문서 ID
        #[arg(long)]
        id: Option<String>,

        /// 같은 source의 문서 모두 삭제
        #[arg(short, long)]
        source: Option<String>,
    },

    /// 지식베이스 통계
    Stats,

    /// 준비 상태 확인
    Health,

    /// 적용 중인 설정 출력 (TOML)
    Config,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Ingest {
            file,
            dir,
            json,
            text,
            title,
            id,
            category,
            source,
            force,
        } => {
            let input = IngestInput {
                file,
                dir,
                json,
                text,
                title,
                id,
            };
            cmd_ingest(config, input, category, source, force).await
        }
        Commands::Chat {
            message,
            top_k,
            threshold,
            category,
        } => cmd_chat(config, &message, top_k, threshold, category).await,
        Commands::List { category, limit } => cmd_list(&config, category, limit),
        Commands::Delete { id, source } => cmd_delete(config, id, source).await,
        Commands::Stats => cmd_stats(config).await,
        Commands::Health => cmd_health(config).await,
        Commands::Config => cmd_config(&config),
    }
}

/// 설정 로드 (+ --offline 적용)
fn load_config(cli: &Cli) -> Result<RagConfig> {
    RagConfig::load_with(cli.config.as_deref(), cli.offline).context("설정 로드 실패")
}

/// 영속 카탈로그를 쓸 수 있는 인덱스인지 (메모리 인덱스는 프로세스마다 비어 있음)
fn uses_catalog(config: &RagConfig) -> bool {
    config.index.backend != IndexBackend::Memory
}

/// 파이프라인 생성 (영속 인덱스면 카탈로그 연결)
async fn open_pipeline(config: RagConfig, force: bool) -> Result<RagPipeline> {
    let with_catalog = uses_catalog(&config);
    let pipeline = RagPipeline::from_config(config)
        .await
        .context("파이프라인 초기화 실패")?;

    if !with_catalog {
        tracing::info!("Memory index in use, document catalog disabled");
        return Ok(pipeline);
    }

    let catalog = DocumentCatalog::open_default().context("문서 카탈로그 열기 실패")?;
    Ok(pipeline
        .with_catalog(Arc::new(catalog))
        .skip_unchanged(!force))
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 수집 대상 (하나만 지정)
struct IngestInput {
    file: Option<PathBuf>,
    dir: Option<PathBuf>,
    json: Option<PathBuf>,
    text: Option<String>,
    title: Option<String>,
    id: Option<String>,
}

impl IngestInput {
    fn load(self, category: &str) -> Result<Vec<NewDocument>> {
        let given = [
            self.file.is_some(),
            self.dir.is_some(),
            self.json.is_some(),
            self.text.is_some(),
        ]
        .iter()
        .filter(|b| **b)
        .count();
        if given != 1 {
            bail!("--file, --dir, --json, --text 중 하나만 지정해야 합니다");
        }

        if let Some(path) = self.file {
            return Ok(vec![load_file(&path, category)?]);
        }
        if let Some(path) = self.dir {
            return load_dir(&path, category);
        }
        if let Some(path) = self.json {
            let docs = load_json_file(&path)?
                .into_iter()
                .map(|d| {
                    if d.category.is_empty() && !category.is_empty() {
                        d.with_category(category)
                    } else {
                        d
                    }
                })
                .collect();
            return Ok(docs);
        }

        let text = self.text.unwrap_or_default();
        let title = self
            .title
            .context("--text에는 --title이 필요합니다")?;
        let mut doc = NewDocument::new(title, text)
            .with_source("direct-input")
            .with_category(category);
        if let Some(id) = self.id {
            doc = doc.with_id(id);
        }
        Ok(vec![doc])
    }
}

/// 문서 수집 명령어 (ingest)
async fn cmd_ingest(
    config: RagConfig,
    input: IngestInput,
    category: Option<String>,
    source: Option<String>,
    force: bool,
) -> Result<()> {
    let category = category.unwrap_or_default();
    let mut docs = input.load(&category)?;

    if let Some(source) = source {
        docs = docs.into_iter().map(|d| d.with_source(source.clone())).collect();
    }

    if docs.is_empty() {
        println!("[!] 수집할 문서가 없습니다.");
        return Ok(());
    }

    let total_bytes: usize = docs.iter().map(|d| d.content.len()).sum();
    println!(
        "[*] 수집 대상: {} 문서 ({})",
        docs.len(),
        format_bytes(total_bytes)
    );

    let pipeline = open_pipeline(config, force).await?;
    let report = pipeline.add_documents(docs).await;

    print_ingest_report(&report);

    if !report.failed.is_empty() && report.succeeded.is_empty() && report.skipped.is_empty() {
        bail!("모든 문서 수집 실패");
    }
    Ok(())
}

fn print_ingest_report(report: &AddDocumentsReport) {
    for r in &report.reports {
        if r.skipped {
            println!("  [=] {} (변경 없음, 건너뜀)", r.document_id);
        } else if r.is_complete() {
            println!("  [OK] {} ({} 청크)", r.document_id, r.chunk_count);
        } else {
            println!(
                "  [!] {} ({}/{} 청크 실패)",
                r.document_id,
                r.failed.len(),
                r.chunk_count
            );
        }
    }
    for f in &report.failed {
        println!("  [X] {} [{}]: {}", f.id, f.code, truncate_text(&f.error, 120));
    }

    println!();
    println!(
        "[OK] 완료: 성공 {}, 실패 {}, 건너뜀 {}",
        report.succeeded.len(),
        report.failed.len(),
        report.skipped.len()
    );
}

/// 질문 명령어 (chat)
async fn cmd_chat(
    config: RagConfig,
    message: &str,
    top_k: Option<usize>,
    threshold: Option<f32>,
    category: Option<String>,
) -> Result<()> {
    let pipeline = open_pipeline(config, false).await?;

    let options = RetrievalOptions {
        top_k,
        similarity_threshold: threshold,
        filter: category.map(MetadataFilter::by_category),
    };

    let response = pipeline
        .chat_with(message, &options)
        .await
        .context("답변 생성 실패")?;

    println!("{}", response.answer);

    if response.used_context {
        println!("\n[*] 출처 ({} 건):", response.sources.len());
        for (i, source) in response.sources.iter().enumerate() {
            let origin = if source.source.is_empty() {
                "-"
            } else {
                source.source.as_str()
            };
            println!(
                "  {}. [점수: {:.4}] {} ({})",
                i + 1,
                source.score,
                truncate_text(&source.title, 60),
                origin
            );
        }
    } else {
        println!("\n[!] 관련 문서를 찾지 못했습니다.");
    }

    Ok(())
}

/// 목록 명령어 (list)
fn cmd_list(config: &RagConfig, category: Option<String>, limit: usize) -> Result<()> {
    if !uses_catalog(config) {
        bail!("메모리 인덱스는 문서 카탈로그를 사용하지 않습니다 (index.backend = \"lance\" 필요)");
    }

    let catalog = DocumentCatalog::open_default().context("문서 카탈로그 열기 실패")?;

    let entries = catalog
        .list(limit, category.as_deref())
        .context("문서 목록 조회 실패")?;

    if entries.is_empty() {
        println!("[!] 저장된 문서가 없습니다.");
        return Ok(());
    }

    println!("[OK] 저장된 문서 ({} 건):\n", entries.len());

    for entry in entries {
        let category = if entry.category.is_empty() {
            "-"
        } else {
            entry.category.as_str()
        };

        println!("  {} [{}] {}", entry.id, category, truncate_text(&entry.title, 40));
        if !entry.source.is_empty() {
            println!("        source: {}", entry.source);
        }
        println!(
            "        {} | {} chunks",
            entry.updated_at.format("%Y-%m-%d %H:%M"),
            entry.chunk_count
        );
        println!();
    }

    Ok(())
}

/// 삭제 명령어 (delete)
async fn cmd_delete(config: RagConfig, id: Option<String>, source: Option<String>) -> Result<()> {
    let pipeline = open_pipeline(config, false).await?;

    match (id, source) {
        (Some(id), None) => {
            let removed = pipeline
                .delete_document(&id)
                .await
                .context("문서 삭제 실패")?;
            if removed == 0 {
                println!("[!] ID '{}'의 청크가 인덱스에 없습니다", id);
            } else {
                println!("[OK] 문서 {} 삭제됨 ({} 청크)", id, removed);
            }
        }
        (None, Some(source)) => {
            let deleted = pipeline
                .delete_by_source(&source)
                .await
                .context("문서 삭제 실패")?;
            if deleted.is_empty() {
                println!("[!] source '{}'인 문서를 찾을 수 없습니다", source);
            } else {
                println!("[OK] {} 문서 삭제됨: {}", deleted.len(), deleted.join(", "));
            }
        }
        _ => bail!("--id 또는 --source 중 하나를 지정해야 합니다"),
    }

    Ok(())
}

/// 통계 명령어 (stats)
async fn cmd_stats(config: RagConfig) -> Result<()> {
    println!("rag-chatbot v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("[*] 데이터 디렉토리: {}", get_data_dir().display());

    let pipeline = open_pipeline(config, false).await?;
    let stats = pipeline.stats().await.context("통계 조회 실패")?;

    println!("[OK] 벡터 인덱스: {} ({} 청크, {}차원)", stats.index_backend, stats.chunk_count, stats.dimension);
    println!("[OK] 임베딩 모델: {}", stats.embedding_model);
    println!("[OK] 생성 모델: {}", stats.generation_model);

    if let Some(catalog) = pipeline.catalog() {
        match catalog.stats() {
            Ok(c) => {
                let size = std::fs::metadata(&c.db_path)
                    .map(|m| m.len() as usize)
                    .unwrap_or(0);
                println!(
                    "[OK] 문서 카탈로그: {} 문서, {} 청크 ({})",
                    c.document_count,
                    c.total_chunks,
                    format_bytes(size)
                );
            }
            Err(e) => println!("[!] 카탈로그 통계 조회 실패: {:#}", e),
        }
    }

    Ok(())
}

/// 상태 명령어 (health)
async fn cmd_health(config: RagConfig) -> Result<()> {
    let pipeline = RagPipeline::from_config(config)
        .await
        .context("파이프라인 초기화 실패")?;

    let status = pipeline.health().await;
    if status.ready {
        println!("[OK] ready");
        Ok(())
    } else {
        bail!(
            "not ready: {}",
            status.reason.unwrap_or_else(|| "unknown".to_string())
        )
    }
}

/// 설정 출력 명령어 (config)
fn cmd_config(config: &RagConfig) -> Result<()> {
    let toml = config.to_toml().context("설정 직렬화 실패")?;
    println!("{}", toml);
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전, 한 줄로)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> IngestInput {
        IngestInput {
            file: None,
            dir: None,
            json: None,
            text: None,
            title: None,
            id: None,
        }
    }

    #[test]
    fn test_cli_parses_chat() {
        let cli = Cli::try_parse_from(["rag-chatbot", "--offline", "chat", "What is ML?", "-k", "2"])
            .unwrap();
        assert!(cli.offline);
        match cli.command {
            Commands::Chat { message, top_k, .. } => {
                assert_eq!(message, "What is ML?");
                assert_eq!(top_k, Some(2));
            }
            _ => panic!("expected chat"),
        }
    }

    #[test]
    fn test_ingest_text_requires_title() {
        let mut i = input();
        i.text = Some("body".to_string());
        assert!(i.load("").is_err());

        let mut i = input();
        i.text = Some("body".to_string());
        i.title = Some("Title".to_string());
        i.id = Some("doc-1".to_string());
        let docs = i.load("AI").unwrap();
        assert_eq!(docs[0].id.as_deref(), Some("doc-1"));
        assert_eq!(docs[0].category, "AI");
        assert_eq!(docs[0].source, "direct-input");
    }

    #[test]
    fn test_ingest_requires_exactly_one_input() {
        assert!(input().load("").is_err());

        let mut i = input();
        i.text = Some("body".to_string());
        i.file = Some(PathBuf::from("a.txt"));
        assert!(i.load("").is_err());
    }

    #[test]
    fn test_memory_index_runs_without_catalog() {
        let mut config = RagConfig::offline();
        assert!(uses_catalog(&config));

        config.index.backend = IndexBackend::Memory;
        assert!(!uses_catalog(&config));
        assert!(cmd_list(&config, None, 10).is_err());
    }

    #[tokio::test]
    async fn test_memory_pipeline_has_no_catalog() {
        let mut config = RagConfig::offline();
        config.index.backend = IndexBackend::Memory;

        let pipeline = open_pipeline(config, false).await.unwrap();
        assert!(pipeline.catalog().is_none());

        let report = pipeline
            .add_documents(vec![NewDocument::new("Everest", "Mount Everest is in Nepal").with_id("e")])
            .await;
        assert_eq!(report.succeeded, vec!["e"]);
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
        assert_eq!(truncate_text("안녕하세요 세계", 5), "안녕하세요...");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }
}
