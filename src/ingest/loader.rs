//! 문서 로더 - JSON / 텍스트 / Markdown / PDF 파일을 `NewDocument`로 변환
//!
//! 디렉토리는 `ignore` 크레이트로 순회하므로 .gitignore가 적용됩니다.
//! 파일 문서의 제목은 파일 이름(확장자 제외), source는 파일 이름입니다.

use std::path::Path;

use anyhow::{Context, Result};
use ignore::WalkBuilder;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::knowledge::NewDocument;

/// 지원하는 파일 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// 일반 텍스트 / Markdown
    Text,
    /// PDF (pdf-extract)
    Pdf,
}

impl FileKind {
    /// 확장자로 파일 타입 결정
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "md" | "markdown" | "txt" | "text" | "rst" => Some(FileKind::Text),
            "pdf" => Some(FileKind::Pdf),
            _ => None,
        }
    }
}

/// JSON 파일 형식: 배열, `{"documents": [...]}`, 또는 단일 문서
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonDocuments {
    List(Vec<NewDocument>),
    Wrapped { documents: Vec<NewDocument> },
    Single(NewDocument),
}

/// JSON 문자열에서 문서 목록 파싱
pub fn parse_json_documents(content: &str) -> Result<Vec<NewDocument>> {
    let parsed: JsonDocuments =
        serde_json::from_str(content).context("Failed to parse documents JSON")?;

    Ok(match parsed {
        JsonDocuments::List(docs) => docs,
        JsonDocuments::Wrapped { documents } => documents,
        JsonDocuments::Single(doc) => vec![doc],
    })
}

/// JSON 파일에서 문서 목록 로드
pub fn load_json_file(path: &Path) -> Result<Vec<NewDocument>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read JSON file: {:?}", path))?;
    let docs = parse_json_documents(&content)?;
    tracing::info!("Loaded {} documents from {:?}", docs.len(), path);
    Ok(docs)
}

/// 단일 파일을 문서로 로드
///
/// 지원하지 않는 확장자는 에러입니다.
pub fn load_file(path: &Path, category: &str) -> Result<NewDocument> {
    let kind = FileKind::from_path(path)
        .with_context(|| format!("Unsupported file type: {:?}", path))?;

    let content = match kind {
        FileKind::Text => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read file: {:?}", path))?,
        FileKind::Pdf => extract_pdf_text(path)?,
    };

    let title = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("untitled")
        .to_string();
    let source = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();

    Ok(NewDocument::new(title, content)
        .with_id(file_document_id(path))
        .with_source(source)
        .with_category(category))
}

/// 파일 경로에서 안정적인 문서 ID 생성
///
/// 같은 파일을 다시 수집하면 같은 ID가 되어 기존 청크를 교체합니다.
pub fn file_document_id(path: &Path) -> String {
    let absolute = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let digest = Sha256::digest(absolute.to_string_lossy().as_bytes());
    let hex: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
    format!("file-{}", hex)
}

/// 디렉토리의 지원 파일을 모두 로드 (경로 순)
///
/// 읽기 실패한 파일은 경고 후 건너뜁니다.
pub fn load_dir(dir: &Path, category: &str) -> Result<Vec<NewDocument>> {
    if !dir.is_dir() {
        anyhow::bail!("Not a directory: {:?}", dir);
    }

    let mut paths = Vec::new();
    for entry in WalkBuilder::new(dir).hidden(true).git_ignore(true).build() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("Failed to read entry: {}", e);
                continue;
            }
        };

        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        if FileKind::from_path(entry.path()).is_some() {
            paths.push(entry.path().to_path_buf());
        }
    }
    paths.sort();

    let mut docs = Vec::with_capacity(paths.len());
    for path in paths {
        match load_file(&path, category) {
            Ok(doc) if !doc.content.trim().is_empty() => docs.push(doc),
            Ok(_) => tracing::warn!("Skipping empty file: {:?}", path),
            Err(e) => tracing::warn!("Skipping {:?}: {:#}", path, e),
        }
    }

    tracing::info!("Loaded {} documents from {:?}", docs.len(), dir);
    Ok(docs)
}

/// PDF 텍스트 추출 (공백 정리)
fn extract_pdf_text(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read PDF: {:?}", path))?;
    let text = pdf_extract::extract_text_from_mem(&bytes)
        .with_context(|| format!("Failed to extract text from PDF: {:?}", path))?;

    if text.trim().is_empty() {
        tracing::warn!(
            "No text extracted from PDF: {:?}. It might be a scanned document.",
            path
        );
    }

    Ok(normalize_pdf_text(&text))
}

/// 페이지(폼피드)별 공백 정리 후 문단으로 연결
fn normalize_pdf_text(text: &str) -> String {
    text.split('\x0c')
        .map(|page| page.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|page| !page.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_json_shapes() {
        let list = parse_json_documents(
            r#"[{"title": "ML Basics", "content": "Machine learning...", "source": "test", "category": "AI"},
                {"id": "nepal", "title": "Nepal", "content": "Kathmandu"}]"#,
        )
        .unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].id.as_deref(), Some("nepal"));

        let wrapped = parse_json_documents(r#"{"documents": [{"title": "a", "content": "b"}]}"#).unwrap();
        assert_eq!(wrapped.len(), 1);

        let single = parse_json_documents(r#"{"title": "a", "content": "b"}"#).unwrap();
        assert_eq!(single[0].title, "a");

        assert!(parse_json_documents("not json").is_err());
    }

    #[test]
    fn test_file_kind() {
        assert_eq!(FileKind::from_path(Path::new("notes.MD")), Some(FileKind::Text));
        assert_eq!(FileKind::from_path(Path::new("report.pdf")), Some(FileKind::Pdf));
        assert_eq!(FileKind::from_path(Path::new("image.png")), None);
        assert_eq!(FileKind::from_path(Path::new("Makefile")), None);
    }

    #[test]
    fn test_load_file_metadata() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nepal_overview.md");
        std::fs::write(&path, "# Nepal\n\nKathmandu is the capital.").unwrap();

        let doc = load_file(&path, "Nepal").unwrap();
        assert_eq!(doc.title, "nepal_overview");
        assert_eq!(doc.source, "nepal_overview.md");
        assert_eq!(doc.category, "Nepal");
        assert!(doc.content.contains("Kathmandu"));

        // 같은 파일은 같은 ID
        let again = load_file(&path, "Nepal").unwrap();
        assert_eq!(doc.id, again.id);
        assert!(doc.id.unwrap().starts_with("file-"));
    }

    #[test]
    fn test_load_dir_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.txt"), "second").unwrap();
        std::fs::write(dir.path().join("a.md"), "first").unwrap();
        std::fs::write(dir.path().join("empty.txt"), "   ").unwrap();
        std::fs::write(dir.path().join("skip.png"), [0u8, 1, 2]).unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("c.txt"), "third").unwrap();

        let docs = load_dir(dir.path(), "").unwrap();
        let titles: Vec<&str> = docs.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_load_dir_rejects_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(load_dir(&file, "").is_err());
    }

    #[test]
    fn test_normalize_pdf_text() {
        let text = "Page  1\ncontent\x0c\x0cPage 2   content ";
        assert_eq!(normalize_pdf_text(text), "Page 1 content\n\nPage 2 content");
    }
}
