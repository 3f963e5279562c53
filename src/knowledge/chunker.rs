//! Text Chunking Module
//!
//! 문서 본문을 임베딩 가능한 크기의 조각으로 나눕니다.
//! 연속된 청크는 경계 문맥을 유지하도록 일부를 겹칠 수 있습니다.
//!
//! - `WordChunker`: 단어 윈도우 (chunk_size/overlap = 단어 수)
//! - `MarkdownChunker`: 헤더/코드 블록/문단 경계 인식 (chunk_size/overlap = 문자 수)

use regex::Regex;

use crate::config::{ChunkStrategy, ChunkingConfig};
use crate::error::{RagError, Result};

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할 (빈 텍스트는 빈 벡터)
    fn chunk(&self, text: &str) -> Vec<String>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

/// 크기/오버랩 검증
fn check_sizes(size: usize, overlap: usize) -> Result<()> {
    if size == 0 {
        return Err(RagError::Configuration("chunk_size must be at least 1".to_string()));
    }
    if overlap >= size {
        return Err(RagError::Configuration(format!(
            "chunk_overlap ({}) must be smaller than chunk_size ({})",
            overlap, size
        )));
    }
    Ok(())
}

// ============================================================================
// WordChunker
// ============================================================================

/// 단어 윈도우 청커
///
/// `chunk_size` 단어씩 자르고, 다음 윈도우는 `chunk_size - overlap` 단어 뒤에서 시작합니다.
#[derive(Debug, Clone)]
pub struct WordChunker {
    chunk_size: usize,
    overlap: usize,
}

impl WordChunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        check_sizes(chunk_size, overlap)?;
        Ok(Self { chunk_size, overlap })
    }
}

impl Chunker for WordChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        let words: Vec<&str> = text.split_whitespace().collect();

        if words.is_empty() {
            return vec![];
        }

        if words.len() <= self.chunk_size {
            return vec![words.join(" ")];
        }

        let mut chunks = Vec::new();
        let step = self.chunk_size - self.overlap;
        let mut start = 0;

        while start < words.len() {
            let end = (start + self.chunk_size).min(words.len());
            chunks.push(words[start..end].join(" "));

            if end >= words.len() {
                break;
            }
            start += step;
        }

        chunks
    }

    fn name(&self) -> &'static str {
        "WordChunker"
    }
}

// ============================================================================
// MarkdownChunker
// ============================================================================

/// Markdown 인식 청커
///
/// 헤더 경계에서 섹션을 나누고, 긴 섹션은 문단 → 줄 → 단어 순으로 쪼갭니다.
/// 코드 블록 안의 `#` 줄은 헤더로 보지 않습니다.
/// 오버랩은 이전 청크 끝부분을 다음 청크 앞에 붙이는 방식입니다.
#[derive(Debug, Clone)]
pub struct MarkdownChunker {
    max_characters: usize,
    min_characters: usize,
    overlap_characters: usize,
    header_re: Regex,
}

impl MarkdownChunker {
    /// # Arguments
    /// * `max_characters` - 청크 본문 최대 문자 수 (오버랩 제외)
    /// * `overlap_characters` - 다음 청크로 이어붙일 문자 수
    pub fn new(max_characters: usize, overlap_characters: usize) -> Result<Self> {
        check_sizes(max_characters, overlap_characters)?;
        let header_re = Regex::new(r"^#{1,6}\s+")
            .map_err(|e| RagError::Configuration(format!("Invalid header pattern: {}", e)))?;

        Ok(Self {
            max_characters,
            min_characters: max_characters / 4,
            overlap_characters,
            header_re,
        })
    }

    /// 헤더 기준 섹션 분할
    fn split_sections(&self, text: &str) -> Vec<String> {
        let mut sections = Vec::new();
        let mut current = String::new();
        let mut in_code_block = false;

        for line in text.lines() {
            if line.trim_start().starts_with("```") {
                in_code_block = !in_code_block;
            }

            if !in_code_block && self.header_re.is_match(line) && !current.trim().is_empty() {
                sections.push(current.trim().to_string());
                current.clear();
            }

            current.push_str(line);
            current.push('\n');
        }

        if !current.trim().is_empty() {
            sections.push(current.trim().to_string());
        }

        sections
    }

    /// 긴 섹션을 문단 경계에서 분할
    fn split_long_section(&self, section: &str) -> Vec<String> {
        let max = self.max_characters;
        if char_len(section) <= max {
            return vec![section.to_string()];
        }

        let mut chunks = Vec::new();
        let mut current = String::new();

        for para in section.split("\n\n") {
            let para = para.trim();
            if para.is_empty() {
                continue;
            }

            if !current.is_empty() && char_len(&current) + char_len(para) + 2 > max {
                chunks.push(std::mem::take(&mut current));
            }

            if char_len(para) > max {
                // 문단 자체가 크면 줄 단위, 그래도 크면 단어 단위
                for line in para.lines() {
                    for piece in split_to_fit(line, max) {
                        if !current.is_empty() && char_len(&current) + char_len(&piece) + 1 > max {
                            chunks.push(std::mem::take(&mut current));
                        }
                        if !current.is_empty() {
                            current.push('\n');
                        }
                        current.push_str(&piece);
                    }
                }
            } else {
                if !current.is_empty() {
                    current.push_str("\n\n");
                }
                current.push_str(para);
            }
        }

        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
    }

    /// 작은 청크를 다음 청크와 병합 (최대 크기 이내에서)
    fn merge_small_chunks(&self, chunks: Vec<String>) -> Vec<String> {
        let mut result: Vec<String> = Vec::new();

        for chunk in chunks {
            if let Some(last) = result.last_mut() {
                if char_len(last) < self.min_characters
                    && char_len(last) + char_len(&chunk) + 2 <= self.max_characters
                {
                    last.push_str("\n\n");
                    last.push_str(&chunk);
                    continue;
                }
            }
            result.push(chunk);
        }

        result
    }

    /// 이전 청크 끝부분을 단어 경계에서 잘라 앞에 붙임
    fn apply_overlap(&self, chunks: Vec<String>) -> Vec<String> {
        if self.overlap_characters == 0 || chunks.len() < 2 {
            return chunks;
        }

        let mut result = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            if i == 0 {
                result.push(chunk.clone());
                continue;
            }

            let overlap = tail_words(&chunks[i - 1], self.overlap_characters);
            if overlap.is_empty() {
                result.push(chunk.clone());
            } else {
                result.push(format!("{}\n{}", overlap, chunk));
            }
        }
        result
    }
}

impl Chunker for MarkdownChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return vec![];
        }

        let chunks: Vec<String> = self
            .split_sections(text)
            .into_iter()
            .flat_map(|s| self.split_long_section(&s))
            .filter(|c| !c.trim().is_empty())
            .collect();

        let chunks = self.merge_small_chunks(chunks);
        self.apply_overlap(chunks)
    }

    fn name(&self) -> &'static str {
        "MarkdownChunker"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// 한 줄을 max 문자 이하 조각으로 (단어 경계 우선, 긴 단어는 문자 단위)
fn split_to_fit(line: &str, max: usize) -> Vec<String> {
    if char_len(line) <= max {
        return vec![line.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();

    for word in line.split_whitespace() {
        let word_len = char_len(word);

        if word_len > max {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            let chars: Vec<char> = word.chars().collect();
            for part in chars.chunks(max) {
                pieces.push(part.iter().collect());
            }
            continue;
        }

        if !current.is_empty() && char_len(&current) + word_len + 1 > max {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }

    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// 끝에서 최대 `max_chars` 문자, 단어 중간에서 시작하지 않음
fn tail_words(text: &str, max_chars: usize) -> String {
    let total = char_len(text);
    if total <= max_chars {
        return text.trim().to_string();
    }

    let start = text
        .char_indices()
        .nth(total - max_chars)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let tail = &text[start..];

    // 단어 중간이면 다음 공백까지 건너뜀
    let starts_mid_word = text[..start]
        .chars()
        .last()
        .map(|c| !c.is_whitespace())
        .unwrap_or(false);
    let tail = if starts_mid_word {
        match tail.find(char::is_whitespace) {
            Some(p) => &tail[p..],
            None => "",
        }
    } else {
        tail
    };

    tail.trim().to_string()
}

// ============================================================================
// Factory Functions
// ============================================================================

/// 설정에 맞는 청커 생성
pub fn create_chunker(config: &ChunkingConfig) -> Result<Box<dyn Chunker>> {
    match config.strategy {
        ChunkStrategy::Words => Ok(Box::new(WordChunker::new(
            config.chunk_size,
            config.chunk_overlap,
        )?)),
        ChunkStrategy::Markdown => Ok(Box::new(MarkdownChunker::new(
            config.chunk_size,
            config.chunk_overlap,
        )?)),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_chunker_empty() {
        let chunker = WordChunker::new(10, 2).unwrap();
        assert!(chunker.chunk("").is_empty());
        assert!(chunker.chunk("   \n\t").is_empty());
    }

    #[test]
    fn test_word_chunker_short_text() {
        let chunker = WordChunker::new(10, 2).unwrap();
        assert_eq!(chunker.chunk("Machine  learning\nis fun"), vec!["Machine learning is fun"]);
    }

    #[test]
    fn test_word_chunker_overlap() {
        let chunker = WordChunker::new(4, 1).unwrap();
        let chunks = chunker.chunk("a b c d e f g h i j");

        assert_eq!(chunks, vec!["a b c d", "d e f g", "g h i j"]);
    }

    #[test]
    fn test_word_chunker_covers_all_words() {
        let text = (0..57).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        let chunker = WordChunker::new(10, 3).unwrap();
        let chunks = chunker.chunk(&text);

        assert!(chunks.iter().all(|c| c.split_whitespace().count() <= 10));
        assert!(chunks.last().unwrap().ends_with("w56"));
        for i in 0..57 {
            let word = format!("w{}", i);
            assert!(chunks.iter().any(|c| c.split_whitespace().any(|w| w == word)));
        }
    }

    #[test]
    fn test_invalid_sizes() {
        assert!(WordChunker::new(0, 0).is_err());
        assert!(WordChunker::new(5, 5).is_err());
        assert!(MarkdownChunker::new(100, 200).is_err());
    }

    #[test]
    fn test_markdown_chunker_empty() {
        let chunker = MarkdownChunker::new(1200, 100).unwrap();
        assert!(chunker.chunk("").is_empty());
    }

    #[test]
    fn test_markdown_chunker_small_text() {
        let chunker = MarkdownChunker::new(1200, 100).unwrap();
        let chunks = chunker.chunk("# Header\n\nShort paragraph.");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("Header"));
    }

    #[test]
    fn test_markdown_chunker_sections() {
        let chunker = MarkdownChunker::new(40, 0).unwrap();
        let text = "# Section 1\n\nContent for section 1.\n\n# Section 2\n\nContent for section 2.";

        let chunks = chunker.chunk(text);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].starts_with("# Section 1"));
        assert!(chunks[1].starts_with("# Section 2"));
    }

    #[test]
    fn test_markdown_code_block_hash_is_not_header() {
        let chunker = MarkdownChunker::new(200, 0).unwrap();
        let text = "# Intro\n\n```bash\n# install\ncargo build\n```\n\nAfter code.";

        let chunks = chunker.chunk(text);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("# install"));
    }

    #[test]
    fn test_markdown_respects_max_without_overlap() {
        let chunker = MarkdownChunker::new(50, 0).unwrap();
        let text = format!("# Long\n\n{}", "word ".repeat(60));

        let chunks = chunker.chunk(&text);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 50));
    }

    #[test]
    fn test_markdown_overlap_prefixes_previous_tail() {
        let chunker = MarkdownChunker::new(30, 10).unwrap();
        let text = "alpha beta gamma delta epsilon\n\nzeta eta theta iota kappa";

        let chunks = chunker.chunk(text);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].starts_with("epsilon"));
        assert!(chunks[1].ends_with("kappa"));
    }

    #[test]
    fn test_split_to_fit_long_word() {
        let pieces = split_to_fit("abcdefghij", 4);
        assert_eq!(pieces, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_tail_words_multibyte() {
        assert_eq!(tail_words("안녕 세계 하세요", 6), "세계 하세요");
        assert_eq!(tail_words("short", 10), "short");
    }

    #[test]
    fn test_create_chunker() {
        let mut config = ChunkingConfig::default();
        assert_eq!(create_chunker(&config).unwrap().name(), "WordChunker");

        config.strategy = ChunkStrategy::Markdown;
        config.chunk_size = 800;
        config.chunk_overlap = 80;
        assert_eq!(create_chunker(&config).unwrap().name(), "MarkdownChunker");
    }
}
