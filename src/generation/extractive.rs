//! 추출식 생성기 - 모델 없이 컨텍스트 문장을 골라 답변 구성
//!
//! 질문과 겹치는 단어가 가장 많은 문장을 최대 `max_points`개 골라 글머리표로 나열합니다.
//! 결과는 입력에 대해 결정적입니다.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::embedding::tokenize;
use crate::error::Result;

use super::{GenerationModel, GenerationRequest};

/// 너무 짧은 문장은 답변 후보에서 제외
const MIN_SENTENCE_CHARS: usize = 20;

const ANSWER_HEADER: &str = "Based on my knowledge base, here's what I found:";

const NO_PASSAGES_ANSWER: &str =
    "I can only answer from my knowledge base, and it has nothing on this question yet.";

/// 추출식 생성기
#[derive(Debug, Clone)]
pub struct ExtractiveGenerator {
    max_points: usize,
}

impl Default for ExtractiveGenerator {
    fn default() -> Self {
        Self { max_points: 2 }
    }
}

impl ExtractiveGenerator {
    pub fn new(max_points: usize) -> Self {
        Self {
            max_points: max_points.max(1),
        }
    }

    /// 질문과 컨텍스트로 답변 구성
    pub fn answer(&self, question: &str, passages: &[String]) -> String {
        let query_terms: HashSet<String> = tokenize(question).collect();

        let sentences: Vec<&str> = passages
            .iter()
            .flat_map(|p| split_sentences(p))
            .filter(|s| s.chars().count() >= MIN_SENTENCE_CHARS)
            .collect();

        if sentences.is_empty() {
            return NO_PASSAGES_ANSWER.to_string();
        }

        let mut scored: Vec<(usize, usize)> = sentences
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let terms: HashSet<String> = tokenize(s).collect();
                (i, terms.intersection(&query_terms).count())
            })
            .collect();

        // 점수 내림차순, 동점은 원래 순서
        scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let mut picked: Vec<usize> = scored
            .iter()
            .take(self.max_points)
            .map(|(i, _)| *i)
            .collect();
        picked.sort_unstable();

        let mut answer = format!("{}\n", ANSWER_HEADER);
        for i in picked {
            answer.push_str("\n• ");
            answer.push_str(sentences[i]);
        }
        answer
    }
}

/// 줄/문장 경계로 분할 (문장 부호 유지)
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();

    for line in text.lines() {
        let mut start = 0;
        let mut chars = line.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            let at_end = matches!(c, '.' | '!' | '?')
                && chars.peek().map(|(_, next)| next.is_whitespace()).unwrap_or(true);
            if at_end {
                let end = i + c.len_utf8();
                let sentence = line[start..end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = end;
            }
        }
        let rest = line[start..].trim();
        if !rest.is_empty() {
            sentences.push(rest);
        }
    }

    sentences
}

#[async_trait]
impl GenerationModel for ExtractiveGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        Ok(self.answer(&request.question, &request.passages))
    }

    fn name(&self) -> &str {
        "extractive"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sentences() {
        let text = "Machine learning is a subset of AI. It learns from data!\nVersion 1.5 is out";
        assert_eq!(
            split_sentences(text),
            vec![
                "Machine learning is a subset of AI.",
                "It learns from data!",
                "Version 1.5 is out"
            ]
        );
    }

    #[test]
    fn test_picks_overlapping_sentences() {
        let generator = ExtractiveGenerator::default();
        let passages = vec![
            "Kathmandu is the capital city of Nepal. Nepal has eight of the ten highest peaks."
                .to_string(),
            "Machine learning is a subset of artificial intelligence. Deep learning uses neural networks."
                .to_string(),
        ];

        let answer = generator.answer("What is machine learning?", &passages);
        assert!(answer.starts_with(ANSWER_HEADER));
        assert!(answer.contains("• Machine learning is a subset of artificial intelligence."));
        assert!(answer.contains("• Deep learning uses neural networks."));
        assert!(!answer.contains("Kathmandu"));
    }

    #[test]
    fn test_deterministic() {
        let generator = ExtractiveGenerator::new(1);
        let passages = vec!["First long sentence about rust. Second long sentence about go.".to_string()];
        let a = generator.answer("tell me about go", &passages);
        let b = generator.answer("tell me about go", &passages);
        assert_eq!(a, b);
        assert!(a.contains("Second long sentence about go."));
    }

    #[test]
    fn test_no_passages() {
        let generator = ExtractiveGenerator::default();
        assert_eq!(generator.answer("anything", &[]), NO_PASSAGES_ANSWER);
    }
}
