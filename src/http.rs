//! HTTP 호출 공통 - Rate Limiter + 재시도 POST
//!
//! 임베딩/생성 프로바이더가 함께 사용합니다.
//! 429, 5xx, 전송 실패는 호출자가 허용한 횟수만큼 지수 백오프로 재시도하고
//! 나머지 상태 코드는 즉시 실패합니다.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// 최대 재시도 횟수
pub(crate) const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;

// ============================================================================
// Rate Limiter
// ============================================================================

/// 슬라이딩 윈도우 + 최소 간격 Rate Limiter
#[derive(Debug)]
pub(crate) struct RateLimiter {
    requests: Vec<Instant>,
    max_requests: u32,
    window: Duration,
    min_delay: Duration,
    last_request: Option<Instant>,
}

impl RateLimiter {
    pub(crate) fn new(max_requests: u32, window: Duration, min_delay: Duration) -> Self {
        Self {
            requests: Vec::new(),
            max_requests,
            window,
            min_delay,
            last_request: None,
        }
    }

    /// 요청 가능할 때까지 대기 후 기록
    pub(crate) async fn acquire(&mut self) {
        // 1. 최소 딜레이 (버스트 방지)
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                let wait_time = self.min_delay - elapsed;
                tracing::debug!("Min delay: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        // 2. 윈도우 밖의 오래된 요청 제거
        let now = Instant::now();
        self.requests.retain(|&t| now.duration_since(t) < self.window);

        // 3. 한도 초과 시 가장 오래된 요청이 빠질 때까지 대기
        if self.requests.len() >= self.max_requests as usize {
            if let Some(&oldest) = self.requests.first() {
                let wait_time = self.window.saturating_sub(now.duration_since(oldest));
                if !wait_time.is_zero() {
                    tracing::debug!("Rate limit reached, waiting {:?}", wait_time);
                    tokio::time::sleep(wait_time).await;
                }
                let now = Instant::now();
                self.requests.retain(|&t| now.duration_since(t) < self.window);
            }
        }

        let now = Instant::now();
        self.requests.push(now);
        self.last_request = Some(now);
    }
}

// ============================================================================
// Failures
// ============================================================================

/// API 호출 실패 (호출자가 자신의 RagError 변형으로 매핑)
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ApiFailure {
    /// 연결/전송 실패
    Transport(String),
    /// 비성공 상태 코드
    Status { status: u16, message: String },
    /// 응답 본문 파싱 실패
    Decode(String),
}

impl fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiFailure::Transport(msg) => write!(f, "request failed: {}", msg),
            ApiFailure::Status { status, message } => write!(f, "HTTP {}: {}", status, message),
            ApiFailure::Decode(msg) => write!(f, "invalid response: {}", msg),
        }
    }
}

/// Gemini/OpenAI 공통 에러 응답 형식 `{"error": {"message": ...}}`
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
    #[serde(default)]
    status: Option<String>,
}

/// 에러 본문에서 사람이 읽을 메시지 추출
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => match envelope.error.status {
            Some(status) => format!("{} ({})", envelope.error.message, status),
            None => envelope.error.message,
        },
        Err(_) => body.chars().take(500).collect(),
    }
}

fn is_retryable(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt))
}

// ============================================================================
// POST with retry
// ============================================================================

/// JSON POST 후 응답 역직렬화
///
/// `retries`가 0이면 정확히 한 번만 요청합니다.
/// 질의 경로(질의 임베딩, 답변 생성)는 0, 수집 경로는 [`MAX_RETRIES`]를 넘깁니다.
///
/// # Arguments
/// * `label` - 로그용 호출 이름
/// * `headers` - 추가 헤더 (인증 등)
/// * `limiter` - 매 시도 전에 획득할 Rate Limiter
/// * `retries` - 429, 5xx, 전송 실패 시 추가 시도 횟수
pub(crate) async fn post_json<B, R>(
    client: &reqwest::Client,
    label: &str,
    url: &str,
    headers: &[(&str, &str)],
    body: &B,
    limiter: Option<&Mutex<RateLimiter>>,
    retries: u32,
) -> Result<R, ApiFailure>
where
    B: Serialize + ?Sized,
    R: for<'de> Deserialize<'de>,
{
    let mut last_error = ApiFailure::Transport(format!("{} was not attempted", label));

    for attempt in 0..=retries {
        if let Some(limiter) = limiter {
            limiter.lock().await.acquire().await;
        }

        let mut request = client.post(url).json(body);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                last_error = ApiFailure::Transport(e.to_string());
                if attempt < retries {
                    let wait = backoff(attempt);
                    tracing::warn!(
                        "{} request failed, retrying in {:?} (attempt {}/{})",
                        label,
                        wait,
                        attempt + 1,
                        retries
                    );
                    tokio::time::sleep(wait).await;
                    continue;
                }
                break;
            }
        };

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ApiFailure::Transport(format!("failed to read response body: {}", e)))?;

        if status.is_success() {
            return serde_json::from_str(&text).map_err(|e| ApiFailure::Decode(e.to_string()));
        }

        let failure = ApiFailure::Status {
            status: status.as_u16(),
            message: error_message(&text),
        };

        if !is_retryable(status.as_u16()) {
            return Err(failure);
        }

        last_error = failure;
        if attempt < retries {
            let wait = backoff(attempt);
            tracing::warn!(
                "{} returned {}, backing off {:?} (attempt {}/{})",
                label,
                status,
                wait,
                attempt + 1,
                retries
            );
            tokio::time::sleep(wait).await;
        }
    }

    Err(last_error)
}

/// HTTP 클라이언트 생성
pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| format!("Failed to create HTTP client: {}", e))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_error_message_from_envelope() {
        let body = r#"{"error": {"code": 400, "message": "API key not valid", "status": "INVALID_ARGUMENT"}}"#;
        assert_eq!(error_message(body), "API key not valid (INVALID_ARGUMENT)");

        let body = r#"{"error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}}"#;
        assert_eq!(error_message(body), "Incorrect API key provided");

        assert_eq!(error_message("plain text"), "plain text");
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(429));
        assert!(is_retryable(503));
        assert!(!is_retryable(400));
        assert!(!is_retryable(401));
    }

    #[test]
    fn test_backoff_grows() {
        assert_eq!(backoff(0), Duration::from_millis(2000));
        assert_eq!(backoff(2), Duration::from_millis(8000));
    }

    #[tokio::test]
    async fn test_rate_limiter_min_delay() {
        let mut limiter = RateLimiter::new(100, Duration::from_secs(60), Duration::from_millis(20));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    /// 항상 503을 돌려주는 로컬 서버. 받은 요청 수를 센다.
    async fn overloaded_server() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = vec![0u8; 8192];
                let _ = socket.read(&mut buf).await;
                let body = r#"{"error": {"message": "overloaded"}}"#;
                let response = format!(
                    "HTTP/1.1 503 Service Unavailable\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}/v1/generate", addr), hits)
    }

    #[tokio::test]
    async fn test_post_json_without_retries_sends_once() {
        let (url, hits) = overloaded_server().await;
        let client = build_client(Duration::from_secs(5)).unwrap();

        let result: Result<serde_json::Value, ApiFailure> = post_json(
            &client,
            "test",
            &url,
            &[],
            &serde_json::json!({"prompt": "hi"}),
            None,
            0,
        )
        .await;

        match result {
            Err(ApiFailure::Status { status, message }) => {
                assert_eq!(status, 503);
                assert_eq!(message, "overloaded");
            }
            other => panic!("expected 503 failure, got {:?}", other),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_post_json_retries_on_overload() {
        let (url, hits) = overloaded_server().await;
        let client = build_client(Duration::from_secs(5)).unwrap();

        let result: Result<serde_json::Value, ApiFailure> = post_json(
            &client,
            "test",
            &url,
            &[],
            &serde_json::json!({"input": "doc"}),
            None,
            1,
        )
        .await;

        assert!(matches!(result, Err(ApiFailure::Status { status: 503, .. })));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
