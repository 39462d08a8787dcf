//! HTTP 업로드 클라이언트.
//!
//! reqwest 기반. 스냅샷 POST와 헬스 체크 GET만 담당하며,
//! 타임아웃은 호출 경로(동기/백그라운드)마다 요청 단위로 지정한다.

use healthsync_core::error::CoreError;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::{debug, warn};

/// 스냅샷 업로드 경로
const HEALTH_DATA_PATH: &str = "/health-data";
/// 헬스 체크 경로
const HEALTH_PATH: &str = "/health";

/// 재시도해도 결과가 달라질 수 있는 에러인지 판별
///
/// 네트워크 에러, 5xx, 408, 429만 재시도한다.
pub fn is_retryable(error: &CoreError) -> bool {
    match error {
        CoreError::Transport(_) => true,
        CoreError::ServerRejection { status, .. } => {
            *status >= 500 || *status == 408 || *status == 429
        }
        _ => false,
    }
}

/// 수집 서버 HTTP 클라이언트
pub struct HttpUploadClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUploadClient {
    /// 새 클라이언트 생성
    ///
    /// `base_url`은 http/https URL이어야 한다. 끝의 `/`는 제거된다.
    pub fn new(base_url: &str) -> Result<Self, CoreError> {
        let parsed = url::Url::parse(base_url)
            .map_err(|e| CoreError::Config(format!("서버 URL 파싱 실패 ({base_url}): {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(CoreError::Config(format!(
                "지원하지 않는 URL 스킴: {}",
                parsed.scheme()
            )));
        }

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| CoreError::Transport(format!("HTTP 클라이언트 생성 실패: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// 서버 기본 URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 응답 상태 검증: 2xx 이외는 `ServerRejection`
    async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, CoreError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(CoreError::ServerRejection {
            status: status.as_u16(),
            body,
        })
    }

    /// 직렬화된 스냅샷 1건 업로드
    pub async fn post_snapshot(&self, body: Vec<u8>, timeout: Duration) -> Result<(), CoreError> {
        let url = format!("{}{HEALTH_DATA_PATH}", self.base_url);
        let size = body.len();

        let resp = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .timeout(timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| CoreError::Transport(format!("스냅샷 업로드 요청 실패: {e}")))?;

        Self::check_response(resp).await?;
        debug!("스냅샷 업로드 완료: {size}바이트");
        Ok(())
    }

    /// 헬스 체크: 어떤 에러도 `false`로 흡수
    pub async fn probe_health(&self, timeout: Duration) -> bool {
        let url = format!("{}{HEALTH_PATH}", self.base_url);
        match self.client.get(&url).timeout(timeout).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                debug!("헬스 체크 실패 응답: {}", resp.status());
                false
            }
            Err(e) => {
                warn!("헬스 체크 요청 실패: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn rejects_non_http_scheme() {
        assert!(HttpUploadClient::new("ftp://example.com").is_err());
        assert!(HttpUploadClient::new("not a url").is_err());
    }

    #[test]
    fn trailing_slash_trimmed() {
        let client = HttpUploadClient::new("http://localhost:8000/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000");
    }

    #[test]
    fn retryable_classification() {
        assert!(is_retryable(&CoreError::Transport("reset".to_string())));
        assert!(is_retryable(&CoreError::ServerRejection {
            status: 503,
            body: String::new(),
        }));
        assert!(is_retryable(&CoreError::ServerRejection {
            status: 429,
            body: String::new(),
        }));
        assert!(!is_retryable(&CoreError::ServerRejection {
            status: 400,
            body: String::new(),
        }));
        assert!(!is_retryable(&CoreError::Internal("x".to_string())));
    }

    #[tokio::test]
    async fn post_snapshot_sends_json_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/health-data")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::JsonString(
                r#"{"stepCount":1200.0,"isIncremental":false}"#.to_string(),
            ))
            .with_status(201)
            .create_async()
            .await;

        let client = HttpUploadClient::new(&server.url()).unwrap();
        let body = br#"{"stepCount":1200.0,"isIncremental":false}"#.to_vec();
        client.post_snapshot(body, TIMEOUT).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_is_server_rejection() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/health-data")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let client = HttpUploadClient::new(&server.url()).unwrap();
        let err = client.post_snapshot(b"{}".to_vec(), TIMEOUT).await.unwrap_err();
        match err {
            CoreError::ServerRejection { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "overloaded");
            }
            other => panic!("ServerRejection 예상, 실제: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_host_is_transport_error() {
        let client = HttpUploadClient::new("http://127.0.0.1:1").unwrap();
        let err = client
            .post_snapshot(b"{}".to_vec(), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Transport(_)));
    }

    #[tokio::test]
    async fn probe_reflects_status() {
        let mut up = mockito::Server::new_async().await;
        let ok = up
            .mock("GET", "/health")
            .with_status(200)
            .create_async()
            .await;
        let client = HttpUploadClient::new(&up.url()).unwrap();
        assert!(client.probe_health(TIMEOUT).await);
        ok.assert_async().await;

        let mut down = mockito::Server::new_async().await;
        let _err = down
            .mock("GET", "/health")
            .with_status(500)
            .create_async()
            .await;
        let client = HttpUploadClient::new(&down.url()).unwrap();
        assert!(!client.probe_health(TIMEOUT).await);
    }

    #[tokio::test]
    async fn probe_against_unreachable_host_is_false_every_time() {
        let client = HttpUploadClient::new("http://127.0.0.1:1").unwrap();
        assert!(!client.probe_health(Duration::from_secs(2)).await);
        assert!(!client.probe_health(Duration::from_secs(2)).await);
    }
}
