use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::FetchConfig;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("response too large: {0} bytes")]
    TooLarge(u64),
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },
}

/// Anything that can hand back the HTML of a page.
///
/// A `None` means "skip this URL"; implementations log the reason themselves.
pub trait PageSource: Send + Sync {
    fn fetch_page(&self, url: &str) -> impl Future<Output = Option<String>> + Send;
}

pub struct HttpClient {
    client: Client,
    max_response_bytes: usize,
}

impl HttpClient {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| FetchError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            let header_value = HeaderValue::from_str(value).map_err(|e| FetchError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
            headers.insert(header_name, header_value);
        }

        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.timeout())
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self {
            client,
            max_response_bytes: config.max_response_bytes,
        })
    }

    /// Single GET; only `200 OK` counts as success. Never retries.
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status(status.as_u16()));
        }

        if let Some(content_length) = response.content_length()
            && content_length > self.max_response_bytes as u64
        {
            return Err(FetchError::TooLarge(content_length));
        }

        let body = response.bytes().await?;
        if body.len() > self.max_response_bytes {
            return Err(FetchError::TooLarge(body.len() as u64));
        }

        // The site does not always declare its charset; pages are UTF-8.
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

impl PageSource for HttpClient {
    async fn fetch_page(&self, url: &str) -> Option<String> {
        match self.fetch(url).await {
            Ok(body) => {
                debug!(url, bytes = body.len(), "fetched page");
                Some(body)
            }
            Err(e) => {
                warn!(url, error = %e, "failed to fetch page");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    use crate::config::DEFAULT_USER_AGENT;

    /// Serves one canned HTTP response per accepted connection.
    async fn serve(responses: Vec<String>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for response in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 4096];
                let _ = socket.read(&mut buf).await.unwrap();
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
        });
        format!("http://{addr}/page/1.html")
    }

    fn response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    #[tokio::test]
    async fn test_fetch_ok_decodes_utf8() {
        let url = serve(vec![response("200 OK", "<p>片名：测试</p>")]).await;
        let client = HttpClient::new(&FetchConfig::default()).unwrap();
        assert_eq!(client.fetch(&url).await.unwrap(), "<p>片名：测试</p>");
    }

    #[tokio::test]
    async fn test_non_200_is_absent() {
        let url = serve(vec![
            response("404 Not Found", "missing"),
            response("204 No Content", ""),
        ])
        .await;
        let client = HttpClient::new(&FetchConfig::default()).unwrap();

        assert!(matches!(client.fetch(&url).await, Err(FetchError::Status(404))));
        assert_eq!(client.fetch_page(&url).await, None);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let url = serve(vec![response("200 OK", "0123456789")]).await;
        let config = FetchConfig {
            max_response_bytes: 4,
            ..FetchConfig::default()
        };
        let client = HttpClient::new(&config).unwrap();
        assert!(matches!(client.fetch(&url).await, Err(FetchError::TooLarge(10))));
    }

    #[tokio::test]
    async fn test_connection_refused_is_absent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpClient::new(&FetchConfig::default()).unwrap();
        assert_eq!(client.fetch_page(&format!("http://{addr}/")).await, None);
    }

    #[tokio::test]
    async fn test_sends_browser_headers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (request_tx, request_rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request: Vec<u8> = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response("200 OK", "ok").as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            let _ = request_tx.send(String::from_utf8_lossy(&request).to_lowercase());
        });

        let config = FetchConfig::default();
        let client = HttpClient::new(&config).unwrap();
        let body = client.fetch_page(&format!("http://{addr}/page/1.html")).await;
        assert_eq!(body.as_deref(), Some("ok"));

        let request = request_rx.await.unwrap();
        assert!(request.starts_with("get /page/1.html http/1.1\r\n"));
        let user_agent = format!("user-agent: {}\r\n", DEFAULT_USER_AGENT.to_lowercase());
        assert!(request.contains(&user_agent));
        for (name, value) in &config.headers {
            let line = format!("{name}: {value}\r\n").to_lowercase();
            assert!(request.contains(&line), "missing header line {line:?}");
        }
        assert!(request.contains("accept-language: zh-cn"));
    }

    #[tokio::test]
    async fn test_unresponsive_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (done_tx, done_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            // Hold the connection open without ever answering.
            let (_socket, _) = listener.accept().await.unwrap();
            let _ = done_rx.await;
        });

        let config = FetchConfig {
            timeout_secs: 1,
            ..FetchConfig::default()
        };
        let client = HttpClient::new(&config).unwrap();
        let started = std::time::Instant::now();

        assert_eq!(client.fetch_page(&format!("http://{addr}/")).await, None);
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
        let _ = done_tx.send(());
    }

    #[test]
    fn test_invalid_header_rejected() {
        let mut config = FetchConfig::default();
        config.headers.insert("bad header".to_string(), "x".to_string());
        assert!(matches!(
            HttpClient::new(&config),
            Err(FetchError::InvalidHeader { .. })
        ));
    }
}
