use color_eyre::{eyre::eyre, Result};
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde_json::Value;
use std::future::Future;
use tracing::debug;
use url::Url;

use crate::config::{Config, ProviderConfig};
use crate::error::RemoteError;

/// A provider endpoint that answers query bodies with JSON records.
pub trait RemoteSource: Send + Sync {
  /// POST `body` to `endpoint` and return the records in the response.
  fn query(
    &self,
    endpoint: &str,
    body: &str,
  ) -> impl Future<Output = Result<Vec<Value>, RemoteError>> + Send;
}

/// IGDB v4 API client
#[derive(Clone)]
pub struct IgdbClient {
  http: reqwest::Client,
  base: Url,
  client_id: String,
  token: String,
}

impl IgdbClient {
  pub fn new(config: &ProviderConfig) -> Result<Self> {
    let token = Config::get_access_token()?;
    Self::with_token(config, token)
  }

  pub fn with_token(config: &ProviderConfig, token: String) -> Result<Self> {
    let base =
      base_url(&config.url).map_err(|e| eyre!("Invalid provider url {}: {}", config.url, e))?;

    let http = reqwest::Client::builder()
      .timeout(config.timeout())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base,
      client_id: config.client_id.clone(),
      token,
    })
  }

  pub fn endpoint_url(&self, endpoint: &str) -> Result<Url, url::ParseError> {
    self.base.join(endpoint)
  }
}

// Url::join drops the last path segment unless it ends with '/'
fn base_url(url: &str) -> Result<Url, url::ParseError> {
  if url.ends_with('/') {
    Url::parse(url)
  } else {
    Url::parse(&format!("{}/", url))
  }
}

impl RemoteSource for IgdbClient {
  async fn query(&self, endpoint: &str, body: &str) -> Result<Vec<Value>, RemoteError> {
    let transport = |message: String| RemoteError::Transport {
      endpoint: endpoint.to_string(),
      message,
    };

    let url = self
      .endpoint_url(endpoint)
      .map_err(|e| transport(e.to_string()))?;
    debug!(%url, body, "Querying provider");

    let response = self
      .http
      .post(url)
      .header("Client-ID", &self.client_id)
      .header(ACCEPT, "application/json")
      .bearer_auth(&self.token)
      .body(body.to_string())
      .send()
      .await
      .map_err(|e| transport(e.to_string()))?;

    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
      return Err(RemoteError::RateLimited {
        endpoint: endpoint.to_string(),
      });
    }
    if !status.is_success() {
      let message = response.text().await.unwrap_or_default();
      return Err(RemoteError::Status {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        message,
      });
    }

    response
      .json::<Vec<Value>>()
      .await
      .map_err(|e| RemoteError::InvalidResponse {
        endpoint: endpoint.to_string(),
        message: e.to_string(),
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::TcpListener;
  use tokio::sync::oneshot;

  /// Answer a single HTTP request with `status` and `body`, handing the raw
  /// request back through the returned channel.
  async fn serve_once(status: &str, body: &str) -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let response = format!(
      "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
      status,
      body.len(),
      body
    );
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
      let (mut socket, _) = listener.accept().await.unwrap();
      let mut request = Vec::new();
      let mut buf = [0u8; 1024];
      while !request_complete(&request) {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
          break;
        }
        request.extend_from_slice(&buf[..n]);
      }
      socket.write_all(response.as_bytes()).await.unwrap();
      socket.shutdown().await.ok();
      let _ = tx.send(String::from_utf8_lossy(&request).into_owned());
    });

    (format!("http://{}/v4", addr), rx)
  }

  fn request_complete(request: &[u8]) -> bool {
    let text = String::from_utf8_lossy(request);
    let Some((head, body)) = text.split_once("\r\n\r\n") else {
      return false;
    };
    let length = head
      .lines()
      .filter_map(|line| line.split_once(':'))
      .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
      .and_then(|(_, value)| value.trim().parse::<usize>().ok())
      .unwrap_or(0);
    body.len() >= length
  }

  fn client(url: String) -> IgdbClient {
    let config = ProviderConfig {
      url,
      client_id: "client-123".to_string(),
      timeout_secs: 5,
      ..ProviderConfig::default()
    };
    IgdbClient::with_token(&config, "secret".to_string()).unwrap()
  }

  #[tokio::test]
  async fn test_query_posts_body_with_credentials() {
    let (url, request) = serve_once("200 OK", r#"[{"id":1942,"name":"The Witcher 3"}]"#).await;

    let records = client(url)
      .query("games", "fields *; where id = 1942; limit 1;")
      .await
      .unwrap();
    assert_eq!(records, vec![json!({"id": 1942, "name": "The Witcher 3"})]);

    let request = request.await.unwrap();
    assert!(request.starts_with("POST /v4/games "));
    assert!(request.to_ascii_lowercase().contains("client-id: client-123"));
    assert!(request.contains("Bearer secret"));
    assert!(request.ends_with("fields *; where id = 1942; limit 1;"));
  }

  #[tokio::test]
  async fn test_too_many_requests_is_rate_limited() {
    let (url, _request) = serve_once("429 Too Many Requests", "").await;

    let err = client(url)
      .query("games", "fields *; where id = 1; limit 1;")
      .await
      .unwrap_err();
    assert_eq!(
      err,
      RemoteError::RateLimited {
        endpoint: "games".to_string()
      }
    );
    assert!(err.is_rate_limited());
  }

  #[tokio::test]
  async fn test_server_error_keeps_status_and_message() {
    let (url, _request) = serve_once("500 Internal Server Error", "boom").await;

    let err = client(url).query("games", "fields *;").await.unwrap_err();
    assert_eq!(
      err,
      RemoteError::Status {
        endpoint: "games".to_string(),
        status: 500,
        message: "boom".to_string(),
      }
    );
  }

  #[test]
  fn test_endpoint_url_keeps_version_segment() {
    let base = base_url("https://api.igdb.com/v4").unwrap();
    assert_eq!(
      base.join("games").unwrap().as_str(),
      "https://api.igdb.com/v4/games"
    );

    let base = base_url("http://localhost:9000/v4/").unwrap();
    assert_eq!(
      base.join("platform_logos").unwrap().as_str(),
      "http://localhost:9000/v4/platform_logos"
    );
  }

  #[test]
  fn test_rejects_invalid_url() {
    assert!(base_url("not a url").is_err());
  }
}
