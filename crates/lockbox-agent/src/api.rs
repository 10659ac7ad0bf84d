//! HTTP implementation of [`ConfigApi`].
//!
//! Issues `GET {api_url}/config` against whatever API base the
//! [`EnvironmentService`] currently resolves to, so an environment switch
//! takes effect on the very next fetch.

use std::sync::Arc;
use std::time::Duration;

use lockbox_core::api::ConfigApi;
use lockbox_core::environment::EnvironmentService;
use lockbox_core::error::ConfigApiError;
use lockbox_core::model::ServerConfigResponse;
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use tracing::debug;

use crate::error::AgentError;

/// Fetches server configuration over HTTPS.
#[derive(Debug)]
pub struct HttpConfigApi {
    client: reqwest::Client,
    environment: Arc<EnvironmentService>,
}

impl HttpConfigApi {
    /// Build a client with the given per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::HttpClient`] if the TLS backend fails to
    /// initialize.
    pub fn new(
        environment: Arc<EnvironmentService>,
        timeout: Duration,
    ) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("lockbox-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AgentError::HttpClient {
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            environment,
        })
    }

    fn config_url(&self) -> String {
        format!("{}/config", self.environment.urls().api_url())
    }
}

#[async_trait::async_trait]
impl ConfigApi for HttpConfigApi {
    async fn get(&self) -> Result<Option<ServerConfigResponse>, ConfigApiError> {
        let url = self.config_url();
        debug!(url = %url, "fetching server config");

        let resp = self
            .client
            .get(&url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| ConfigApiError::Transport {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_FOUND {
            debug!(url = %url, status = status.as_u16(), "server has no config");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ConfigApiError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body = resp.bytes().await.map_err(|e| ConfigApiError::Transport {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        // A literal `null` body decodes to `None` as well.
        serde_json::from_slice(&body).map_err(|e| ConfigApiError::Decode {
            url,
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use lockbox_core::environment::EnvironmentUrls;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    use super::*;

    /// Serve one canned HTTP response and report the request line.
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0_u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).into_owned();
            let _ = tx.send(request.lines().next().unwrap_or_default().to_owned());

            let head = format!("HTTP/1.1 {status}\r\ncontent-type: application/json\r\n");
            let response = format!(
                "{head}content-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        (format!("http://{addr}"), rx)
    }

    fn api_for(base: &str) -> HttpConfigApi {
        let environment = Arc::new(EnvironmentService::new(EnvironmentUrls {
            base: Some(base.to_owned()),
            ..EnvironmentUrls::default()
        }));
        HttpConfigApi::new(environment, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn decodes_config_response() {
        let (base, request) = serve_once(
            "200 OK",
            r#"{"version":"2024.2.0","gitHash":"abc123","server":null,
               "featureStates":{"autofill-v2":true,"limit":3}}"#,
        )
        .await;

        let response = api_for(&base).get().await.unwrap().unwrap();
        assert_eq!(response.git_hash, "abc123");
        assert_eq!(response.version, "2024.2.0");
        assert_eq!(response.feature_states["autofill-v2"], serde_json::json!(true));
        assert_eq!(request.await.unwrap(), "GET /api/config HTTP/1.1");
    }

    #[tokio::test]
    async fn null_fields_do_not_discard_the_config() {
        let (base, _) = serve_once(
            "200 OK",
            r#"{"version":null,"gitHash":"abc123","featureStates":null}"#,
        )
        .await;

        let response = api_for(&base).get().await.unwrap().unwrap();
        assert_eq!(response.git_hash, "abc123");
        assert!(response.version.is_empty());
        assert!(response.feature_states.is_empty());
    }

    #[tokio::test]
    async fn no_content_and_not_found_mean_no_config() {
        let (base, _) = serve_once("204 No Content", "").await;
        assert!(api_for(&base).get().await.unwrap().is_none());

        let (base, _) = serve_once("404 Not Found", "").await;
        assert!(api_for(&base).get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_or_null_body_means_no_config() {
        let (base, _) = serve_once("200 OK", "").await;
        assert!(api_for(&base).get().await.unwrap().is_none());

        let (base, _) = serve_once("200 OK", "null").await;
        assert!(api_for(&base).get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn server_error_is_a_status_error() {
        let (base, _) = serve_once("503 Service Unavailable", "").await;
        let err = api_for(&base).get().await.unwrap_err();
        assert!(matches!(err, ConfigApiError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn malformed_body_is_a_decode_error() {
        let (base, _) = serve_once("200 OK", "{\"gitHash\":").await;
        let err = api_for(&base).get().await.unwrap_err();
        assert!(matches!(err, ConfigApiError::Decode { .. }));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        // Bind then drop so the port is (almost certainly) closed.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = api_for(&format!("http://{addr}")).get().await.unwrap_err();
        assert!(matches!(err, ConfigApiError::Transport { .. }));
    }

    #[tokio::test]
    async fn follows_environment_changes() {
        let (first, first_request) = serve_once("204 No Content", "").await;
        let (second, second_request) = serve_once("204 No Content", "").await;

        let environment = Arc::new(EnvironmentService::new(EnvironmentUrls {
            api: Some(first),
            ..EnvironmentUrls::default()
        }));
        let api = HttpConfigApi::new(Arc::clone(&environment), Duration::from_secs(5)).unwrap();
        api.get().await.unwrap();
        assert_eq!(first_request.await.unwrap(), "GET /config HTTP/1.1");

        environment.set_urls(EnvironmentUrls {
            api: Some(format!("{second}/")),
            ..EnvironmentUrls::default()
        });
        api.get().await.unwrap();
        assert_eq!(second_request.await.unwrap(), "GET /config HTTP/1.1");
    }
}
