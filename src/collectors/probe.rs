use super::{ProbeError, Prober};
use crate::config::ProbeConfig;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct HttpProber {
    client: Client,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn from_config(cfg: &ProbeConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().user_agent(cfg.user_agent.clone()).build()?;
        Ok(Self::new(client, cfg.timeout))
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &str) -> Result<u16, ProbeError> {
        let resp = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| {
                debug!(url = %url, error = %err, "probe transport error");
                classify_transport_error(&err)
            })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(status.as_u16());
        }
        Err(ProbeError::Http {
            code: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
        })
    }
}

fn classify_transport_error(err: &reqwest::Error) -> ProbeError {
    if err.is_timeout() {
        ProbeError::Timeout
    } else {
        ProbeError::Unreachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::{routing::get, Router};
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn spawn_server() -> SocketAddr {
        let app = Router::new()
            .route("/ok", get(|| async { "ok" }))
            .route(
                "/unavailable",
                get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "busy") }),
            )
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn prober(timeout: Duration) -> HttpProber {
        HttpProber::new(Client::new(), timeout)
    }

    #[tokio::test]
    async fn success_returns_status_code() {
        let addr = spawn_server().await;
        let code = prober(Duration::from_secs(5))
            .probe(&format!("http://{addr}/ok"))
            .await
            .unwrap();
        assert_eq!(code, 200);
    }

    #[tokio::test]
    async fn error_status_is_classified_as_http_error() {
        let addr = spawn_server().await;
        let err = prober(Duration::from_secs(5))
            .probe(&format!("http://{addr}/unavailable"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ProbeError::Http {
                code: 503,
                status_text: "Service Unavailable".to_string()
            }
        );
        assert_eq!(err.to_string(), "Error 503: Service Unavailable");
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let addr = spawn_server().await;
        let err = prober(Duration::from_millis(100))
            .probe(&format!("http://{addr}/slow"))
            .await
            .unwrap_err();
        assert_eq!(err, ProbeError::Timeout);
        assert_eq!(err.to_string(), "Request timed out");
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = prober(Duration::from_secs(5))
            .probe(&format!("http://{addr}/"))
            .await
            .unwrap_err();
        assert_eq!(err, ProbeError::Unreachable);
        assert_eq!(err.to_string(), "No response or server not reachable");
    }
}
