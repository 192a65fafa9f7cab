use std::time::Duration;
use anyhow::{Context, Result};
use reqwest::StatusCode;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use shared::protocol::{FORM_CODE, FORM_PORT};
use crate::config::Config;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of a single announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceOutcome {
    Accepted,
    /// The registry refused our code
    Rejected,
    /// Any other status, or no response at all
    Failed(Option<u16>),
}

/// Tells the registry where this host can currently be reached.
pub struct Announcer {
    http: reqwest::Client,
    registry_url: String,
    secret: String,
    port: u16,
}

impl Announcer {
    pub fn new(config: &Config) -> Result<Self> {
        let port = config.advertised_port()?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build announcer HTTP client")?;

        Ok(Self {
            http,
            registry_url: config.client.registry_url.clone(),
            secret: config.client.secret.clone(),
            port,
        })
    }

    fn form(&self) -> [(&'static str, String); 2] {
        [(FORM_CODE, self.secret.clone()), (FORM_PORT, self.port.to_string())]
    }

    pub async fn announce(&self) -> AnnounceOutcome {
        let response = match self.http.post(&self.registry_url).form(&self.form()).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Announcement to {} failed: {}", self.registry_url, e);
                return AnnounceOutcome::Failed(None);
            }
        };

        match response.status() {
            StatusCode::OK => {
                tracing::debug!("Announcement accepted by {}", self.registry_url);
                AnnounceOutcome::Accepted
            }
            StatusCode::FORBIDDEN => {
                tracing::error!("Registry {} rejected our code, check client.secret", self.registry_url);
                AnnounceOutcome::Rejected
            }
            status => {
                tracing::warn!("Registry {} answered {}", self.registry_url, status);
                AnnounceOutcome::Failed(Some(status.as_u16()))
            }
        }
    }
}

/// Re-announce on a fixed schedule until cancelled
pub async fn run(announcer: Announcer, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                announcer.announce().await;
            }
            _ = cancel.cancelled() => {
                tracing::info!("Announcer shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use axum::{extract::State, http::StatusCode as AxumStatus, routing::post, Form, Router};
    use crate::config::{ClientConfig, ResponderConfig};

    type Seen = Arc<Mutex<Vec<HashMap<String, String>>>>;

    async fn registry(seen: Seen) -> String {
        async fn register(
            State(seen): State<Seen>,
            Form(form): Form<HashMap<String, String>>,
        ) -> AxumStatus {
            let accepted = form.get("code").map(String::as_str) == Some("CN_1268");
            seen.lock().unwrap().push(form);
            if accepted { AxumStatus::OK } else { AxumStatus::FORBIDDEN }
        }

        let app = Router::new()
            .route("/v1/register", post(register))
            .route("/v1/broken", post(|| async { AxumStatus::INTERNAL_SERVER_ERROR }))
            .with_state(seen);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client_config(url: String, secret: &str, port: Option<u16>) -> Config {
        Config {
            client: ClientConfig {
                registry_url: url,
                secret: secret.to_string(),
                announce_interval_secs: 60,
                port,
            },
            responder: ResponderConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_announce_sends_code_and_port() {
        let seen = Seen::default();
        let base = registry(seen.clone()).await;
        let announcer = Announcer::new(&client_config(
            format!("{base}/v1/register"),
            "CN_1268",
            Some(8443),
        ))
        .unwrap();

        assert_eq!(announcer.announce().await, AnnounceOutcome::Accepted);

        let forms = seen.lock().unwrap().clone();
        assert_eq!(forms.len(), 1);
        assert_eq!(forms[0].get("port").map(String::as_str), Some("8443"));
    }

    #[tokio::test]
    async fn test_announce_defaults_to_responder_port() {
        let seen = Seen::default();
        let base = registry(seen.clone()).await;
        let announcer = Announcer::new(&client_config(format!("{base}/v1/register"), "CN_1268", None)).unwrap();

        assert_eq!(announcer.announce().await, AnnounceOutcome::Accepted);
        assert_eq!(seen.lock().unwrap()[0].get("port").map(String::as_str), Some("5000"));
    }

    #[tokio::test]
    async fn test_wrong_code_rejected() {
        let base = registry(Seen::default()).await;
        let announcer = Announcer::new(&client_config(format!("{base}/v1/register"), "nope", None)).unwrap();
        assert_eq!(announcer.announce().await, AnnounceOutcome::Rejected);
    }

    #[tokio::test]
    async fn test_server_error_and_unreachable() {
        let base = registry(Seen::default()).await;
        let announcer = Announcer::new(&client_config(format!("{base}/v1/broken"), "CN_1268", None)).unwrap();
        assert_eq!(announcer.announce().await, AnnounceOutcome::Failed(Some(500)));

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let announcer = Announcer::new(&client_config(
            format!("http://127.0.0.1:{port}/v1/register"),
            "CN_1268",
            None,
        ))
        .unwrap();
        assert_eq!(announcer.announce().await, AnnounceOutcome::Failed(None));
    }
}
