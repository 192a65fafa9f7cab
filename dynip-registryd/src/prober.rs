use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::header::{CONNECTION, CONTENT_TYPE};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use shared::protocol::{PROBE_SENTINEL, TLS_PORT};
use crate::config::ProberConfig;
use crate::error::ProbeError;
use crate::store::EndpointStore;

/// Longest response body read or logged; anything past this cannot be the sentinel.
const MAX_BODY_BYTES: usize = 64;

/// Out-of-band reachability check against a registered endpoint.
#[async_trait]
pub trait ProbeClient: Send + Sync {
    /// Contact `address:port` and return the response body.
    async fn probe(&self, address: &str, port: u16, timeout: Duration) -> Result<String, ProbeError>;
}

/// Probes over HTTP with an empty POST, the way registered services expect.
pub struct HttpProbeClient {
    client: reqwest::Client,
}

impl HttpProbeClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to build probe HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ProbeClient for HttpProbeClient {
    async fn probe(&self, address: &str, port: u16, timeout: Duration) -> Result<String, ProbeError> {
        let mut response = self
            .client
            .post(probe_url(address, port))
            .header(CONTENT_TYPE, "text/plain")
            .header(CONNECTION, "close")
            .body("")
            .timeout(timeout)
            .send()
            .await
            .map_err(classify)?;

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(classify)? {
            let room = MAX_BODY_BYTES - body.len();
            body.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if body.len() == MAX_BODY_BYTES {
                break;
            }
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

fn classify(e: reqwest::Error) -> ProbeError {
    if e.is_timeout() {
        ProbeError::Timeout
    } else {
        ProbeError::Transport(e.to_string())
    }
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_BODY_BYTES {
        let mut end = MAX_BODY_BYTES;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}

pub fn probe_url(address: &str, port: u16) -> String {
    let scheme = if port == TLS_PORT { "https" } else { "http" };
    match address.parse::<IpAddr>() {
        Ok(IpAddr::V6(ip)) => format!("{scheme}://[{ip}]:{port}/"),
        _ => format!("{scheme}://{address}:{port}/"),
    }
}

/// Counts from one pass over the watched endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Endpoints that were probed
    pub checked: usize,
    pub healthy: usize,
    pub demoted: usize,
    /// Absent or already inactive
    pub skipped: usize,
    /// Failed the probe but re-registered before the reset landed
    pub superseded: usize,
    /// Store errors
    pub errors: usize,
}

enum Verdict {
    Skipped,
    Healthy,
    Demoted,
    Superseded,
    Errored,
}

impl SweepReport {
    fn record(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Skipped => self.skipped += 1,
            Verdict::Healthy => {
                self.checked += 1;
                self.healthy += 1;
            }
            Verdict::Demoted => {
                self.checked += 1;
                self.demoted += 1;
            }
            Verdict::Superseded => {
                self.checked += 1;
                self.superseded += 1;
            }
            Verdict::Errored => self.errors += 1,
        }
    }
}

/// Verifies active endpoints and resets the ones that stop answering.
pub struct Prober {
    store: Arc<dyn EndpointStore>,
    client: Arc<dyn ProbeClient>,
    services: Vec<String>,
    timeout: Duration,
    max_concurrent: usize,
}

impl Prober {
    pub fn new(
        store: Arc<dyn EndpointStore>,
        client: Arc<dyn ProbeClient>,
        config: &ProberConfig,
    ) -> Self {
        Self {
            store,
            client,
            services: config.services.clone(),
            timeout: config.timeout(),
            max_concurrent: config.max_concurrent_probes.max(1),
        }
    }

    async fn watched_ids(&self) -> Result<Vec<String>> {
        if !self.services.is_empty() {
            return Ok(self.services.clone());
        }
        let endpoints = self.store.list().await?;
        Ok(endpoints.into_iter().map(|e| e.id).collect())
    }

    /// Probe every watched endpoint once.
    pub async fn sweep(&self) -> SweepReport {
        let ids = match self.watched_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!("Failed to list endpoints for probing: {:#}", e);
                return SweepReport {
                    errors: 1,
                    ..SweepReport::default()
                };
            }
        };

        let verdicts: Vec<Verdict> = stream::iter(ids)
            .map(|id| self.check(id))
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let mut report = SweepReport::default();
        for verdict in verdicts {
            report.record(verdict);
        }

        tracing::info!(
            "Probe sweep: {} checked, {} healthy, {} demoted, {} skipped, {} superseded, {} errors",
            report.checked,
            report.healthy,
            report.demoted,
            report.skipped,
            report.superseded,
            report.errors
        );

        report
    }

    async fn check(&self, id: String) -> Verdict {
        let endpoint = match self.store.get(&id).await {
            Ok(Some(endpoint)) => endpoint,
            Ok(None) => {
                tracing::debug!("{} has never registered, skipping probe", id);
                return Verdict::Skipped;
            }
            Err(e) => {
                tracing::error!("Failed to read endpoint {}: {:#}", id, e);
                return Verdict::Errored;
            }
        };

        if !endpoint.status.is_active() {
            tracing::debug!("{} is inactive, skipping probe", id);
            return Verdict::Skipped;
        }

        let failure = match self.client.probe(&endpoint.address, endpoint.port, self.timeout).await {
            Ok(body) if body == PROBE_SENTINEL => {
                tracing::debug!("{} answered at {}:{}", id, endpoint.address, endpoint.port);
                return Verdict::Healthy;
            }
            Ok(body) => ProbeError::UnexpectedBody(truncate_body(body)),
            Err(e) => e,
        };

        tracing::info!(
            "{} failed probe at {}:{}: {}",
            id,
            endpoint.address,
            endpoint.port,
            failure
        );

        match self.store.reset_if_unchanged(&id, endpoint.last_updated).await {
            Ok(true) => {
                tracing::info!("{} reset to unreachable", id);
                Verdict::Demoted
            }
            Ok(false) => {
                tracing::info!("{} re-registered during probe, keeping new registration", id);
                Verdict::Superseded
            }
            Err(e) => {
                tracing::error!("Failed to reset endpoint {}: {:#}", id, e);
                Verdict::Errored
            }
        }
    }
}

/// Periodic trigger for the prober
pub async fn run(prober: Prober, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                prober.sweep().await;
            }
            _ = cancel.cancelled() => {
                tracing::info!("Prober shutting down");
                break;
            }
        }
    }
}
