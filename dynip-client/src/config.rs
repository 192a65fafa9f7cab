use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use anyhow::{bail, Context, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub client: ClientConfig,
    #[serde(default)]
    pub responder: ResponderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Full registration URL, e.g. "https://registry.example.net/v1/register/loc1"
    pub registry_url: String,
    pub secret: String,
    #[serde(default = "default_announce_interval")]
    pub announce_interval_secs: u64,
    /// Port to ask the registry to record; defaults to the responder's listen port
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponderConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_announce_interval() -> u64 {
    60
}

fn default_listen() -> String {
    "0.0.0.0:5000".to_string()
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl ClientConfig {
    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_secs)
    }
}

impl Config {
    /// Port announced to the registry, where the probe responder can be reached.
    pub fn advertised_port(&self) -> Result<u16> {
        if let Some(port) = self.client.port {
            return Ok(port);
        }
        let listen: SocketAddr = self.responder.listen.parse().with_context(|| {
            format!(
                "responder.listen {:?} is not an address:port, set client.port",
                self.responder.listen
            )
        })?;
        if listen.port() == 0 {
            bail!("responder.listen has no fixed port, set client.port");
        }
        Ok(listen.port())
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .context("Failed to parse config")?;

        if config.client.secret.is_empty() {
            bail!("client.secret must not be empty");
        }
        if config.client.announce_interval_secs == 0 {
            bail!("client.announce_interval_secs must be greater than zero");
        }
        if config.client.port == Some(0) {
            bail!("client.port must be between 1 and 65535");
        }
        reqwest::Url::parse(&config.client.registry_url)
            .with_context(|| format!("Invalid registry_url: {}", config.client.registry_url))?;
        config.advertised_port()?;

        Ok(config)
    }
}
