use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use anyhow::{bail, Context, Result};

/// Upper bound for `registry.max_age_secs` (one year).
const MAX_AGE_LIMIT_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub registry: RegistryConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub prober: ProberConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Pre-shared code every announcement must carry
    pub secret: String,
    /// Service id used by the id-less routes
    #[serde(default = "default_service")]
    pub default_service: String,
    /// How long a registration stays trustworthy without being renewed
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProberConfig {
    #[serde(default = "default_probe_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_probe_timeout")]
    pub timeout_ms: u64,
    /// Service ids to verify; empty means every stored endpoint
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_service() -> String {
    "loc1".to_string()
}

fn default_max_age() -> u64 {
    900
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/dynip/endpoints.db")
}

fn default_probe_interval() -> u64 {
    300
}

fn default_probe_timeout() -> u64 {
    2000
}

fn default_max_concurrent_probes() -> usize {
    8
}

fn default_listen() -> String {
    "[::]:8080".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_probe_interval(),
            timeout_ms: default_probe_timeout(),
            services: Vec::new(),
            max_concurrent_probes: default_max_concurrent_probes(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl RegistryConfig {
    pub fn max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_age_secs.min(MAX_AGE_LIMIT_SECS) as i64)
    }
}

impl ProberConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::parse(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.registry.secret.is_empty() {
            bail!("registry.secret must not be empty");
        }
        if self.registry.default_service.is_empty() {
            bail!("registry.default_service must not be empty");
        }
        if self.registry.max_age_secs == 0 {
            bail!("registry.max_age_secs must be greater than zero");
        }
        if self.registry.max_age_secs > MAX_AGE_LIMIT_SECS {
            bail!("registry.max_age_secs must be at most {}", MAX_AGE_LIMIT_SECS);
        }
        if self.prober.interval_secs == 0 {
            bail!("prober.interval_secs must be greater than zero");
        }
        if self.prober.timeout_ms == 0 {
            bail!("prober.timeout_ms must be greater than zero");
        }
        if self.prober.max_concurrent_probes == 0 {
            bail!("prober.max_concurrent_probes must be greater than zero");
        }
        Ok(())
    }
}
