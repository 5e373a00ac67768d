use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_RESOLVER_URL: &str = "https://viacep.com.br";
pub const DEFAULT_GEOCODER_URL: &str = "https://nominatim.openstreetmap.org";
pub const DEFAULT_LOG_FILE: &str = "exec.log";
pub const DEFAULT_USER_AGENT: &str = concat!("rust-cep-coords/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub resolver_base_url: String,
    pub geocoder_base_url: String,
    pub user_agent: String,
    /// Minimum spacing between two geocoder requests.
    pub geocoder_min_interval: Duration,
    /// Per-request timeout; `None` waits indefinitely.
    pub http_timeout: Option<Duration>,
    pub output_dir: PathBuf,
    pub log_file: PathBuf,
    pub progress_every: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            resolver_base_url: DEFAULT_RESOLVER_URL.to_string(),
            geocoder_base_url: DEFAULT_GEOCODER_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            geocoder_min_interval: Duration::from_millis(1000),
            http_timeout: Some(Duration::from_secs(30)),
            output_dir: PathBuf::from("."),
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            progress_every: 100,
        }
    }
}

impl Config {
    /// Loads configuration from the process environment (and `.env`, if present).
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary variable lookup.
    pub fn from_vars<F>(var: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            resolver_base_url: get("CEP_RESOLVER_URL")
                .map(|url| validate_url("CEP_RESOLVER_URL", url))
                .transpose()?
                .unwrap_or(defaults.resolver_base_url),
            geocoder_base_url: get("GEOCODER_URL")
                .map(|url| validate_url("GEOCODER_URL", url))
                .transpose()?
                .unwrap_or(defaults.geocoder_base_url),
            user_agent: get("HTTP_USER_AGENT")
                .unwrap_or(defaults.user_agent),
            geocoder_min_interval: get("GEOCODER_MIN_INTERVAL_MS")
                .map(|ms| {
                    ms.trim().parse::<u64>().map(Duration::from_millis).map_err(|_| {
                        anyhow::anyhow!("GEOCODER_MIN_INTERVAL_MS must be a number of milliseconds")
                    })
                })
                .transpose()?
                .unwrap_or(defaults.geocoder_min_interval),
            http_timeout: match get("HTTP_TIMEOUT_SECS") {
                Some(secs) => {
                    let secs: u64 = secs.trim().parse().map_err(|_| {
                        anyhow::anyhow!("HTTP_TIMEOUT_SECS must be a number of seconds")
                    })?;
                    (secs > 0).then(|| Duration::from_secs(secs))
                }
                None => defaults.http_timeout,
            },
            output_dir: get("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            log_file: get("LOG_FILE").map(PathBuf::from).unwrap_or(defaults.log_file),
            progress_every: get("PROGRESS_EVERY")
                .map(|n| {
                    n.trim()
                        .parse::<usize>()
                        .ok()
                        .filter(|n| *n > 0)
                        .ok_or_else(|| anyhow::anyhow!("PROGRESS_EVERY must be a positive number"))
                })
                .transpose()?
                .unwrap_or(defaults.progress_every),
        };

        Ok(config)
    }

    /// Logs the effective settings. Call once logging is initialized.
    pub fn log_settings(&self) {
        tracing::debug!("Resolver URL: {}", self.resolver_base_url);
        tracing::debug!("Geocoder URL: {}", self.geocoder_base_url);
        tracing::debug!("Output directory: {}", self.output_dir.display());
        match self.http_timeout {
            Some(timeout) => tracing::debug!("HTTP timeout: {}s", timeout.as_secs()),
            None => tracing::debug!("HTTP timeout: disabled"),
        }
    }
}

fn validate_url(key: &str, raw: String) -> anyhow::Result<String> {
    let trimmed = raw.trim().trim_end_matches('/').to_string();
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        anyhow::bail!("{} must start with http:// or https://", key);
    }
    url::Url::parse(&trimmed).map_err(|e| anyhow::anyhow!("{} is not a valid URL: {}", key, e))?;
    Ok(trimmed)
}
