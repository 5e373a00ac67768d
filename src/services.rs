use crate::config::Config;
use crate::errors::{AppError, ResolverError, ResultExt};
use crate::models::{is_valid_cep, Address, Coordinate, Lookup};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Postal code → address lookup.
pub trait AddressResolver {
    /// Resolves `cep`. Unknown or malformed codes are `Lookup::NotFound`;
    /// only conditions that should stop the whole run are errors.
    fn resolve(
        &self,
        cep: &str,
    ) -> impl Future<Output = Result<Lookup<Address>, ResolverError>> + Send;
}

/// Address text → coordinate lookup.
pub trait Geocoder {
    /// Geocodes `query` narrowed by `cep`. Never fails: anything short of a
    /// match is `Lookup::NotFound`.
    fn geocode(&self, query: &str, cep: &str) -> impl Future<Output = Lookup<Coordinate>> + Send;
}

/// Builds the free-text search for an address: street, neighborhood, city, "brasil".
pub fn build_geocode_query(address: &Address) -> String {
    [
        address.logradouro.as_str(),
        address.bairro.as_str(),
        address.cidade.as_str(),
        "brasil",
    ]
    .iter()
    .map(|part| part.trim())
    .filter(|part| !part.is_empty())
    .collect::<Vec<_>>()
    .join(" ")
}

fn build_client(config: &Config) -> Result<Client, AppError> {
    let mut builder = Client::builder().user_agent(config.user_agent.as_str());
    if let Some(timeout) = config.http_timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(AppError::from)
        .context("Failed to create HTTP client")
}

// ============ ViaCEP ============

/// ViaCEP payload. Unknown codes come back as `{"erro": true}` (or `"true"`).
#[derive(Debug, Deserialize)]
struct ViaCepResponse {
    #[serde(default)]
    logradouro: String,
    #[serde(default)]
    complemento: String,
    #[serde(default)]
    bairro: String,
    #[serde(default)]
    localidade: String,
    #[serde(default)]
    uf: String,
}

impl From<ViaCepResponse> for Address {
    fn from(r: ViaCepResponse) -> Self {
        Address {
            logradouro: r.logradouro,
            bairro: r.bairro,
            cidade: r.localidade,
            uf: r.uf,
            complemento: Some(r.complemento).filter(|c| !c.trim().is_empty()),
        }
    }
}

/// Postal code resolver backed by the ViaCEP web service.
#[derive(Clone)]
pub struct ViaCepResolver {
    client: Client,
    base_url: String,
}

impl ViaCepResolver {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        Ok(Self {
            client: build_client(config)?,
            base_url: config.resolver_base_url.clone(),
        })
    }

    async fn fetch(&self, cep: &str) -> Result<Lookup<Address>, ResolverError> {
        let url = format!("{}/ws/{}/json/", self.base_url, cep);
        tracing::debug!("ViaCEP: GET {}", url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            tracing::error!("ViaCEP request failed for {}: {}", cep, e);
            ResolverError::Unavailable(format!("request for {} failed: {}", cep, e))
        })?;

        let status = response.status();
        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(ResolverError::QuotaExceeded(format!(
                    "ViaCEP returned {} for {}",
                    status, cep
                )))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(ResolverError::AuthFailure(format!(
                    "ViaCEP returned {} for {}",
                    status, cep
                )))
            }
            s if s.is_server_error() => {
                return Err(ResolverError::Unavailable(format!(
                    "ViaCEP returned {} for {}",
                    status, cep
                )))
            }
            s if !s.is_success() => {
                tracing::debug!("ViaCEP: {} for {}, treating as not found", status, cep);
                return Ok(Lookup::NotFound);
            }
            _ => {}
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("ViaCEP: unreadable response for {}: {}", cep, e);
                return Ok(Lookup::NotFound);
            }
        };

        if is_erro_flag(&body) {
            tracing::debug!("ViaCEP: {} is not registered", cep);
            return Ok(Lookup::NotFound);
        }

        match serde_json::from_value::<ViaCepResponse>(body) {
            Ok(r) if !r.localidade.trim().is_empty() => Ok(Lookup::Found(r.into())),
            Ok(_) => {
                tracing::warn!("ViaCEP: response for {} has no city, treating as not found", cep);
                Ok(Lookup::NotFound)
            }
            Err(e) => {
                tracing::warn!("ViaCEP: malformed response for {}: {}", cep, e);
                Ok(Lookup::NotFound)
            }
        }
    }
}

fn is_erro_flag(body: &Value) -> bool {
    match body.get("erro") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        Some(_) => true,
        None => false,
    }
}

impl AddressResolver for ViaCepResolver {
    async fn resolve(&self, cep: &str) -> Result<Lookup<Address>, ResolverError> {
        if !is_valid_cep(cep) {
            tracing::debug!("ViaCEP: '{}' is not an 8-digit CEP, skipping lookup", cep);
            return Ok(Lookup::NotFound);
        }
        self.fetch(cep).await
    }
}

// ============ Nominatim ============

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

/// Geocoder backed by the Nominatim (OpenStreetMap) search API.
pub struct NominatimGeocoder {
    client: Client,
    search_url: String,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl NominatimGeocoder {
    /// At most one retry: with the CEP, then without it.
    const MAX_ATTEMPTS: usize = 2;

    pub fn new(config: &Config) -> Result<Self, AppError> {
        Ok(Self {
            client: build_client(config)?,
            search_url: format!("{}/search", config.geocoder_base_url),
            min_interval: config.geocoder_min_interval,
            last_request: Mutex::new(None),
        })
    }

    /// Sleeps until `min_interval` has passed since the previous request.
    async fn throttle(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let wait = {
            let mut last = self
                .last_request
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let now = Instant::now();
            let wait = last
                .map(|at| self.min_interval.saturating_sub(now.duration_since(at)))
                .unwrap_or(Duration::ZERO);
            *last = Some(now + wait);
            wait
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    /// One search request; `None` when there is no usable first match.
    async fn search(&self, text: &str) -> Option<Coordinate> {
        self.throttle().await;

        let url = match reqwest::Url::parse_with_params(
            &self.search_url,
            &[("q", text), ("format", "json"), ("limit", "1")],
        ) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("Nominatim: failed to build URL for '{}': {}", text, e);
                return None;
            }
        };
        tracing::debug!("Nominatim: GET {}", url);

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Nominatim request failed for '{}': {}", text, e);
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::warn!(
                "Nominatim returned {} for '{}'",
                response.status(),
                text
            );
            return None;
        }

        match response.json::<Vec<NominatimPlace>>().await {
            Ok(places) => places.into_iter().next().map(|p| Coordinate {
                lat: p.lat,
                lon: p.lon,
            }),
            Err(e) => {
                tracing::warn!("Nominatim: malformed response for '{}': {}", text, e);
                None
            }
        }
    }
}

impl Geocoder for NominatimGeocoder {
    async fn geocode(&self, query: &str, cep: &str) -> Lookup<Coordinate> {
        let mut suffix = cep;
        for attempt in 1..=Self::MAX_ATTEMPTS {
            let text = format!("{} {}", query, suffix);
            if let Some(coordinate) = self.search(text.trim()).await {
                tracing::debug!(
                    "Nominatim: '{}' located at {},{} (attempt {})",
                    text.trim(),
                    coordinate.lat,
                    coordinate.lon,
                    attempt
                );
                return Lookup::Found(coordinate);
            }
            if suffix.is_empty() {
                break;
            }
            suffix = "";
        }
        Lookup::NotFound
    }
}
