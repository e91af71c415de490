//! Thin transport adapters that fetch a GTFS-Realtime feed from an agency.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use prometheus::{register_histogram, register_int_counter, Histogram, IntCounter};
use reqwest::header::{CACHE_CONTROL, USER_AGENT};

static REQUESTS: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("gtfs_requests_total", "Requests to the realtime API")
        .expect("metric registration")
});

static RESPONSE_BYTES: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "gtfs_response_bytes",
        "Response bytes from the realtime API",
        prometheus::exponential_buckets(1024.0, 4.0, 10).expect("bucket layout")
    )
    .expect("metric registration")
});

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("realtime request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Produces the raw bytes of a GTFS-Realtime feed.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self) -> Result<Vec<u8>, FetchError>;
}

async fn fetch_bytes(request: reqwest::RequestBuilder) -> Result<Vec<u8>, FetchError> {
    REQUESTS.inc();
    let response = request.send().await?.error_for_status()?;
    let body = response.bytes().await?;
    RESPONSE_BYTES.observe(body.len() as f64);
    Ok(body.to_vec())
}

/// Trip updates from the Irish National Transport Authority.
pub struct IrelandNta {
    client: reqwest::Client,
    url: &'static str,
    api_key: String,
}

impl IrelandNta {
    pub const TEST_URL: &'static str = "https://api.nationaltransport.ie/gtfsrtest/";
    pub const PROD_URL: &'static str = "https://api.nationaltransport.ie/gtfsr/v2/TripUpdates";

    pub fn new(api_key: String, url: &'static str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            api_key,
        }
    }
}

#[async_trait]
impl Fetch for IrelandNta {
    async fn fetch(&self) -> Result<Vec<u8>, FetchError> {
        let request = self
            .client
            .get(self.url)
            .header(CACHE_CONTROL, "no-cache")
            .header("x-api-key", self.api_key.as_str());
        fetch_bytes(request).await
    }
}

/// Trip updates from VicRoads / PTV (Victoria, Australia).
pub struct VicRoads {
    client: reqwest::Client,
    url: &'static str,
    api_key: String,
}

impl VicRoads {
    pub const METROBUS_URL: &'static str =
        "https://data-exchange-api.vicroads.vic.gov.au/opendata/v1/gtfsr/metrobus-tripupdates";
    pub const METROTRAIN_URL: &'static str =
        "https://data-exchange-api.vicroads.vic.gov.au/opendata/v1/gtfsr/metrotrain-tripupdates";
    pub const YARRATRAMS_URL: &'static str =
        "https://data-exchange-api.vicroads.vic.gov.au/opendata/gtfsr/v1/tram/tripupdates";

    pub fn new(api_key: String, url: &'static str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            api_key,
        }
    }
}

#[async_trait]
impl Fetch for VicRoads {
    async fn fetch(&self) -> Result<Vec<u8>, FetchError> {
        let request = self
            .client
            .get(self.url)
            .header(CACHE_CONTROL, "no-cache")
            .header("Ocp-Apim-Subscription-Key", self.api_key.as_str())
            // The data exchange filters on User-Agent and rejects the
            // default client string.
            .header(USER_AGENT, "gtfs-arrivals/0.1");
        fetch_bytes(request).await
    }
}

/// Builds the fetcher for a provider and environment. Unknown combinations
/// are logged and yield `None`.
pub fn make_fetcher(provider: &str, env: &str, api_key: String) -> Option<Arc<dyn Fetch>> {
    match provider {
        "nta" => {
            let url = if env == "prod" {
                IrelandNta::PROD_URL
            } else {
                IrelandNta::TEST_URL
            };
            log::info!("Irish NTA, env={}, url={}", env, url);
            Some(Arc::new(IrelandNta::new(api_key, url)))
        }
        "vicroads" => {
            let url = match env {
                "metrobus" => VicRoads::METROBUS_URL,
                "metrotrain" => VicRoads::METROTRAIN_URL,
                "tram" => VicRoads::YARRATRAMS_URL,
                other => {
                    log::error!("unknown VicRoads/PTV env {:?}", other);
                    return None;
                }
            };
            log::info!("VicRoads/PTV, env={}, url={}", env, url);
            Some(Arc::new(VicRoads::new(api_key, url)))
        }
        other => {
            log::error!("unknown provider {:?}", other);
            None
        }
    }
}
