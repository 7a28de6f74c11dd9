pub mod error;
pub mod types;

pub use error::{PlacesError, Result};
pub use types::{LatLng, PlaceItem, PlacesScraperInput, RunData};

use serde::de::DeserializeOwned;
use types::ApiResponse;

const DEFAULT_BASE_URL: &str = "https://api.apify.com/v2";

/// Actor ID for compass/crawler-google-places.
const GOOGLE_PLACES_SCRAPER: &str = "nwua9Gu5YrADL7ZDj";

pub struct PlacesClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl PlacesClient {
    pub fn new(token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the client at a different API root (proxy or local stub).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Start a places scrape run. Returns immediately with run metadata.
    pub async fn start_places_scrape(&self, input: &PlacesScraperInput) -> Result<RunData> {
        let url = format!("{}/acts/{}/runs", self.base_url, GOOGLE_PLACES_SCRAPER);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(input)
            .send()
            .await?;

        let resp = check_status(resp).await?;
        let api_resp: ApiResponse<RunData> = resp.json().await?;
        Ok(api_resp.data)
    }

    /// Poll until a run completes. Uses `waitForFinish=60` for efficient long-polling.
    pub async fn wait_for_run(&self, run_id: &str) -> Result<RunData> {
        loop {
            let url = format!("{}/actor-runs/{}?waitForFinish=60", self.base_url, run_id);
            let resp = self
                .client
                .get(&url)
                .bearer_auth(&self.token)
                .send()
                .await?;

            let resp = check_status(resp).await?;
            let api_resp: ApiResponse<RunData> = resp.json().await?;
            match api_resp.data.status.as_str() {
                "SUCCEEDED" => return Ok(api_resp.data),
                "FAILED" | "ABORTED" | "TIMED-OUT" => {
                    return Err(PlacesError::RunFailed(api_resp.data.status));
                }
                _ => {
                    tracing::debug!(run_id, status = %api_resp.data.status, "Run still in progress");
                    continue;
                }
            }
        }
    }

    /// Fetch dataset items from a completed run.
    pub async fn get_dataset_items<T: DeserializeOwned>(&self, dataset_id: &str) -> Result<Vec<T>> {
        let url = format!("{}/datasets/{}/items?format=json", self.base_url, dataset_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let resp = check_status(resp).await?;
        let items: Vec<T> = resp.json().await?;
        Ok(items)
    }

    /// Search places end-to-end: start run, poll, fetch results.
    pub async fn search_places(
        &self,
        query: &str,
        location_query: &str,
        max_places: u32,
    ) -> Result<Vec<PlaceItem>> {
        tracing::info!(query, location_query, max_places, "Starting places scrape");

        let input = PlacesScraperInput::new(query, location_query, max_places);
        let run = self.start_places_scrape(&input).await?;
        tracing::info!(run_id = %run.id, "Apify run started, polling for completion");

        let completed = self.wait_for_run(&run.id).await?;
        tracing::info!(
            run_id = %completed.id,
            dataset_id = %completed.default_dataset_id,
            "Run completed, fetching results"
        );

        let places: Vec<PlaceItem> = self
            .get_dataset_items(&completed.default_dataset_id)
            .await?;
        tracing::info!(count = places.len(), "Fetched places");

        Ok(places)
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    if status.as_u16() == 429 {
        return Err(PlacesError::RateLimited(body));
    }
    Err(PlacesError::Api {
        status: status.as_u16(),
        message: body,
    })
}
