use async_trait::async_trait;
use tracing::debug;

use places_client::{PlaceItem, PlacesClient, PlacesError};
use waypoint_common::{Category, GeoPoint, Location, PlaceRecord, WaypointError};

use crate::traits::PlaceScraper;

/// `PlaceScraper` backed by the hosted places actor.
pub struct PlacesScraper {
    client: PlacesClient,
}

impl PlacesScraper {
    pub fn new(client: PlacesClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PlaceScraper for PlacesScraper {
    async fn scrape(
        &self,
        location: &Location,
        category: Category,
        max_results: u32,
    ) -> Result<Vec<PlaceRecord>, WaypointError> {
        let items = self
            .client
            .search_places(category.search_query(), &location.query(), max_results)
            .await
            .map_err(map_places_error)?;
        debug!(location = %location, category = %category, count = items.len(), "Scraped places");
        Ok(items.into_iter().map(to_record).collect())
    }
}

/// Client rejections are final; everything else (network, 5xx, 429, parse,
/// failed runs) is worth another attempt.
pub fn map_places_error(err: PlacesError) -> WaypointError {
    if err.is_client_error() {
        WaypointError::Validation(err.to_string())
    } else {
        WaypointError::TransientCall(err.to_string())
    }
}

fn to_record(item: PlaceItem) -> PlaceRecord {
    let mut raw = item.extra;
    if let Some(address) = item.address {
        raw.insert("address".into(), address.into());
    }
    if let Some(reviews) = item.reviews_count {
        raw.insert("reviews_count".into(), reviews.into());
    }
    if let Some(url) = item.url {
        raw.insert("url".into(), url.into());
    }

    PlaceRecord {
        name: item.title,
        coordinates: item.location.map(|l| GeoPoint::new(l.lat, l.lng)),
        rating: item.total_score,
        category: item.category_name,
        raw_attributes: serde_json::Value::Object(raw),
    }
}
