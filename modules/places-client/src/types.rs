use serde::{Deserialize, Serialize};

/// Input for the compass/crawler-google-places actor.
#[derive(Debug, Clone, Serialize)]
pub struct PlacesScraperInput {
    #[serde(rename = "searchStringsArray")]
    pub search_strings: Vec<String>,
    #[serde(rename = "locationQuery")]
    pub location_query: String,
    #[serde(rename = "maxCrawledPlacesPerSearch")]
    pub max_places: u32,
    pub language: String,
    #[serde(rename = "skipClosedPlaces")]
    pub skip_closed_places: bool,
}

impl PlacesScraperInput {
    pub fn new(query: &str, location_query: &str, max_places: u32) -> Self {
        Self {
            search_strings: vec![query.to_string()],
            location_query: location_query.to_string(),
            max_places,
            language: "en".to_string(),
            skip_closed_places: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

/// A single place from the actor's dataset. Fields the scraper does not
/// always populate are optional; everything else is kept in `extra`.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaceItem {
    pub title: Option<String>,
    pub location: Option<LatLng>,
    #[serde(rename = "totalScore")]
    pub total_score: Option<f64>,
    #[serde(rename = "categoryName")]
    pub category_name: Option<String>,
    pub address: Option<String>,
    #[serde(rename = "reviewsCount")]
    pub reviews_count: Option<i64>,
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Run metadata returned by the Apify API.
#[derive(Debug, Clone, Deserialize)]
pub struct RunData {
    pub id: String,
    pub status: String,
    #[serde(rename = "defaultDatasetId")]
    pub default_dataset_id: String,
}

/// Apify API envelope.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiResponse<T> {
    pub data: T,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn place_item_keeps_unknown_fields() {
        let raw = serde_json::json!({
            "title": "Colosseum",
            "location": { "lat": 41.8902, "lng": 12.4922 },
            "totalScore": 4.7,
            "categoryName": "Historical landmark",
            "reviewsCount": 350000,
            "openingHours": [{ "day": "Monday", "hours": "9 AM to 7 PM" }]
        });
        let item: PlaceItem = serde_json::from_value(raw).unwrap();
        assert_eq!(item.title.as_deref(), Some("Colosseum"));
        assert_eq!(item.total_score, Some(4.7));
        assert!(item.extra.contains_key("openingHours"));
        assert!(item.address.is_none());
    }

    #[test]
    fn scraper_input_uses_actor_field_names() {
        let input = PlacesScraperInput::new("restaurant", "Rome, Italy", 20);
        let json = serde_json::to_value(&input).unwrap();
        assert_eq!(json["searchStringsArray"][0], "restaurant");
        assert_eq!(json["locationQuery"], "Rome, Italy");
        assert_eq!(json["maxCrawledPlacesPerSearch"], 20);
    }
}
