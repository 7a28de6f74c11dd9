use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::WaypointError;

// --- Geo Types ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Latitude within ±90 and longitude within ±180, both finite.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        haversine_km(self.lat, self.lng, other.lat, other.lng)
    }
}

/// Haversine great-circle distance between two lat/lng points in kilometers.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let lat1_r = lat1.to_radians();
    let lat2_r = lat2.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1_r.cos() * lat2_r.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().min(1.0).asin();
    EARTH_RADIUS_KM * c
}

// --- Locations ---

/// A destination as the travel app names it. Ordering is lexical by name,
/// then country, which is what makes clustering reproducible.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub country: String,
}

impl Location {
    pub fn new(name: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            country: country.into(),
        }
    }

    /// Store prefix shared by every category cached for this location.
    pub fn cache_prefix(&self) -> String {
        format!("{}:{}:", slug(&self.country), slug(&self.name))
    }

    /// Free-text form the place provider geocodes, e.g. "Rome, Italy".
    pub fn query(&self) -> String {
        format!("{}, {}", self.name, self.country)
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}", self.name, self.country)
    }
}

/// Cache key for a (location, category) pair: `country:name:category`.
pub fn cache_key(location: &Location, category: Category) -> String {
    format!("{}{}", location.cache_prefix(), category.as_str())
}

fn slug(s: &str) -> String {
    s.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

// --- Enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Attraction,
    Restaurant,
    Hotel,
    Nightlife,
    Shopping,
    Activity,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Attraction,
        Category::Restaurant,
        Category::Hotel,
        Category::Nightlife,
        Category::Shopping,
        Category::Activity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Attraction => "attraction",
            Category::Restaurant => "restaurant",
            Category::Hotel => "hotel",
            Category::Nightlife => "nightlife",
            Category::Shopping => "shopping",
            Category::Activity => "activity",
        }
    }

    /// Search phrase sent to the place provider.
    pub fn search_query(&self) -> &'static str {
        match self {
            Category::Attraction => "tourist attractions",
            Category::Restaurant => "restaurants",
            Category::Hotel => "hotels",
            Category::Nightlife => "bars and nightlife",
            Category::Shopping => "shopping",
            Category::Activity => "things to do",
        }
    }

    /// How long fetched data for this category stays trustworthy.
    /// Restaurants and nightlife churn fast; landmarks barely move.
    pub fn default_ttl(&self) -> Duration {
        const DAY: u64 = 24 * 3600;
        match self {
            Category::Restaurant => Duration::from_secs(7 * DAY),
            Category::Attraction => Duration::from_secs(30 * DAY),
            Category::Hotel => Duration::from_secs(14 * DAY),
            Category::Nightlife => Duration::from_secs(3 * DAY),
            Category::Shopping => Duration::from_secs(14 * DAY),
            Category::Activity => Duration::from_secs(10 * DAY),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = WaypointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| WaypointError::Config(format!("unknown category: {s}")))
    }
}

/// Which kind of priority signal proposed a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Seasonal,
    Event,
    Ml,
    UserDemand,
    Gap,
}

impl std::fmt::Display for SignalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalSource::Seasonal => write!(f, "seasonal"),
            SignalSource::Event => write!(f, "event"),
            SignalSource::Ml => write!(f, "ml"),
            SignalSource::UserDemand => write!(f, "user_demand"),
            SignalSource::Gap => write!(f, "gap"),
        }
    }
}

/// Execution strategy for one orchestrator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Comprehensive,
    Seasonal,
    MlDriven,
    CostOptimized,
    Emergency,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Comprehensive => "comprehensive",
            Strategy::Seasonal => "seasonal",
            Strategy::MlDriven => "ml_driven",
            Strategy::CostOptimized => "cost_optimized",
            Strategy::Emergency => "emergency",
        }
    }

    /// Whether signals of `source` are consulted when planning this strategy.
    pub fn consults(&self, source: SignalSource) -> bool {
        match self {
            Strategy::Comprehensive | Strategy::CostOptimized => true,
            Strategy::Seasonal => matches!(source, SignalSource::Seasonal | SignalSource::Event),
            Strategy::MlDriven => matches!(source, SignalSource::Ml | SignalSource::UserDemand),
            Strategy::Emergency => matches!(source, SignalSource::Gap | SignalSource::UserDemand),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = WaypointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "comprehensive" => Ok(Strategy::Comprehensive),
            "seasonal" => Ok(Strategy::Seasonal),
            "ml_driven" | "ml" => Ok(Strategy::MlDriven),
            "cost_optimized" => Ok(Strategy::CostOptimized),
            "emergency" => Ok(Strategy::Emergency),
            other => Err(WaypointError::Config(format!("unknown strategy: {other}"))),
        }
    }
}

// --- Provider payload ---

/// One place as returned by the scrape provider. The orchestrator never
/// interprets these fields beyond quality validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceRecord {
    pub name: Option<String>,
    pub coordinates: Option<GeoPoint>,
    pub rating: Option<f64>,
    pub category: Option<String>,
    #[serde(default)]
    pub raw_attributes: serde_json::Value,
}

// --- Planning ---

/// A scored suggestion from one signal provider that a pair is worth refreshing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub location: Location,
    pub category: Category,
    pub score: f64,
    pub source: SignalSource,
    pub reason: String,
}

impl Proposal {
    pub fn new(
        location: Location,
        category: Category,
        score: f64,
        source: SignalSource,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            location,
            category,
            score,
            source,
            reason: reason.into(),
        }
    }
}

/// A merged, deduplicated unit of work for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub location: Location,
    pub category: Category,
    pub priority_score: f64,
    /// Source of the highest-scoring contributing proposal.
    pub source: SignalSource,
    pub reasons: BTreeSet<String>,
}

impl Task {
    pub fn key(&self) -> String {
        cache_key(&self.location, self.category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_same_point_is_zero() {
        assert_eq!(haversine_km(41.9028, 12.4964, 41.9028, 12.4964), 0.0);
    }

    #[test]
    fn haversine_rome_to_florence() {
        let d = haversine_km(41.9028, 12.4964, 43.7696, 11.2558);
        assert!((d - 232.0).abs() < 5.0, "Expected ~232 km, got {d}");
    }

    #[test]
    fn cache_key_is_slugged_and_prefixed_by_location() {
        let loc = Location::new("New York", "United States");
        assert_eq!(
            cache_key(&loc, Category::Restaurant),
            "united-states:new-york:restaurant"
        );
        assert!(cache_key(&loc, Category::Hotel).starts_with(&loc.cache_prefix()));
    }

    #[test]
    fn strategy_parses_aliases() {
        assert_eq!("cost-optimized".parse::<Strategy>().unwrap(), Strategy::CostOptimized);
        assert_eq!("ML".parse::<Strategy>().unwrap(), Strategy::MlDriven);
        assert!("weekly".parse::<Strategy>().is_err());
    }

    #[test]
    fn emergency_consults_only_gaps_and_demand() {
        assert!(Strategy::Emergency.consults(SignalSource::Gap));
        assert!(Strategy::Emergency.consults(SignalSource::UserDemand));
        assert!(!Strategy::Emergency.consults(SignalSource::Seasonal));
        assert!(Strategy::Comprehensive.consults(SignalSource::Ml));
    }

    #[test]
    fn category_round_trips_through_str() {
        for c in Category::ALL {
            assert_eq!(c.as_str().parse::<Category>().unwrap(), c);
        }
    }

    #[test]
    fn location_ordering_is_name_then_country() {
        let mut locs = vec![
            Location::new("Paris", "United States"),
            Location::new("Florence", "Italy"),
            Location::new("Paris", "France"),
        ];
        locs.sort();
        assert_eq!(locs[0].name, "Florence");
        assert_eq!(locs[1].country, "France");
    }
}
