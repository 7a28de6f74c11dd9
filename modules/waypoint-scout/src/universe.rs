//! The location universe: which destinations the orchestrator watches, where
//! they are, and the calendar hints attached to them. Loaded from JSON.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use waypoint_common::{Category, GeoPoint, Location};

use crate::scheduling::signals::{SeasonalRule, UpcomingEvent};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseLocation {
    pub name: String,
    pub country: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    /// Categories to keep warm. Empty means all of them.
    #[serde(default)]
    pub categories: Vec<Category>,
}

impl UniverseLocation {
    pub fn location(&self) -> Location {
        Location::new(&self.name, &self.country)
    }

    pub fn point(&self) -> Option<GeoPoint> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Universe {
    #[serde(default)]
    pub locations: Vec<UniverseLocation>,
    #[serde(default)]
    pub seasonal: Vec<SeasonalRule>,
    #[serde(default)]
    pub events: Vec<UpcomingEvent>,
}

impl Universe {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("parsing location universe")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading location universe {}", path.display()))?;
        let universe = Self::from_json(&raw)?;
        info!(
            path = %path.display(),
            locations = universe.locations.len(),
            seasonal_rules = universe.seasonal.len(),
            events = universe.events.len(),
            "Loaded location universe"
        );
        Ok(universe)
    }

    /// Locations with coordinates, for the clusterer.
    pub fn known_points(&self) -> Vec<(Location, GeoPoint)> {
        self.locations
            .iter()
            .filter_map(|l| match l.point() {
                Some(p) => Some((l.location(), p)),
                None => {
                    warn!(location = %l.location(), "No coordinates, will not cluster");
                    None
                }
            })
            .collect()
    }

    /// Every (location, category) pair the gap signal should watch.
    pub fn watched(&self) -> Vec<(Location, Category)> {
        self.locations
            .iter()
            .flat_map(|l| {
                let categories: Vec<Category> = if l.categories.is_empty() {
                    Category::ALL.to_vec()
                } else {
                    l.categories.clone()
                };
                let location = l.location();
                categories.into_iter().map(move |c| (location.clone(), c))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "locations": [
            { "name": "Rome", "country": "Italy", "lat": 41.9028, "lng": 12.4964,
              "categories": ["attraction", "restaurant"] },
            { "name": "Reykjavik", "country": "Iceland" }
        ],
        "seasonal": [
            { "location": { "name": "Rome", "country": "Italy" }, "category": "attraction",
              "months": [6, 7, 8], "boost": 7.0 }
        ],
        "events": [
            { "location": { "name": "Rome", "country": "Italy" }, "category": "hotel",
              "name": "Rome Marathon", "starts_on": "2025-03-16", "weight": 9.0 }
        ]
    }"#;

    #[test]
    fn parses_locations_rules_and_events() {
        let universe = Universe::from_json(SAMPLE).unwrap();
        assert_eq!(universe.locations.len(), 2);
        assert_eq!(universe.seasonal[0].months, vec![6, 7, 8]);
        assert_eq!(universe.events[0].name, "Rome Marathon");
    }

    #[test]
    fn only_located_entries_are_known_points() {
        let universe = Universe::from_json(SAMPLE).unwrap();
        let points = universe.known_points();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].0, Location::new("Rome", "Italy"));
    }

    #[test]
    fn empty_categories_mean_all() {
        let universe = Universe::from_json(SAMPLE).unwrap();
        let watched = universe.watched();
        assert_eq!(watched.len(), 2 + Category::ALL.len());
    }

    #[test]
    fn load_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let universe = Universe::load(file.path()).unwrap();
        assert_eq!(universe.locations[0].name, "Rome");

        assert!(Universe::load("/definitely/not/here.json").is_err());
    }
}
