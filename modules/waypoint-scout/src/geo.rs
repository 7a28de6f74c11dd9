//! Geographic clustering of known locations.
//!
//! Clusters only reorder work so that nearby locations are fetched back to
//! back; they never merge two (location, category) tasks into one call.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use tracing::{debug, warn};

use waypoint_common::{GeoPoint, Location, Task};

/// Great-circle distance in kilometers.
pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    a.distance_km(b)
}

#[derive(Debug, Clone, Serialize)]
pub struct Cluster {
    pub seed: Location,
    /// Seed first, then absorbed members in lexical order.
    pub members: Vec<Location>,
    /// `None` when no member has known coordinates.
    pub centroid: Option<GeoPoint>,
}

pub struct GeoClusterer {
    known: BTreeMap<Location, GeoPoint>,
}

impl GeoClusterer {
    pub fn new(known: impl IntoIterator<Item = (Location, GeoPoint)>) -> Self {
        let mut map = BTreeMap::new();
        for (location, point) in known {
            if point.is_valid() {
                map.insert(location, point);
            } else {
                warn!(location = %location, lat = point.lat, lng = point.lng, "Ignoring invalid coordinates");
            }
        }
        Self { known: map }
    }

    pub fn coordinates(&self, location: &Location) -> Option<GeoPoint> {
        self.known.get(location).copied()
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Every other known location within `radius_km`, nearest first.
    pub fn find_nearby(&self, location: &Location, radius_km: f64) -> Vec<(Location, f64)> {
        let Some(origin) = self.coordinates(location) else {
            return Vec::new();
        };
        let mut nearby: Vec<(Location, f64)> = self
            .known
            .iter()
            .filter(|(other, _)| *other != location)
            .map(|(other, point)| (other.clone(), haversine_km(&origin, point)))
            .filter(|(_, d)| *d <= radius_km)
            .collect();
        nearby.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        nearby
    }

    /// Greedy partition of `locations` into clusters.
    ///
    /// Seeds are taken in lexical (name, country) order; each seed absorbs
    /// every unclustered location within `max_radius_km` of it. Locations
    /// without coordinates form singleton clusters. Duplicates in the input
    /// are collapsed, so every distinct location lands in exactly one cluster.
    pub fn create_clusters(&self, locations: &[Location], max_radius_km: f64) -> Vec<Cluster> {
        let mut remaining: BTreeSet<Location> = locations.iter().cloned().collect();
        let mut clusters = Vec::new();

        while let Some(seed) = remaining.pop_first() {
            let mut members = vec![seed.clone()];
            if let Some(seed_point) = self.coordinates(&seed) {
                let absorbed: Vec<Location> = remaining
                    .iter()
                    .filter(|candidate| {
                        self.coordinates(candidate)
                            .is_some_and(|p| haversine_km(&seed_point, &p) <= max_radius_km)
                    })
                    .cloned()
                    .collect();
                for location in absorbed {
                    remaining.remove(&location);
                    members.push(location);
                }
            }

            let centroid = self.centroid(&members);
            clusters.push(Cluster {
                seed,
                members,
                centroid,
            });
        }

        debug!(
            locations = locations.len(),
            clusters = clusters.len(),
            max_radius_km,
            "Clustered locations"
        );
        clusters
    }

    /// Reorder tasks cluster by cluster. Clusters are visited in order of
    /// their first (highest-priority) task; within a cluster tasks keep their
    /// incoming order.
    pub fn order_tasks(&self, tasks: Vec<Task>, max_radius_km: f64) -> Vec<Task> {
        let locations: Vec<Location> = tasks.iter().map(|t| t.location.clone()).collect();
        let clusters = self.create_clusters(&locations, max_radius_km);

        let cluster_of: HashMap<&Location, usize> = clusters
            .iter()
            .enumerate()
            .flat_map(|(i, c)| c.members.iter().map(move |m| (m, i)))
            .collect();

        let mut visit_order: Vec<usize> = Vec::new();
        let mut buckets: Vec<Vec<Task>> = vec![Vec::new(); clusters.len()];
        for task in tasks {
            let idx = cluster_of[&task.location];
            if !visit_order.contains(&idx) {
                visit_order.push(idx);
            }
            buckets[idx].push(task);
        }

        visit_order
            .into_iter()
            .flat_map(|idx| std::mem::take(&mut buckets[idx]))
            .collect()
    }

    /// Mean position of members with known coordinates, averaged on the
    /// unit sphere so clusters straddling the antimeridian stay correct.
    fn centroid(&self, members: &[Location]) -> Option<GeoPoint> {
        let points: Vec<GeoPoint> = members.iter().filter_map(|m| self.coordinates(m)).collect();
        if points.is_empty() {
            return None;
        }
        let (mut x, mut y, mut z) = (0.0, 0.0, 0.0);
        for p in &points {
            let (lat, lng) = (p.lat.to_radians(), p.lng.to_radians());
            x += lat.cos() * lng.cos();
            y += lat.cos() * lng.sin();
            z += lat.sin();
        }
        let n = points.len() as f64;
        let (x, y, z) = (x / n, y / n, z / n);
        let lng = y.atan2(x);
        let lat = z.atan2((x * x + y * y).sqrt());
        Some(GeoPoint::new(lat.to_degrees(), lng.to_degrees()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{task, ROME, TIVOLI, FLORENCE, PISA, PARIS};
    use waypoint_common::Category;

    fn loc(name: &str, country: &str) -> Location {
        Location::new(name, country)
    }

    fn italy_clusterer() -> GeoClusterer {
        GeoClusterer::new([
            (loc("Rome", "Italy"), GeoPoint::new(ROME.0, ROME.1)),
            (loc("Tivoli", "Italy"), GeoPoint::new(TIVOLI.0, TIVOLI.1)),
            (loc("Florence", "Italy"), GeoPoint::new(FLORENCE.0, FLORENCE.1)),
            (loc("Pisa", "Italy"), GeoPoint::new(PISA.0, PISA.1)),
            (loc("Paris", "France"), GeoPoint::new(PARIS.0, PARIS.1)),
        ])
    }

    #[test]
    fn distance_to_self_is_zero() {
        let p = GeoPoint::new(ROME.0, ROME.1);
        assert_eq!(haversine_km(&p, &p), 0.0);
    }

    #[test]
    fn distances_along_a_meridian_are_additive() {
        let a = GeoPoint::new(10.0, 5.0);
        let b = GeoPoint::new(20.0, 5.0);
        let c = GeoPoint::new(35.0, 5.0);
        let direct = haversine_km(&a, &c);
        let legs = haversine_km(&a, &b) + haversine_km(&b, &c);
        assert!((direct - legs).abs() < 1e-6, "direct {direct} vs legs {legs}");
    }

    #[test]
    fn find_nearby_is_sorted_and_excludes_self() {
        let clusterer = italy_clusterer();
        let nearby = clusterer.find_nearby(&loc("Florence", "Italy"), 300.0);
        let names: Vec<&str> = nearby.iter().map(|(l, _)| l.name.as_str()).collect();
        assert_eq!(names, vec!["Pisa", "Rome", "Tivoli"]);
        assert!(nearby.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn find_nearby_unknown_location_is_empty() {
        let clusterer = italy_clusterer();
        assert!(clusterer.find_nearby(&loc("Atlantis", "Nowhere"), 1000.0).is_empty());
    }

    #[test]
    fn clusters_partition_the_input() {
        let clusterer = italy_clusterer();
        let input = vec![
            loc("Rome", "Italy"),
            loc("Paris", "France"),
            loc("Tivoli", "Italy"),
            loc("Pisa", "Italy"),
            loc("Florence", "Italy"),
            loc("Rome", "Italy"),
            loc("Atlantis", "Nowhere"),
        ];
        let clusters = clusterer.create_clusters(&input, 100.0);

        let mut seen: Vec<Location> = clusters.iter().flat_map(|c| c.members.clone()).collect();
        let total = seen.len();
        seen.sort();
        seen.dedup();
        assert_eq!(total, seen.len(), "no location may appear twice");

        let expected: BTreeSet<Location> = input.into_iter().collect();
        assert_eq!(seen.into_iter().collect::<BTreeSet<_>>(), expected);
    }

    #[test]
    fn members_are_within_radius_of_their_seed() {
        let clusterer = italy_clusterer();
        let all: Vec<Location> = clusterer.known.keys().cloned().collect();
        for radius in [10.0, 80.0, 300.0, 2000.0] {
            for cluster in clusterer.create_clusters(&all, radius) {
                let seed = clusterer.coordinates(&cluster.seed).unwrap();
                for member in &cluster.members {
                    let p = clusterer.coordinates(member).unwrap();
                    assert!(haversine_km(&seed, &p) <= radius);
                }
            }
        }
    }

    #[test]
    fn seeds_are_chosen_lexically() {
        let clusterer = italy_clusterer();
        let all: Vec<Location> = clusterer.known.keys().cloned().collect();
        let clusters = clusterer.create_clusters(&all, 100.0);
        let seeds: Vec<&str> = clusters.iter().map(|c| c.seed.name.as_str()).collect();
        // Florence absorbs Pisa; Paris alone; Rome absorbs Tivoli.
        assert_eq!(seeds, vec!["Florence", "Paris", "Rome"]);
        assert_eq!(clusters[0].members.len(), 2);
        assert_eq!(clusters[2].members.len(), 2);
    }

    #[test]
    fn centroid_lies_between_members() {
        let clusterer = italy_clusterer();
        let clusters =
            clusterer.create_clusters(&[loc("Rome", "Italy"), loc("Tivoli", "Italy")], 50.0);
        let c = clusters[0].centroid.unwrap();
        assert!(c.lat > ROME.0 && c.lat < TIVOLI.0);
        assert!(c.lng > ROME.1 && c.lng < TIVOLI.1);
    }

    #[test]
    fn unknown_locations_form_singletons_without_centroid() {
        let clusterer = italy_clusterer();
        let clusters = clusterer.create_clusters(&[loc("Atlantis", "Nowhere")], 500.0);
        assert_eq!(clusters.len(), 1);
        assert!(clusters[0].centroid.is_none());
    }

    #[test]
    fn order_tasks_groups_neighbors_and_keeps_priority_within_cluster() {
        let clusterer = italy_clusterer();
        let tasks = vec![
            task("Rome", "Italy", Category::Attraction, 9.0),
            task("Florence", "Italy", Category::Restaurant, 8.0),
            task("Tivoli", "Italy", Category::Attraction, 7.0),
            task("Pisa", "Italy", Category::Hotel, 6.0),
            task("Rome", "Italy", Category::Hotel, 5.0),
        ];
        let ordered = clusterer.order_tasks(tasks.clone(), 100.0);

        let keys: Vec<(String, f64)> = ordered
            .iter()
            .map(|t| (t.location.name.clone(), t.priority_score))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("Rome".to_string(), 9.0),
                ("Tivoli".to_string(), 7.0),
                ("Rome".to_string(), 5.0),
                ("Florence".to_string(), 8.0),
                ("Pisa".to_string(), 6.0),
            ]
        );
        assert_eq!(ordered.len(), tasks.len());
    }
}
