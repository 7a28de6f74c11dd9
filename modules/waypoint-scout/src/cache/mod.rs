pub mod place_cache;
pub mod ttl;

pub use place_cache::{CachedPlaces, CoverageReport, LocationCoverage, PlaceCache, WarmStats};
pub use ttl::{CacheEntry, TtlCache};
