/// Default floor of places a (location, category) fetch must return.
pub const DEFAULT_MIN_PLACES_PER_LOCATION: usize = 5;

/// Above this many places a fetch looks like spam or an over-broad query.
pub const DEFAULT_MAX_PLACES_PER_LOCATION: usize = 200;

/// Minimum coverage score (0-100) for a record set to be trusted.
pub const QUALITY_PASS_SCORE: f64 = 60.0;

/// Fraction of records that must individually validate.
pub const MIN_VALIDITY_RATIO: f64 = 0.8;

/// Fewer distinct ratings than this across a record set looks synthetic.
pub const MIN_DISTINCT_RATINGS: usize = 3;

/// Provider ratings live on a 0-5 scale.
pub const RATING_MIN: f64 = 0.0;
pub const RATING_MAX: f64 = 5.0;

// Coverage deductions.
pub const PENALTY_TOO_FEW: f64 = 30.0;
pub const PENALTY_TOO_MANY: f64 = 20.0;
pub const PENALTY_LOW_VALIDITY: f64 = 25.0;
pub const PENALTY_UNIFORM_RATINGS: f64 = 15.0;
