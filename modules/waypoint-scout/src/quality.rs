//! Quality gate for fetched place data.
//!
//! `validate_record` checks one place; `validate_coverage` scores a whole
//! (location, category) record set. Record sets that fail coverage are never
//! cached, and cached sets that fail it are treated as stale.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use waypoint_common::config::QualityConfig;
use waypoint_common::{
    Location, PlaceRecord, MIN_DISTINCT_RATINGS, MIN_VALIDITY_RATIO, PENALTY_LOW_VALIDITY,
    PENALTY_TOO_FEW, PENALTY_TOO_MANY, PENALTY_UNIFORM_RATINGS, RATING_MAX, RATING_MIN,
};

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecordValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoverageValidation {
    pub quality_score: f64,
    pub issues: Vec<String>,
    pub passed: bool,
    pub valid_records: usize,
    pub total_records: usize,
}

fn placeholder_name() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(n/?a|test\s*\d*|null|none|unknown|tbd|placeholder|untitled)$")
            .expect("placeholder regex is valid")
    })
}

pub struct QualityValidator {
    config: QualityConfig,
}

impl QualityValidator {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    pub fn validate_record(&self, record: &PlaceRecord) -> RecordValidation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        match record.name.as_deref().map(str::trim) {
            None | Some("") => errors.push("missing name".to_string()),
            Some(name) if name.chars().count() < 2 => {
                errors.push(format!("suspiciously short name: {name:?}"))
            }
            Some(name) if placeholder_name().is_match(name) => {
                errors.push(format!("placeholder name: {name:?}"))
            }
            Some(_) => {}
        }

        match record.coordinates {
            None => errors.push("missing coordinates".to_string()),
            Some(point) if !point.is_valid() => {
                errors.push(format!("coordinates out of range: {}, {}", point.lat, point.lng))
            }
            Some(_) => {}
        }

        match record.rating {
            None => errors.push("missing rating".to_string()),
            Some(r) if !r.is_finite() || !(RATING_MIN..=RATING_MAX).contains(&r) => {
                errors.push(format!("rating out of range: {r}"))
            }
            Some(r) if r == 0.0 => warnings.push("zero rating, likely unrated".to_string()),
            Some(_) => {}
        }

        if record.category.as_deref().map_or(true, |c| c.trim().is_empty()) {
            warnings.push("missing category".to_string());
        }

        RecordValidation {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Score a record set 0-100. Starts at 100 and subtracts for thin or
    /// bloated coverage, too many invalid records, and uniform ratings.
    pub fn validate_coverage(&self, location: &Location, records: &[PlaceRecord]) -> CoverageValidation {
        if records.is_empty() {
            return CoverageValidation {
                quality_score: 0.0,
                issues: vec![format!("no records returned for {location}")],
                passed: false,
                valid_records: 0,
                total_records: 0,
            };
        }

        let mut score: f64 = 100.0;
        let mut issues = Vec::new();
        let total = records.len();

        if total < self.config.min_places_per_location {
            score -= PENALTY_TOO_FEW;
            issues.push(format!(
                "only {total} places for {location}, expected at least {}",
                self.config.min_places_per_location
            ));
        }
        if total > self.config.max_places_per_location {
            score -= PENALTY_TOO_MANY;
            issues.push(format!(
                "{total} places for {location} exceeds {}, possible spam",
                self.config.max_places_per_location
            ));
        }

        let valid = records
            .iter()
            .filter(|r| self.validate_record(r).valid)
            .count();
        let ratio = valid as f64 / total as f64;
        if ratio < MIN_VALIDITY_RATIO {
            score -= PENALTY_LOW_VALIDITY;
            issues.push(format!(
                "only {:.0}% of records are valid ({valid}/{total})",
                ratio * 100.0
            ));
        }

        // Ratings compared at one decimal place.
        let distinct: BTreeSet<i64> = records
            .iter()
            .filter_map(|r| r.rating)
            .filter(|r| r.is_finite())
            .map(|r| (r * 10.0).round() as i64)
            .collect();
        if distinct.len() < MIN_DISTINCT_RATINGS {
            score -= PENALTY_UNIFORM_RATINGS;
            issues.push(format!(
                "only {} distinct rating values, data may be synthetic",
                distinct.len()
            ));
        }

        let quality_score = score.clamp(0.0, 100.0);
        CoverageValidation {
            quality_score,
            passed: quality_score >= self.config.pass_score,
            issues,
            valid_records: valid,
            total_records: total,
        }
    }
}

impl Default for QualityValidator {
    fn default() -> Self {
        Self::new(QualityConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{place, records_with_ratings, rome};
    use waypoint_common::GeoPoint;

    #[test]
    fn complete_record_is_valid() {
        let v = QualityValidator::default().validate_record(&place("Trattoria Da Enzo", 4.6));
        assert!(v.valid, "{:?}", v.errors);
        assert!(v.warnings.is_empty());
    }

    #[test]
    fn missing_fields_are_errors() {
        let record = PlaceRecord {
            name: None,
            coordinates: None,
            rating: None,
            category: None,
            raw_attributes: serde_json::Value::Null,
        };
        let v = QualityValidator::default().validate_record(&record);
        assert!(!v.valid);
        assert_eq!(v.errors.len(), 3);
        assert_eq!(v.warnings, vec!["missing category".to_string()]);
    }

    #[test]
    fn placeholder_and_short_names_are_rejected() {
        let validator = QualityValidator::default();
        for name in ["n/a", "N/A", "test", "Test 2", "x", "unknown"] {
            let v = validator.validate_record(&place(name, 4.0));
            assert!(!v.valid, "{name} should be rejected");
        }
        assert!(validator.validate_record(&place("Testaccio Market", 4.4)).valid);
    }

    #[test]
    fn out_of_range_values_are_errors() {
        let validator = QualityValidator::default();
        assert!(!validator.validate_record(&place("Pantheon", 7.5)).valid);

        let mut bad_coords = place("Pantheon", 4.8);
        bad_coords.coordinates = Some(GeoPoint::new(141.9, 12.47));
        assert!(!validator.validate_record(&bad_coords).valid);
    }

    #[test]
    fn zero_rating_is_only_a_warning() {
        let v = QualityValidator::default().validate_record(&place("New Bistro", 0.0));
        assert!(v.valid);
        assert_eq!(v.warnings.len(), 1);
    }

    #[test]
    fn healthy_set_scores_full_marks() {
        let records = records_with_ratings(&[4.1, 4.3, 4.5, 4.7, 3.9, 4.0]);
        let v = QualityValidator::default().validate_coverage(&rome(), &records);
        assert_eq!(v.quality_score, 100.0);
        assert!(v.passed);
        assert!(v.issues.is_empty());
    }

    #[test]
    fn too_few_records_is_an_issue() {
        let records = records_with_ratings(&[4.1, 4.3, 4.5]);
        let v = QualityValidator::default().validate_coverage(&rome(), &records);
        assert!(!v.issues.is_empty());
        assert!(v.quality_score < 100.0);
        assert!(v.passed, "thin but clean coverage still passes at {}", v.quality_score);
    }

    #[test]
    fn too_many_records_looks_like_spam() {
        let validator = QualityValidator::new(QualityConfig {
            max_places_per_location: 5,
            ..QualityConfig::default()
        });
        let records = records_with_ratings(&[4.1, 4.2, 4.3, 4.4, 4.5, 4.6]);
        let v = validator.validate_coverage(&rome(), &records);
        assert_eq!(v.quality_score, 80.0);
    }

    #[test]
    fn mostly_invalid_records_fail() {
        let mut records = records_with_ratings(&[4.1, 4.2, 4.3, 4.4, 4.5]);
        for r in records.iter_mut().take(3) {
            r.name = Some("n/a".into());
        }
        let v = QualityValidator::default().validate_coverage(&rome(), &records);
        assert_eq!(v.valid_records, 2);
        assert_eq!(v.quality_score, 75.0);
    }

    #[test]
    fn uniform_ratings_are_penalized() {
        let records = records_with_ratings(&[4.5, 4.5, 4.5, 4.5, 4.5, 4.52]);
        let v = QualityValidator::default().validate_coverage(&rome(), &records);
        assert_eq!(v.quality_score, 85.0);
    }

    #[test]
    fn thin_invalid_uniform_set_fails_the_gate() {
        let mut records = records_with_ratings(&[4.0, 4.0]);
        records[0].coordinates = None;
        let v = QualityValidator::default().validate_coverage(&rome(), &records);
        // 100 - 30 - 25 - 15
        assert_eq!(v.quality_score, 30.0);
        assert!(!v.passed);
    }

    #[test]
    fn empty_set_scores_zero() {
        let v = QualityValidator::default().validate_coverage(&rome(), &[]);
        assert_eq!(v.quality_score, 0.0);
        assert!(!v.passed);
    }
}
