use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::LocationError;
use crate::models::{Coordinate, LocationSuggestion};

// ASCII digits only; `\d` would also admit other Unicode digit sets.
static POSTAL_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{6}$").expect("postal code pattern"));

/// Forward and reverse geocoding boundary. Implementations translate free
/// text, place handles, and coordinates into location suggestions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GeocodingProvider: Send + Sync {
    /// Free-text search. Results are ordered by provider relevance.
    async fn search(&self, query: &str) -> Result<Vec<LocationSuggestion>, LocationError>;

    /// Resolve a search result's precise coordinate from its place handle.
    async fn resolve_details(
        &self,
        place_id: &str,
    ) -> Result<Option<LocationSuggestion>, LocationError>;

    /// Name the place at a coordinate. `None` when the provider knows
    /// nothing about the area.
    async fn reverse_geocode(
        &self,
        coordinate: Coordinate,
    ) -> Result<Option<LocationSuggestion>, LocationError>;
}

/// A device position and the instant it was measured.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionFix {
    pub coordinate: Coordinate,
    pub acquired_at: DateTime<Utc>,
}

impl PositionFix {
    /// A fix measured at this instant.
    pub fn new(coordinate: Coordinate) -> Self {
        Self {
            coordinate,
            acquired_at: Utc::now(),
        }
    }

    /// A fix measured at a known earlier instant.
    pub fn measured(coordinate: Coordinate, acquired_at: DateTime<Utc>) -> Self {
        Self {
            coordinate,
            acquired_at,
        }
    }

    /// Time since the fix was measured. A future timestamp from a skewed
    /// clock counts as zero.
    pub fn age(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.acquired_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Device position boundary.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PositionProvider: Send + Sync {
    /// The most recent fix the device can offer. Implementations may serve
    /// a cached fix; callers judge staleness against [`PositionFix::age`].
    async fn current_position(&self) -> Result<PositionFix, LocationError>;
}

/// Position provider pinned to one coordinate. Useful where no real
/// positioning hardware exists.
#[derive(Debug, Clone)]
pub struct FixedPositionProvider {
    coordinate: Coordinate,
}

impl FixedPositionProvider {
    pub fn new(coordinate: Coordinate) -> Self {
        Self { coordinate }
    }
}

#[async_trait]
impl PositionProvider for FixedPositionProvider {
    async fn current_position(&self) -> Result<PositionFix, LocationError> {
        Ok(PositionFix::new(self.coordinate))
    }
}

/// Validate a six-digit Singapore postal code.
pub fn validate_postal_code(code: &str) -> Result<(), LocationError> {
    if POSTAL_CODE.is_match(code) {
        Ok(())
    } else {
        Err(LocationError::invalid_input(format!(
            "Postal code must be exactly 6 digits, got {:?}",
            code
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn six_digit_codes_pass() {
        assert!(validate_postal_code("018956").is_ok());
        assert!(validate_postal_code("000000").is_ok());
    }

    #[test]
    fn malformed_codes_fail() {
        for code in [
            "01895", "0189566", "01895a", "18956 ", " 018956", "123 456", "", "abc123",
            // Full-width digits are not a valid postal code.
            "１２３４５６",
        ] {
            assert!(
                validate_postal_code(code).is_err(),
                "{:?} should be rejected",
                code
            );
        }
    }

    #[tokio::test]
    async fn fixed_provider_serves_a_fresh_fix() {
        let provider = FixedPositionProvider::new(Coordinate::new(1.2834, 103.8607));
        let fix = provider.current_position().await.unwrap();
        assert!((fix.coordinate.latitude - 1.2834).abs() < f64::EPSILON);
        assert!(fix.age() < Duration::from_secs(1));
    }

    #[test]
    fn fix_age_counts_from_the_measurement_instant() {
        let coordinate = Coordinate::new(1.3, 103.8);
        let aged =
            PositionFix::measured(coordinate, Utc::now() - chrono::Duration::seconds(90));
        assert!(aged.age() >= Duration::from_secs(90));

        let skewed =
            PositionFix::measured(coordinate, Utc::now() + chrono::Duration::seconds(30));
        assert_eq!(skewed.age(), Duration::ZERO);
    }
}
