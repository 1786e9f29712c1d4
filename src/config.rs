use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use validator::{Validate, ValidationError};

use crate::models::{Coordinate, DeliveryZone, LocationSuggestion};

#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Geocoding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GeocoderConfig {
    #[serde(default = "default_geocoder_endpoint")]
    #[validate(custom = "validate_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_user_agent")]
    #[validate(length(min = 1))]
    pub user_agent: String,
    #[serde(default = "default_geocoder_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_geocoder_endpoint(),
            user_agent: default_user_agent(),
            timeout_secs: default_geocoder_timeout_secs(),
            max_results: default_max_results(),
        }
    }
}

impl GeocoderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// A curated suggestion shown before the user has any history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopularSpot {
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

impl PopularSpot {
    pub fn to_suggestion(&self, index: usize) -> LocationSuggestion {
        let mut suggestion = LocationSuggestion::search(
            format!("popular-{}", index),
            self.title.clone(),
        )
        .with_coordinate(Coordinate::new(self.latitude, self.longitude));
        if let Some(subtitle) = &self.subtitle {
            suggestion = suggestion.with_subtitle(subtitle.clone());
        }
        suggestion
    }
}

/// Engine settings. Defaults describe the Singapore launch market.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_limits"))]
pub struct EngineConfig {
    /// Pause after the last keystroke before a search fires, in ms.
    #[serde(default = "default_search_debounce_ms")]
    pub search_debounce_ms: u64,
    /// Pause after the map stops moving before the pin reverse-geocodes.
    #[serde(default = "default_region_settle_ms")]
    pub region_settle_ms: u64,
    #[serde(default = "default_min_query_len")]
    pub min_query_len: usize,
    #[serde(default = "default_recent_capacity")]
    pub recent_capacity: usize,
    #[serde(default = "default_max_suggestions")]
    pub max_suggestions: usize,
    /// How long to wait for a device position fix, in seconds.
    #[serde(default = "default_position_timeout_secs")]
    pub position_timeout_secs: u64,
    /// Oldest acceptable cached fix, in seconds.
    #[serde(default = "default_position_max_fix_age_secs")]
    pub position_max_fix_age_secs: u64,
    #[serde(default = "default_zones")]
    #[validate(custom = "validate_zones")]
    pub zones: Vec<DeliveryZone>,
    #[serde(default = "default_popular_locations")]
    pub popular_locations: Vec<PopularSpot>,
    #[serde(default)]
    #[validate]
    pub geocoder: GeocoderConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            search_debounce_ms: default_search_debounce_ms(),
            region_settle_ms: default_region_settle_ms(),
            min_query_len: default_min_query_len(),
            recent_capacity: default_recent_capacity(),
            max_suggestions: default_max_suggestions(),
            position_timeout_secs: default_position_timeout_secs(),
            position_max_fix_age_secs: default_position_max_fix_age_secs(),
            zones: default_zones(),
            popular_locations: default_popular_locations(),
            geocoder: GeocoderConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    pub fn region_settle(&self) -> Duration {
        Duration::from_millis(self.region_settle_ms)
    }

    pub fn position_timeout(&self) -> Duration {
        Duration::from_secs(self.position_timeout_secs)
    }

    pub fn position_max_fix_age(&self) -> Duration {
        Duration::from_secs(self.position_max_fix_age_secs)
    }

    pub fn popular_suggestions(&self) -> Vec<LocationSuggestion> {
        self.popular_locations
            .iter()
            .enumerate()
            .map(|(index, spot)| spot.to_suggestion(index))
            .collect()
    }
}

fn default_search_debounce_ms() -> u64 {
    300
}

fn default_region_settle_ms() -> u64 {
    300
}

fn default_min_query_len() -> usize {
    3
}

fn default_recent_capacity() -> usize {
    5
}

fn default_max_suggestions() -> usize {
    8
}

fn default_position_timeout_secs() -> u64 {
    10
}

fn default_position_max_fix_age_secs() -> u64 {
    300
}

fn default_geocoder_endpoint() -> String {
    "https://nominatim.openstreetmap.org".to_string()
}

fn default_user_agent() -> String {
    "mealdrop-location/0.3".to_string()
}

fn default_geocoder_timeout_secs() -> u64 {
    8
}

fn default_max_results() -> usize {
    8
}

fn default_zones() -> Vec<DeliveryZone> {
    vec![
        DeliveryZone::new("Marina Bay", Coordinate::new(1.2834, 103.8607), 3.0),
        DeliveryZone::new("Orchard", Coordinate::new(1.3048, 103.8318), 2.5),
        DeliveryZone::new("Changi", Coordinate::new(1.3644, 103.9915), 4.0)
            .with_special_pricing(),
    ]
}

fn default_popular_locations() -> Vec<PopularSpot> {
    vec![
        PopularSpot {
            title: "Marina Bay Sands".to_string(),
            subtitle: Some("10 Bayfront Avenue".to_string()),
            latitude: 1.2834,
            longitude: 103.8607,
        },
        PopularSpot {
            title: "ION Orchard".to_string(),
            subtitle: Some("2 Orchard Turn".to_string()),
            latitude: 1.3040,
            longitude: 103.8318,
        },
        PopularSpot {
            title: "Gardens by the Bay".to_string(),
            subtitle: Some("18 Marina Gardens Drive".to_string()),
            latitude: 1.2816,
            longitude: 103.8636,
        },
        PopularSpot {
            title: "Lau Pa Sat".to_string(),
            subtitle: Some("18 Raffles Quay".to_string()),
            latitude: 1.2806,
            longitude: 103.8505,
        },
        PopularSpot {
            title: "Jewel Changi Airport".to_string(),
            subtitle: Some("78 Airport Boulevard".to_string()),
            latitude: 1.3602,
            longitude: 103.9897,
        },
    ]
}

fn validate_endpoint(endpoint: &str) -> Result<(), ValidationError> {
    if url::Url::parse(endpoint).is_err() {
        let mut err = ValidationError::new("invalid_endpoint");
        err.message = Some("Geocoder endpoint must be a valid URL".into());
        return Err(err);
    }
    Ok(())
}

fn validate_zones(zones: &[DeliveryZone]) -> Result<(), ValidationError> {
    if zones.is_empty() {
        let mut err = ValidationError::new("no_zones");
        err.message = Some("At least one delivery zone must be configured".into());
        return Err(err);
    }
    for zone in zones {
        if !(zone.radius_km > 0.0) {
            let mut err = ValidationError::new("invalid_radius");
            err.message =
                Some(format!("Zone {} must have a positive radius", zone.name).into());
            return Err(err);
        }
    }
    Ok(())
}

fn validate_limits(config: &EngineConfig) -> Result<(), ValidationError> {
    if config.min_query_len == 0 {
        let mut err = ValidationError::new("min_query_len");
        err.message = Some("min_query_len must be at least 1".into());
        return Err(err);
    }
    if config.recent_capacity == 0 {
        let mut err = ValidationError::new("recent_capacity");
        err.message = Some("recent_capacity must be at least 1".into());
        return Err(err);
    }
    if config.max_suggestions == 0 {
        let mut err = ValidationError::new("max_suggestions");
        err.message = Some("max_suggestions must be at least 1".into());
        return Err(err);
    }
    Ok(())
}

/// Load configuration from defaults, optional config files, and the
/// environment, in that order of precedence.
pub fn load_config() -> Result<EngineConfig, ConfigLoadError> {
    let run_env = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".to_string());
    info!("Loading configuration for environment: {}", run_env);

    let builder = Config::builder()
        .set_default("search_debounce_ms", default_search_debounce_ms())?
        .set_default("region_settle_ms", default_region_settle_ms())?
        .set_default("min_query_len", default_min_query_len() as i64)?
        .set_default("recent_capacity", default_recent_capacity() as i64)?
        .set_default("max_suggestions", default_max_suggestions() as i64)?
        .set_default("position_timeout_secs", default_position_timeout_secs())?
        .set_default(
            "position_max_fix_age_secs",
            default_position_max_fix_age_secs(),
        )?
        .set_default("geocoder.endpoint", default_geocoder_endpoint())?
        .set_default("geocoder.user_agent", default_user_agent())?
        .set_default("geocoder.timeout_secs", default_geocoder_timeout_secs())?
        .set_default("geocoder.max_results", default_max_results() as i64)?
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{}", run_env)).required(false))
        .add_source(Environment::with_prefix("MEALDROP").separator("__"));

    let config: EngineConfig = builder.build()?.try_deserialize()?;
    config.validate()?;
    Ok(config)
}
