use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::GeocoderConfig;
use crate::errors::LocationError;
use crate::models::{Coordinate, LocationSuggestion};
use crate::services::geocoding::GeocodingProvider;

/// Geocoding provider backed by a Nominatim-compatible HTTP API.
///
/// Interactive callers tolerate a flaky provider, so the trait methods
/// degrade to empty results on transport and decode failures and log the
/// cause instead of propagating it.
#[derive(Debug, Clone)]
pub struct NominatimGeocoder {
    client: Client,
    base: Url,
    max_results: usize,
}

impl NominatimGeocoder {
    pub fn new(config: &GeocoderConfig) -> Result<Self, LocationError> {
        let mut base = Url::parse(&config.endpoint)
            .map_err(|e| LocationError::Config(format!("Invalid geocoder endpoint: {}", e)))?;
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }

        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| LocationError::provider(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base,
            max_results: config.max_results,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, LocationError> {
        self.base
            .join(path)
            .map_err(|e| LocationError::provider(format!("Invalid request URL: {}", e)))
    }

    #[instrument(skip(self))]
    async fn fetch_search(&self, query: &str) -> Result<Vec<LocationSuggestion>, LocationError> {
        let mut url = self.endpoint("search")?;
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("format", "jsonv2")
            .append_pair("addressdetails", "1")
            .append_pair("limit", &self.max_results.to_string());

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| LocationError::provider(format!("Search request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(LocationError::provider(format!(
                "Search returned status {}",
                response.status()
            )));
        }

        let places: Vec<NominatimPlace> = response
            .json()
            .await
            .map_err(|e| LocationError::provider(format!("Invalid search response: {}", e)))?;

        let mut suggestions = Vec::with_capacity(places.len());
        for place in places {
            match place.to_suggestion() {
                Some(suggestion) => suggestions.push(suggestion),
                None => {
                    warn!(place_id = place.place_id, "Skipping place with unparseable coordinate");
                }
            }
        }
        suggestions.truncate(self.max_results);
        debug!(count = suggestions.len(), "Search results mapped");
        Ok(suggestions)
    }

    #[instrument(skip(self))]
    async fn fetch_details(
        &self,
        place_id: &str,
    ) -> Result<Option<LocationSuggestion>, LocationError> {
        let mut url = self.endpoint("details")?;
        url.query_pairs_mut()
            .append_pair("place_id", place_id)
            .append_pair("format", "json");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| LocationError::provider(format!("Details request failed: {}", e)))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(LocationError::provider(format!(
                "Details returned status {}",
                response.status()
            )));
        }

        let details: NominatimDetails = response
            .json()
            .await
            .map_err(|e| LocationError::provider(format!("Invalid details response: {}", e)))?;

        let [longitude, latitude] = details.centroid.coordinates;
        let title = details
            .localname
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| Coordinate::new(latitude, longitude).label());
        let suggestion = LocationSuggestion::search(format!("osm-{}", place_id), title)
            .with_coordinate(Coordinate::new(latitude, longitude))
            .with_place_id(place_id);
        Ok(Some(suggestion))
    }

    #[instrument(skip(self))]
    async fn fetch_reverse(
        &self,
        coordinate: Coordinate,
    ) -> Result<Option<LocationSuggestion>, LocationError> {
        let mut url = self.endpoint("reverse")?;
        url.query_pairs_mut()
            .append_pair("lat", &coordinate.latitude.to_string())
            .append_pair("lon", &coordinate.longitude.to_string())
            .append_pair("format", "jsonv2");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| LocationError::provider(format!("Reverse request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(LocationError::provider(format!(
                "Reverse returned status {}",
                response.status()
            )));
        }

        let place: ReversePlace = response
            .json()
            .await
            .map_err(|e| LocationError::provider(format!("Invalid reverse response: {}", e)))?;

        if let Some(error) = place.error {
            debug!(error = %error, "Reverse geocode found nothing");
            return Ok(None);
        }
        let display_name = match place.display_name {
            Some(name) => name,
            None => return Ok(None),
        };
        let id = place
            .place_id
            .map(|id| format!("osm-{}", id))
            .unwrap_or_else(|| format!("reverse-{}", coordinate.label()));
        let title = derive_title(place.name, &display_name);
        let mut suggestion = LocationSuggestion::search(id, title)
            .with_subtitle(display_name)
            .with_coordinate(coordinate);
        if let Some(place_id) = place.place_id {
            suggestion = suggestion.with_place_id(place_id.to_string());
        }
        Ok(Some(suggestion))
    }
}

#[async_trait]
impl GeocodingProvider for NominatimGeocoder {
    async fn search(&self, query: &str) -> Result<Vec<LocationSuggestion>, LocationError> {
        match self.fetch_search(query).await {
            Ok(suggestions) => Ok(suggestions),
            Err(e) => {
                warn!(query = %query, error = %e, "Search failed, degrading to empty results");
                Ok(Vec::new())
            }
        }
    }

    async fn resolve_details(
        &self,
        place_id: &str,
    ) -> Result<Option<LocationSuggestion>, LocationError> {
        match self.fetch_details(place_id).await {
            Ok(details) => Ok(details),
            Err(e) => {
                warn!(place_id = %place_id, error = %e, "Details lookup failed");
                Ok(None)
            }
        }
    }

    async fn reverse_geocode(
        &self,
        coordinate: Coordinate,
    ) -> Result<Option<LocationSuggestion>, LocationError> {
        match self.fetch_reverse(coordinate).await {
            Ok(place) => Ok(place),
            Err(e) => {
                warn!(error = %e, "Reverse geocode failed");
                Ok(None)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    place_id: u64,
    lat: String,
    lon: String,
    #[serde(default)]
    name: Option<String>,
    display_name: String,
}

impl NominatimPlace {
    fn to_suggestion(&self) -> Option<LocationSuggestion> {
        let latitude: f64 = self.lat.parse().ok()?;
        let longitude: f64 = self.lon.parse().ok()?;
        let title = derive_title(self.name.clone(), &self.display_name);
        Some(
            LocationSuggestion::search(format!("osm-{}", self.place_id), title)
                .with_subtitle(self.display_name.clone())
                .with_coordinate(Coordinate::new(latitude, longitude))
                .with_place_id(self.place_id.to_string()),
        )
    }
}

#[derive(Debug, Deserialize)]
struct NominatimDetails {
    #[serde(default)]
    localname: Option<String>,
    centroid: Centroid,
}

/// GeoJSON point, coordinates ordered longitude then latitude.
#[derive(Debug, Deserialize)]
struct Centroid {
    coordinates: [f64; 2],
}

#[derive(Debug, Deserialize)]
struct ReversePlace {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    place_id: Option<u64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

fn derive_title(name: Option<String>, display_name: &str) -> String {
    if let Some(name) = name {
        if !name.is_empty() {
            return name;
        }
    }
    display_name
        .split(',')
        .next()
        .unwrap_or(display_name)
        .trim()
        .to_string()
}
