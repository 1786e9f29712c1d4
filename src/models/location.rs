use serde::{Deserialize, Serialize};

use super::address::SavedAddress;

/// A WGS-84 coordinate pair, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Fallback display label for a point with no resolved address,
    /// e.g. `"1.2834, 103.8607"` (4 decimal places).
    pub fn label(&self) -> String {
        format!("{:.4}, {:.4}", self.latitude, self.longitude)
    }
}

/// How a location entered the picker. Each variant guarantees a different
/// set of fields on [`LocationSuggestion`]; only `Current` and `DroppedPin`
/// guarantee a coordinate at construction time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LocationKind {
    SearchSuggestion,
    Recent,
    Current,
    Saved,
    Postal,
    DroppedPin,
}

/// A single selectable location: a search result, a recent entry, a saved
/// address entry, a postal-code hit, the device position, or a map pin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSuggestion {
    /// Unique within one result set.
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    /// Present for every kind except an unresolved `SearchSuggestion`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinate: Option<Coordinate>,
    pub kind: LocationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Provider handle for resolving a precise coordinate later.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub place_id: Option<String>,
}

impl LocationSuggestion {
    /// A provider search result. May lack a coordinate until its place
    /// details are resolved.
    pub fn search(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            subtitle: None,
            coordinate: None,
            kind: LocationKind::SearchSuggestion,
            address: None,
            place_id: None,
        }
    }

    /// The device position. Always carries a coordinate.
    pub fn current(coordinate: Coordinate, title: impl Into<String>) -> Self {
        Self {
            id: "current-location".to_string(),
            title: title.into(),
            subtitle: None,
            coordinate: Some(coordinate),
            kind: LocationKind::Current,
            address: None,
            place_id: None,
        }
    }

    /// A map pin. Always carries a coordinate.
    pub fn dropped_pin(coordinate: Coordinate, title: impl Into<String>) -> Self {
        Self {
            id: format!("pin-{:.6}-{:.6}", coordinate.latitude, coordinate.longitude),
            title: title.into(),
            subtitle: None,
            coordinate: Some(coordinate),
            kind: LocationKind::DroppedPin,
            address: None,
            place_id: None,
        }
    }

    pub fn with_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }

    pub fn with_coordinate(mut self, coordinate: Coordinate) -> Self {
        self.coordinate = Some(coordinate);
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_place_id(mut self, place_id: impl Into<String>) -> Self {
        self.place_id = Some(place_id.into());
        self
    }
}

/// Where the confirmed location came from, as recorded in the persisted
/// preferences blob.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LocationSource {
    Current,
    Saved,
    Search,
}

impl From<LocationKind> for LocationSource {
    fn from(kind: LocationKind) -> Self {
        match kind {
            LocationKind::Current => LocationSource::Current,
            LocationKind::Saved => LocationSource::Saved,
            _ => LocationSource::Search,
        }
    }
}

/// Manually entered delivery details attached to a candidate before
/// confirmation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub building_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_instructions: Option<String>,
}

impl DeliveryDetails {
    pub fn is_empty(&self) -> bool {
        self.unit_number.is_none()
            && self.building_name.is_none()
            && self.delivery_instructions.is_none()
    }
}

/// The one confirmed delivery location the rest of the app consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryLocation {
    Suggestion {
        suggestion: LocationSuggestion,
        #[serde(default)]
        details: DeliveryDetails,
    },
    Saved(SavedAddress),
}

impl DeliveryLocation {
    pub fn title(&self) -> &str {
        match self {
            DeliveryLocation::Suggestion { suggestion, .. } => &suggestion.title,
            DeliveryLocation::Saved(address) => &address.location.title,
        }
    }

    pub fn coordinate(&self) -> Option<Coordinate> {
        match self {
            DeliveryLocation::Suggestion { suggestion, .. } => suggestion.coordinate,
            DeliveryLocation::Saved(address) => address.location.coordinate,
        }
    }

    pub fn kind(&self) -> LocationKind {
        match self {
            DeliveryLocation::Suggestion { suggestion, .. } => suggestion.kind,
            DeliveryLocation::Saved(_) => LocationKind::Saved,
        }
    }

    pub fn source(&self) -> LocationSource {
        LocationSource::from(self.kind())
    }

    /// The suggestion-shaped view used for the recent-locations list.
    pub fn suggestion_view(&self) -> LocationSuggestion {
        match self {
            DeliveryLocation::Suggestion { suggestion, .. } => suggestion.clone(),
            DeliveryLocation::Saved(address) => address.suggestion(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_label_uses_four_decimal_places() {
        let coordinate = Coordinate::new(1.283_41_f64, 103.860_72_f64);
        assert_eq!(coordinate.label(), "1.2834, 103.8607");
    }

    #[test]
    fn pin_and_current_constructors_always_carry_a_coordinate() {
        let coordinate = Coordinate::new(1.3, 103.8);
        assert!(LocationSuggestion::current(coordinate, "Current location")
            .coordinate
            .is_some());
        assert!(LocationSuggestion::dropped_pin(coordinate, "Pinned place")
            .coordinate
            .is_some());
    }

    #[test]
    fn search_suggestion_may_lack_a_coordinate() {
        let suggestion = LocationSuggestion::search("s-1", "Marina Bay Sands")
            .with_place_id("p-1");
        assert!(suggestion.coordinate.is_none());
        assert_eq!(suggestion.kind, LocationKind::SearchSuggestion);
    }

    #[test]
    fn source_maps_from_kind() {
        assert_eq!(
            LocationSource::from(LocationKind::Current),
            LocationSource::Current
        );
        assert_eq!(
            LocationSource::from(LocationKind::Saved),
            LocationSource::Saved
        );
        assert_eq!(
            LocationSource::from(LocationKind::DroppedPin),
            LocationSource::Search
        );
        assert_eq!(
            LocationSource::from(LocationKind::Postal),
            LocationSource::Search
        );
    }

    #[test]
    fn suggestion_round_trips_through_json() {
        let suggestion = LocationSuggestion::search("s-9", "Lau Pa Sat")
            .with_subtitle("18 Raffles Quay")
            .with_coordinate(Coordinate::new(1.2806, 103.8505));
        let raw = serde_json::to_string(&suggestion).unwrap();
        let back: LocationSuggestion = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, suggestion);
    }
}
