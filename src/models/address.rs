use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::location::{LocationKind, LocationSuggestion};

/// Preferred delivery window for a saved address, e.g. 18:00 to 21:00.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: String,
    pub to: String,
}

/// A labelled address book entry ("Home", "Work") with delivery metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedAddress {
    pub id: Uuid,
    pub location: LocationSuggestion,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub building_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_time_window: Option<TimeWindow>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SavedAddress {
    pub fn new(mut location: LocationSuggestion, label: impl Into<String>) -> Self {
        location.kind = LocationKind::Saved;
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            location,
            label: label.into(),
            unit_number: None,
            building_name: None,
            delivery_instructions: None,
            contact_number: None,
            preferred_time_window: None,
            is_default: false,
            icon: None,
            color: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Suggestion-shaped view of this entry, tagged with the address label.
    pub fn suggestion(&self) -> LocationSuggestion {
        let mut suggestion = self.location.clone();
        suggestion.kind = LocationKind::Saved;
        suggestion.subtitle = suggestion
            .subtitle
            .or_else(|| Some(self.label.clone()));
        suggestion
    }
}
