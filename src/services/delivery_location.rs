use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::errors::LocationError;
use crate::models::{DeliveryLocation, LocationSource};
use crate::storage::{load_json, store_json, StorageBackend};

const CURRENT_KEY: &str = "delivery_location";
const PREFERENCES_KEY: &str = "location_preferences";

/// Persisted picker preferences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationPreferences {
    #[serde(default)]
    pub last_location_source: Option<LocationSource>,
    /// Set once the user explicitly chooses anything other than the device
    /// position. From then on the engine never swaps their choice for a
    /// fresh fix on its own.
    #[serde(default)]
    pub prevent_current_location_auto_select: bool,
    #[serde(default)]
    pub auto_locate_on_launch: bool,
}

#[derive(Debug, Default)]
struct StoreState {
    current: Option<DeliveryLocation>,
    preferences: LocationPreferences,
}

/// Holds the one confirmed delivery location plus the preferences that
/// govern automatic selection, both persisted across launches.
#[derive(Clone)]
pub struct DeliveryLocationStore {
    storage: Arc<dyn StorageBackend>,
    state: Arc<RwLock<StoreState>>,
}

impl DeliveryLocationStore {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            state: Arc::new(RwLock::new(StoreState::default())),
        }
    }

    /// Load the persisted location and preferences. Unreadable blobs are
    /// logged and replaced with defaults.
    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<(), LocationError> {
        let current = match load_json::<DeliveryLocation>(&*self.storage, CURRENT_KEY).await {
            Ok(current) => current,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable delivery location");
                None
            }
        };
        let preferences =
            match load_json::<LocationPreferences>(&*self.storage, PREFERENCES_KEY).await {
                Ok(preferences) => preferences.unwrap_or_default(),
                Err(e) => {
                    warn!(error = %e, "Discarding unreadable location preferences");
                    LocationPreferences::default()
                }
            };
        debug!(
            has_location = current.is_some(),
            source = ?preferences.last_location_source,
            "Delivery location store loaded"
        );

        let mut state = self.state.write().await;
        state.current = current;
        state.preferences = preferences;
        Ok(())
    }

    pub async fn get(&self) -> Option<DeliveryLocation> {
        self.state.read().await.current.clone()
    }

    /// Set the confirmed location and update the selection preferences
    /// derived from where it came from.
    #[instrument(skip(self, location), fields(title = %location.title()))]
    pub async fn set(&self, location: DeliveryLocation) -> Result<(), LocationError> {
        let source = location.source();

        let mut state = self.state.write().await;
        state.preferences.last_location_source = Some(source);
        if source != LocationSource::Current {
            state.preferences.prevent_current_location_auto_select = true;
        }
        state.current = Some(location);

        store_json(&*self.storage, CURRENT_KEY, &state.current).await?;
        store_json(&*self.storage, PREFERENCES_KEY, &state.preferences).await?;
        Ok(())
    }

    /// Forget the confirmed location. Preferences survive so a later
    /// launch still respects the user's explicit choices.
    pub async fn clear(&self) -> Result<(), LocationError> {
        let mut state = self.state.write().await;
        state.current = None;
        self.storage.remove(CURRENT_KEY).await?;
        Ok(())
    }

    pub async fn preferences(&self) -> LocationPreferences {
        self.state.read().await.preferences.clone()
    }

    /// Whether the engine may populate the delivery location from the
    /// device position without the user asking.
    pub async fn suggest_current_allowed(&self) -> bool {
        !self
            .state
            .read()
            .await
            .preferences
            .prevent_current_location_auto_select
    }

    pub async fn set_auto_locate_on_launch(&self, enabled: bool) -> Result<(), LocationError> {
        let mut state = self.state.write().await;
        state.preferences.auto_locate_on_launch = enabled;
        store_json(&*self.storage, PREFERENCES_KEY, &state.preferences).await?;
        Ok(())
    }
}
