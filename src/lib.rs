//! Location resolution and delivery-eligibility engine for the MealDrop
//! ordering apps.
//!
//! The engine turns free-text search, postal codes, map pins, the device
//! position, and the saved address book into one confirmed delivery
//! location, gated by configurable delivery zones. UI layers consume it
//! through [`SelectionController`] and the [`PickerEvent`] stream.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod errors;
pub mod events;
pub mod geofence;
pub mod models;
pub mod services;
pub mod storage;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, instrument, warn};
use validator::Validate;

pub use config::{load_config, ConfigLoadError, EngineConfig, GeocoderConfig};
pub use errors::LocationError;
pub use events::{
    channel, process_events, EventHandler, EventSender, LoggingEventHandler, PickerEvent,
    SuggestionSource,
};
pub use geofence::{distance_km, Eligibility, ZoneSet};
pub use models::{
    Coordinate, DeliveryDetails, DeliveryLocation, DeliveryZone, LocationKind, LocationSource,
    LocationSuggestion, SavedAddress,
};
pub use services::{
    validate_postal_code, DeliveryLocationStore, FixedPositionProvider, GeocodingProvider,
    LocationCache, LocationPreferences, NominatimGeocoder, PositionFix, PositionProvider,
    SearchSession, SelectionController, SelectionState,
};
pub use storage::{FileStorage, MemoryStorage, StorageBackend};

/// Wires the engine together: storage-backed caches, the debounced search
/// session, and the selection controller, all sharing one event channel.
#[derive(Clone)]
pub struct LocationEngine {
    config: EngineConfig,
    zones: ZoneSet,
    cache: LocationCache,
    store: DeliveryLocationStore,
    search: SearchSession,
    controller: SelectionController,
    position: Arc<dyn PositionProvider>,
    geocoder: Arc<dyn GeocodingProvider>,
}

impl LocationEngine {
    /// Build the engine and return it with the picker event stream.
    pub async fn build(
        config: EngineConfig,
        storage: Arc<dyn StorageBackend>,
        geocoder: Arc<dyn GeocodingProvider>,
        position: Arc<dyn PositionProvider>,
    ) -> Result<(Self, mpsc::Receiver<PickerEvent>), LocationError> {
        config
            .validate()
            .map_err(|e| LocationError::Config(e.to_string()))?;

        let (events, receiver) = events::channel(64);
        let zones = ZoneSet::new(config.zones.clone());

        let cache = LocationCache::new(
            storage.clone(),
            config.recent_capacity,
            config.popular_suggestions(),
        );
        cache.load().await?;

        let store = DeliveryLocationStore::new(storage);
        store.init().await?;

        let search = SearchSession::new(
            geocoder.clone(),
            cache.clone(),
            events.clone(),
            config.search_debounce(),
            config.min_query_len,
            config.max_suggestions,
        );

        let controller = SelectionController::new(
            geocoder.clone(),
            position.clone(),
            zones.clone(),
            cache.clone(),
            store.clone(),
            search.clone(),
            events,
            config.region_settle(),
            config.position_timeout(),
            config.position_max_fix_age(),
        );

        info!(
            zones = config.zones.len(),
            debounce_ms = config.search_debounce_ms,
            "Location engine ready"
        );
        Ok((
            Self {
                config,
                zones,
                cache,
                store,
                search,
                controller,
                position,
                geocoder,
            },
            receiver,
        ))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn zones(&self) -> &ZoneSet {
        &self.zones
    }

    pub fn cache(&self) -> &LocationCache {
        &self.cache
    }

    pub fn store(&self) -> &DeliveryLocationStore {
        &self.store
    }

    pub fn search(&self) -> &SearchSession {
        &self.search
    }

    pub fn controller(&self) -> &SelectionController {
        &self.controller
    }

    /// Populate the delivery location at launch.
    ///
    /// Restores the persisted location when one exists. Otherwise, and only
    /// when the preferences allow it, resolves the device position and
    /// auto-selects it if it falls inside a delivery zone. Position and
    /// provider trouble here is logged, never surfaced: launch must not
    /// fail because the GPS was slow.
    #[instrument(skip(self))]
    pub async fn bootstrap(&self) -> Result<Option<DeliveryLocation>, LocationError> {
        if let Some(existing) = self.store.get().await {
            info!(title = %existing.title(), "Restored persisted delivery location");
            return Ok(Some(existing));
        }

        let preferences = self.store.preferences().await;
        if preferences.prevent_current_location_auto_select {
            return Ok(None);
        }
        if !preferences.auto_locate_on_launch {
            return Ok(None);
        }

        let fix = match tokio::time::timeout(
            self.config.position_timeout(),
            self.position.current_position(),
        )
        .await
        {
            Ok(Ok(fix)) => fix,
            Ok(Err(e)) => {
                warn!(error = %e, "Skipping launch auto-locate");
                return Ok(None);
            }
            Err(_) => {
                warn!("Skipping launch auto-locate, no position fix in time");
                return Ok(None);
            }
        };
        if fix.age() > self.config.position_max_fix_age() {
            warn!(
                age_secs = fix.age().as_secs(),
                "Skipping launch auto-locate, cached fix too old"
            );
            return Ok(None);
        }
        let coordinate = fix.coordinate;

        if !self.zones.check(coordinate).available {
            info!("Device position outside delivery zones, not auto-selecting");
            return Ok(None);
        }

        let suggestion = match self.geocoder.reverse_geocode(coordinate).await {
            Ok(Some(mut suggestion)) => {
                suggestion.kind = LocationKind::Current;
                suggestion.coordinate = Some(coordinate);
                suggestion
            }
            _ => LocationSuggestion::current(coordinate, coordinate.label()),
        };

        let location = DeliveryLocation::Suggestion {
            suggestion,
            details: DeliveryDetails::default(),
        };
        self.store.set(location.clone()).await?;
        info!(title = %location.title(), "Auto-selected device position at launch");
        Ok(Some(location))
    }
}
