use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::errors::LocationError;
use crate::events::SuggestionSource;
use crate::models::{DeliveryLocation, LocationKind, LocationSuggestion, SavedAddress};
use crate::storage::{load_json, store_json, StorageBackend};

const RECENTS_KEY: &str = "recent_locations";
const SAVED_KEY: &str = "saved_addresses";

#[derive(Debug, Default)]
struct CacheState {
    recents: Vec<LocationSuggestion>,
    saved: Vec<SavedAddress>,
}

/// Recently used locations and the saved address book, persisted through a
/// [`StorageBackend`]. Recents behave as a small most-recent-first list
/// with a fixed capacity.
#[derive(Clone)]
pub struct LocationCache {
    storage: Arc<dyn StorageBackend>,
    state: Arc<RwLock<CacheState>>,
    capacity: usize,
    popular: Vec<LocationSuggestion>,
}

impl LocationCache {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        capacity: usize,
        popular: Vec<LocationSuggestion>,
    ) -> Self {
        Self {
            storage,
            state: Arc::new(RwLock::new(CacheState::default())),
            capacity,
            popular,
        }
    }

    /// Load persisted state. An unreadable blob is logged and treated as
    /// empty so one bad write never wedges the picker.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<(), LocationError> {
        let recents = match load_json::<Vec<LocationSuggestion>>(&*self.storage, RECENTS_KEY).await
        {
            Ok(recents) => recents.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable recent locations");
                Vec::new()
            }
        };
        let saved = match load_json::<Vec<SavedAddress>>(&*self.storage, SAVED_KEY).await {
            Ok(saved) => saved.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable saved addresses");
                Vec::new()
            }
        };
        debug!(recents = recents.len(), saved = saved.len(), "Location cache loaded");

        let mut state = self.state.write().await;
        state.recents = recents;
        state.saved = saved;
        Ok(())
    }

    /// Record a confirmed location at the front of the recents list,
    /// deduplicating by id and evicting the oldest entry past capacity.
    #[instrument(skip(self, location), fields(title = %location.title()))]
    pub async fn record_recent(&self, location: &DeliveryLocation) -> Result<(), LocationError> {
        let mut suggestion = location.suggestion_view();
        suggestion.kind = LocationKind::Recent;

        let mut state = self.state.write().await;
        state.recents.retain(|entry| entry.id != suggestion.id);
        state.recents.insert(0, suggestion);
        state.recents.truncate(self.capacity);
        store_json(&*self.storage, RECENTS_KEY, &state.recents).await?;
        Ok(())
    }

    pub async fn delete_recent(&self, id: &str) -> Result<bool, LocationError> {
        let mut state = self.state.write().await;
        let before = state.recents.len();
        state.recents.retain(|entry| entry.id != id);
        if state.recents.len() == before {
            return Ok(false);
        }
        store_json(&*self.storage, RECENTS_KEY, &state.recents).await?;
        Ok(true)
    }

    /// Insert or update a saved address. Marking an address as default
    /// clears the flag from every other entry.
    #[instrument(skip(self, address), fields(label = %address.label))]
    pub async fn save_address(
        &self,
        mut address: SavedAddress,
    ) -> Result<SavedAddress, LocationError> {
        address.touch();

        let mut state = self.state.write().await;
        if address.is_default {
            for entry in &mut state.saved {
                entry.is_default = false;
            }
        }
        match state.saved.iter_mut().find(|entry| entry.id == address.id) {
            Some(entry) => *entry = address.clone(),
            None => state.saved.push(address.clone()),
        }
        store_json(&*self.storage, SAVED_KEY, &state.saved).await?;
        Ok(address)
    }

    pub async fn delete_address(&self, id: Uuid) -> Result<bool, LocationError> {
        let mut state = self.state.write().await;
        let before = state.saved.len();
        state.saved.retain(|entry| entry.id != id);
        if state.saved.len() == before {
            return Ok(false);
        }
        store_json(&*self.storage, SAVED_KEY, &state.saved).await?;
        Ok(true)
    }

    pub async fn recents(&self) -> Vec<LocationSuggestion> {
        self.state.read().await.recents.clone()
    }

    pub async fn addresses(&self) -> Vec<SavedAddress> {
        self.state.read().await.saved.clone()
    }

    pub async fn find_address(&self, id: Uuid) -> Option<SavedAddress> {
        self.state
            .read()
            .await
            .saved
            .iter()
            .find(|entry| entry.id == id)
            .cloned()
    }

    pub async fn default_address(&self) -> Option<SavedAddress> {
        self.state
            .read()
            .await
            .saved
            .iter()
            .find(|entry| entry.is_default)
            .cloned()
    }

    pub fn popular(&self) -> &[LocationSuggestion] {
        &self.popular
    }

    /// The list shown before the user types: recents when any exist,
    /// otherwise the curated popular spots.
    pub async fn suggestion_feed(&self) -> (SuggestionSource, Vec<LocationSuggestion>) {
        let recents = self.recents().await;
        if recents.is_empty() {
            (SuggestionSource::Popular, self.popular.clone())
        } else {
            (SuggestionSource::Recent, recents)
        }
    }
}
