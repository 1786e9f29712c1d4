use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::errors::LocationError;
use crate::events::{EventSender, PickerEvent};
use crate::geofence::{Eligibility, ZoneSet};
use crate::models::{
    Coordinate, DeliveryDetails, DeliveryLocation, LocationKind, LocationSuggestion,
    SavedAddress,
};
use crate::services::delivery_location::DeliveryLocationStore;
use crate::services::geocoding::{GeocodingProvider, PositionProvider};
use crate::services::location_cache::LocationCache;
use crate::services::search_session::SearchSession;

/// Picker phases. `SearchActive` is reported while a search is in flight
/// and refines to `SuggestionsReady` once results have landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SelectionState {
    Idle,
    SearchActive,
    SuggestionsReady,
    MapMode,
    PinDropped,
    ReverseGeocoding,
    CandidateReady,
    AwaitingConfirm,
    Cancelled,
}

#[derive(Debug, Clone)]
struct Candidate {
    suggestion: LocationSuggestion,
    details: DeliveryDetails,
}

struct ControllerState {
    phase: SelectionState,
    candidate: Option<Candidate>,
    saved: Option<SavedAddress>,
    /// Bumped whenever an in-flight pin or position task must be
    /// invalidated. Tasks re-check it before committing their result.
    map_generation: u64,
    settle_timer: Option<JoinHandle<()>>,
}

impl ControllerState {
    fn bump_map(&mut self) -> u64 {
        self.map_generation = self.map_generation.wrapping_add(1);
        if let Some(timer) = self.settle_timer.take() {
            timer.abort();
        }
        self.map_generation
    }
}

/// Releases the confirm re-entrancy flag on every exit path.
struct ConfirmGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for ConfirmGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Drives the delivery-location picker: search, map pinning, the device
/// position, saved addresses, eligibility checks, and confirmation.
#[derive(Clone)]
pub struct SelectionController {
    geocoder: Arc<dyn GeocodingProvider>,
    position: Arc<dyn PositionProvider>,
    zones: ZoneSet,
    cache: LocationCache,
    store: DeliveryLocationStore,
    search: SearchSession,
    events: EventSender,
    state: Arc<Mutex<ControllerState>>,
    confirm_in_flight: Arc<AtomicBool>,
    settle: Duration,
    position_timeout: Duration,
    position_max_fix_age: Duration,
}

impl SelectionController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        geocoder: Arc<dyn GeocodingProvider>,
        position: Arc<dyn PositionProvider>,
        zones: ZoneSet,
        cache: LocationCache,
        store: DeliveryLocationStore,
        search: SearchSession,
        events: EventSender,
        settle: Duration,
        position_timeout: Duration,
        position_max_fix_age: Duration,
    ) -> Self {
        Self {
            geocoder,
            position,
            zones,
            cache,
            store,
            search,
            events,
            state: Arc::new(Mutex::new(ControllerState {
                phase: SelectionState::Idle,
                candidate: None,
                saved: None,
                map_generation: 0,
                settle_timer: None,
            })),
            confirm_in_flight: Arc::new(AtomicBool::new(false)),
            settle,
            position_timeout,
            position_max_fix_age,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn ensure_phase(
        &self,
        allowed: &[SelectionState],
        action: &str,
    ) -> Result<SelectionState, LocationError> {
        let state = self.lock();
        if allowed.contains(&state.phase) {
            Ok(state.phase)
        } else {
            Err(LocationError::InvalidState {
                from: state.phase.to_string(),
                action: action.to_string(),
            })
        }
    }

    /// Current phase, with `SearchActive` refined to `SuggestionsReady`
    /// once no search is pending.
    pub fn phase(&self) -> SelectionState {
        let phase = self.lock().phase;
        if phase == SelectionState::SearchActive && !self.search.pending() {
            SelectionState::SuggestionsReady
        } else {
            phase
        }
    }

    pub fn candidate(&self) -> Option<(LocationSuggestion, DeliveryDetails)> {
        self.lock()
            .candidate
            .as_ref()
            .map(|c| (c.suggestion.clone(), c.details.clone()))
    }

    /// Check a coordinate against the configured delivery zones.
    pub fn check_eligibility(&self, coordinate: Coordinate) -> Eligibility {
        self.zones.check(coordinate)
    }

    /// Open the picker, discarding any earlier candidate, and emit the
    /// initial suggestion feed.
    #[instrument(skip(self))]
    pub async fn open_picker(&self) {
        self.search.reset();
        {
            let mut state = self.lock();
            state.phase = SelectionState::SearchActive;
            state.candidate = None;
            state.saved = None;
            state.bump_map();
        }
        let (source, items) = self.cache.suggestion_feed().await;
        self.events
            .send_or_log(PickerEvent::SuggestionsChanged { source, items })
            .await;
    }

    /// Forward a search keystroke to the debounced session.
    pub fn query_changed(&self, text: &str) -> Result<(), LocationError> {
        self.ensure_phase(
            &[
                SelectionState::SearchActive,
                SelectionState::SuggestionsReady,
                SelectionState::CandidateReady,
                SelectionState::AwaitingConfirm,
            ],
            "search",
        )?;
        self.lock().phase = SelectionState::SearchActive;
        self.search.input(text);
        Ok(())
    }

    /// Search by six-digit postal code, skipping the debounce window.
    pub fn postal_entered(&self, code: &str) -> Result<(), LocationError> {
        self.ensure_phase(
            &[
                SelectionState::SearchActive,
                SelectionState::SuggestionsReady,
                SelectionState::CandidateReady,
                SelectionState::AwaitingConfirm,
            ],
            "search by postal code",
        )?;
        self.search.input_postal(code)?;
        self.lock().phase = SelectionState::SearchActive;
        Ok(())
    }

    /// Take a suggestion as the candidate, resolving its coordinate from
    /// the provider when the search result carried none.
    #[instrument(skip(self, suggestion), fields(title = %suggestion.title))]
    pub async fn select_suggestion(
        &self,
        mut suggestion: LocationSuggestion,
    ) -> Result<LocationSuggestion, LocationError> {
        self.ensure_phase(
            &[
                SelectionState::SearchActive,
                SelectionState::SuggestionsReady,
                SelectionState::CandidateReady,
                SelectionState::AwaitingConfirm,
            ],
            "select a suggestion",
        )?;

        if suggestion.coordinate.is_none() {
            let place_id = match suggestion.place_id.clone() {
                Some(place_id) => place_id,
                None => return Err(LocationError::MissingCoordinate),
            };
            self.lock().phase = SelectionState::ReverseGeocoding;

            let resolved = match self.geocoder.resolve_details(&place_id).await {
                Ok(resolved) => resolved,
                Err(e) => {
                    warn!(place_id = %place_id, error = %e, "Place details lookup failed");
                    None
                }
            };
            // Details must carry a coordinate to anchor the candidate.
            let resolved = match resolved {
                Some(resolved) if resolved.coordinate.is_some() => resolved,
                _ => {
                    self.lock().phase = SelectionState::SearchActive;
                    return Err(LocationError::MissingCoordinate);
                }
            };
            // Keep the text the user tapped on; only the coordinate and
            // any missing address fields come from the details lookup.
            suggestion.coordinate = resolved.coordinate;
            if suggestion.address.is_none() {
                suggestion.address = resolved.address;
            }

            let mut state = self.lock();
            if state.phase != SelectionState::ReverseGeocoding {
                return Err(LocationError::InvalidState {
                    from: state.phase.to_string(),
                    action: "select a suggestion".to_string(),
                });
            }
            state.candidate = Some(Candidate {
                suggestion: suggestion.clone(),
                details: DeliveryDetails::default(),
            });
            state.saved = None;
            state.phase = SelectionState::CandidateReady;
        } else {
            let mut state = self.lock();
            state.candidate = Some(Candidate {
                suggestion: suggestion.clone(),
                details: DeliveryDetails::default(),
            });
            state.saved = None;
            state.phase = SelectionState::CandidateReady;
        }

        self.events
            .send_or_log(PickerEvent::CandidateReady(suggestion.clone()))
            .await;
        Ok(suggestion)
    }

    /// Take a saved address as the candidate.
    #[instrument(skip(self))]
    pub async fn select_saved(&self, id: Uuid) -> Result<SavedAddress, LocationError> {
        self.ensure_phase(
            &[
                SelectionState::SearchActive,
                SelectionState::SuggestionsReady,
                SelectionState::CandidateReady,
                SelectionState::AwaitingConfirm,
            ],
            "select a saved address",
        )?;

        let address = self
            .cache
            .find_address(id)
            .await
            .ok_or_else(|| LocationError::invalid_input(format!("Unknown saved address {}", id)))?;

        let suggestion = address.suggestion();
        {
            let mut state = self.lock();
            state.candidate = Some(Candidate {
                suggestion: suggestion.clone(),
                details: DeliveryDetails {
                    unit_number: address.unit_number.clone(),
                    building_name: address.building_name.clone(),
                    delivery_instructions: address.delivery_instructions.clone(),
                },
            });
            state.saved = Some(address.clone());
            state.phase = SelectionState::CandidateReady;
        }

        self.events
            .send_or_log(PickerEvent::CandidateReady(suggestion))
            .await;
        Ok(address)
    }

    /// Switch to map pinning. Any active search is cancelled.
    pub fn enter_map_mode(&self) -> Result<(), LocationError> {
        self.ensure_phase(
            &[
                SelectionState::SearchActive,
                SelectionState::SuggestionsReady,
                SelectionState::CandidateReady,
                SelectionState::AwaitingConfirm,
                SelectionState::PinDropped,
            ],
            "enter map mode",
        )?;
        self.search.reset();
        let mut state = self.lock();
        state.phase = SelectionState::MapMode;
        state.bump_map();
        Ok(())
    }

    /// Record a map drag. The pin reverse-geocodes only after the map has
    /// been still for the settle window, so continuous drags cost one
    /// provider call, not one per frame.
    #[instrument(skip(self))]
    pub fn move_pin(&self, coordinate: Coordinate) -> Result<(), LocationError> {
        self.ensure_phase(
            &[
                SelectionState::MapMode,
                SelectionState::PinDropped,
                SelectionState::ReverseGeocoding,
                SelectionState::CandidateReady,
                SelectionState::AwaitingConfirm,
            ],
            "move the pin",
        )?;

        let mut state = self.lock();
        let generation = state.bump_map();
        state.phase = SelectionState::PinDropped;

        let controller = self.clone();
        let settle = self.settle;
        state.settle_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            controller.resolve_pin(generation, coordinate).await;
        }));
        Ok(())
    }

    /// Place the pin directly, skipping the settle window.
    #[instrument(skip(self))]
    pub fn drop_pin(&self, coordinate: Coordinate) -> Result<(), LocationError> {
        self.ensure_phase(
            &[
                SelectionState::MapMode,
                SelectionState::PinDropped,
                SelectionState::ReverseGeocoding,
                SelectionState::CandidateReady,
                SelectionState::AwaitingConfirm,
            ],
            "drop the pin",
        )?;

        let mut state = self.lock();
        let generation = state.bump_map();
        state.phase = SelectionState::PinDropped;

        let controller = self.clone();
        state.settle_timer = Some(tokio::spawn(async move {
            controller.resolve_pin(generation, coordinate).await;
        }));
        Ok(())
    }

    /// Reverse-geocode a settled pin. A bumped generation on either side
    /// of the provider call means the pin moved again and this result is
    /// discarded.
    async fn resolve_pin(&self, generation: u64, coordinate: Coordinate) {
        {
            let mut state = self.lock();
            if state.map_generation != generation {
                return;
            }
            state.phase = SelectionState::ReverseGeocoding;
        }

        let suggestion = match self.geocoder.reverse_geocode(coordinate).await {
            Ok(Some(mut suggestion)) => {
                suggestion.kind = LocationKind::DroppedPin;
                suggestion.coordinate = Some(coordinate);
                suggestion
            }
            Ok(None) => LocationSuggestion::dropped_pin(coordinate, coordinate.label()),
            Err(e) => {
                warn!(error = %e, "Reverse geocode failed, labelling pin by coordinate");
                LocationSuggestion::dropped_pin(coordinate, coordinate.label())
            }
        };

        {
            let mut state = self.lock();
            if state.map_generation != generation {
                debug!(generation, "Dropping stale pin resolution");
                return;
            }
            state.candidate = Some(Candidate {
                suggestion: suggestion.clone(),
                details: DeliveryDetails::default(),
            });
            state.saved = None;
            state.phase = SelectionState::CandidateReady;
        }

        self.events
            .send_or_log(PickerEvent::CandidateReady(suggestion))
            .await;
    }

    /// Resolve the device position, reverse-geocode it, and make it the
    /// candidate. No fix in time fails with
    /// [`LocationError::PositionTimeout`]; a cached fix older than the
    /// configured maximum age fails with [`LocationError::StalePosition`].
    /// Provider denials surface as-is.
    #[instrument(skip(self))]
    pub async fn use_current_location(&self) -> Result<LocationSuggestion, LocationError> {
        let previous = self.ensure_phase(
            &[
                SelectionState::SearchActive,
                SelectionState::SuggestionsReady,
                SelectionState::MapMode,
                SelectionState::PinDropped,
                SelectionState::ReverseGeocoding,
                SelectionState::CandidateReady,
                SelectionState::AwaitingConfirm,
            ],
            "use the current location",
        )?;

        self.search.reset();
        let generation = {
            let mut state = self.lock();
            let generation = state.bump_map();
            state.phase = SelectionState::ReverseGeocoding;
            generation
        };

        let restore = |phase: SelectionState| {
            let mut state = self.lock();
            if state.map_generation == generation {
                state.phase = phase;
            }
        };

        let fix =
            match tokio::time::timeout(self.position_timeout, self.position.current_position())
                .await
            {
                Ok(Ok(fix)) => fix,
                Ok(Err(e)) => {
                    restore(previous);
                    return Err(e);
                }
                Err(_) => {
                    restore(previous);
                    return Err(LocationError::PositionTimeout);
                }
            };

        let age = fix.age();
        if age > self.position_max_fix_age {
            warn!(age_secs = age.as_secs(), "Rejecting stale position fix");
            restore(previous);
            return Err(LocationError::StalePosition {
                age_secs: age.as_secs(),
                max_age_secs: self.position_max_fix_age.as_secs(),
            });
        }
        let coordinate = fix.coordinate;

        let suggestion = match self.geocoder.reverse_geocode(coordinate).await {
            Ok(Some(mut suggestion)) => {
                suggestion.kind = LocationKind::Current;
                suggestion.coordinate = Some(coordinate);
                suggestion
            }
            Ok(None) => LocationSuggestion::current(coordinate, coordinate.label()),
            Err(e) => {
                warn!(error = %e, "Reverse geocode failed, labelling position by coordinate");
                LocationSuggestion::current(coordinate, coordinate.label())
            }
        };

        {
            let mut state = self.lock();
            if state.map_generation != generation {
                return Err(LocationError::InvalidState {
                    from: state.phase.to_string(),
                    action: "apply the position fix".to_string(),
                });
            }
            state.candidate = Some(Candidate {
                suggestion: suggestion.clone(),
                details: DeliveryDetails::default(),
            });
            state.saved = None;
            state.phase = SelectionState::CandidateReady;
        }

        self.events
            .send_or_log(PickerEvent::CandidateReady(suggestion.clone()))
            .await;
        Ok(suggestion)
    }

    /// Attach delivery details to the candidate.
    pub fn set_details(&self, details: DeliveryDetails) -> Result<(), LocationError> {
        self.ensure_phase(
            &[SelectionState::CandidateReady, SelectionState::AwaitingConfirm],
            "set delivery details",
        )?;
        let mut state = self.lock();
        match state.candidate.as_mut() {
            Some(candidate) => {
                candidate.details = details;
                state.phase = SelectionState::AwaitingConfirm;
                Ok(())
            }
            None => Err(LocationError::InvalidState {
                from: state.phase.to_string(),
                action: "set delivery details".to_string(),
            }),
        }
    }

    /// Confirm the candidate as the delivery location.
    ///
    /// The candidate must pass the zone eligibility check; a rejection
    /// emits [`PickerEvent::EligibilityRejected`] and leaves the candidate
    /// in place for the user to adjust. On success the location is recorded
    /// in the recents list, persisted as the delivery location, and the
    /// picker returns to idle. A confirm arriving while another is still
    /// in flight is ignored and returns `Ok(None)`.
    #[instrument(skip(self))]
    pub async fn confirm(&self) -> Result<Option<DeliveryLocation>, LocationError> {
        if self
            .confirm_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Ignoring duplicate confirm");
            return Ok(None);
        }
        let _guard = ConfirmGuard {
            flag: &self.confirm_in_flight,
        };

        let (candidate, saved) = {
            let state = self.lock();
            match state.phase {
                SelectionState::CandidateReady | SelectionState::AwaitingConfirm => {}
                phase => {
                    return Err(LocationError::InvalidState {
                        from: phase.to_string(),
                        action: "confirm".to_string(),
                    });
                }
            }
            match state.candidate.clone() {
                Some(candidate) => (candidate, state.saved.clone()),
                None => {
                    return Err(LocationError::InvalidState {
                        from: state.phase.to_string(),
                        action: "confirm".to_string(),
                    });
                }
            }
        };

        let coordinate = candidate
            .suggestion
            .coordinate
            .ok_or(LocationError::MissingCoordinate)?;

        let eligibility = self.zones.check(coordinate);
        if !eligibility.available {
            let reason = eligibility.rejection_reason();
            info!(reason = %reason, "Confirm rejected by eligibility check");
            self.lock().phase = SelectionState::CandidateReady;
            self.events
                .send_or_log(PickerEvent::EligibilityRejected {
                    reason: reason.clone(),
                })
                .await;
            return Err(LocationError::Ineligible { reason });
        }

        let location = match saved {
            Some(address) => DeliveryLocation::Saved(address),
            None => DeliveryLocation::Suggestion {
                suggestion: candidate.suggestion,
                details: candidate.details,
            },
        };

        self.cache.record_recent(&location).await?;
        self.store.set(location.clone()).await?;

        {
            let mut state = self.lock();
            state.phase = SelectionState::Idle;
            state.candidate = None;
            state.saved = None;
            state.bump_map();
        }
        self.search.reset();

        info!(title = %location.title(), "Delivery location confirmed");
        self.events
            .send_or_log(PickerEvent::Confirmed(location.clone()))
            .await;
        Ok(Some(location))
    }

    /// Abandon the picker. In-flight searches, pin resolutions, and
    /// position fixes are all invalidated.
    pub fn cancel(&self) {
        {
            let mut state = self.lock();
            state.phase = SelectionState::Cancelled;
            state.candidate = None;
            state.saved = None;
            state.bump_map();
        }
        self.search.reset();
    }
}
