#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use mealdrop_location::storage::StorageError;
use mealdrop_location::{
    Coordinate, EngineConfig, GeocodingProvider, LocationEngine, LocationError,
    LocationSuggestion, MemoryStorage, PickerEvent, PositionFix, PositionProvider,
    StorageBackend,
};

/// Engine configuration used across the integration tests. Matches the
/// production defaults so timing assertions exercise the real windows.
pub fn test_config() -> EngineConfig {
    EngineConfig::default()
}

pub fn marina_bay() -> Coordinate {
    Coordinate::new(1.2834, 103.8607)
}

pub fn changi() -> Coordinate {
    Coordinate::new(1.3644, 103.9915)
}

/// A point well outside every configured delivery zone.
pub fn johor() -> Coordinate {
    Coordinate::new(1.4927, 103.7414)
}

pub fn suggestion(
    id: &str,
    title: &str,
    latitude: f64,
    longitude: f64,
) -> LocationSuggestion {
    LocationSuggestion::search(id, title).with_coordinate(Coordinate::new(latitude, longitude))
}

/// Scripted geocoder. Results are looked up by exact query, details by
/// place id, and reverse hits by proximity. Every call is recorded.
#[derive(Default)]
pub struct FakeGeocoder {
    results: Mutex<HashMap<String, Vec<LocationSuggestion>>>,
    details: Mutex<HashMap<String, LocationSuggestion>>,
    reverse: Mutex<Vec<(Coordinate, LocationSuggestion)>>,
    pub search_calls: Mutex<Vec<String>>,
    pub reverse_calls: Mutex<Vec<Coordinate>>,
    fail_search: AtomicBool,
    fail_reverse: AtomicBool,
}

impl FakeGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(self, query: &str, results: Vec<LocationSuggestion>) -> Self {
        self.results
            .lock()
            .unwrap()
            .insert(query.to_string(), results);
        self
    }

    pub fn with_details(self, place_id: &str, resolved: LocationSuggestion) -> Self {
        self.details
            .lock()
            .unwrap()
            .insert(place_id.to_string(), resolved);
        self
    }

    pub fn with_reverse(self, coordinate: Coordinate, place: LocationSuggestion) -> Self {
        self.reverse.lock().unwrap().push((coordinate, place));
        self
    }

    pub fn fail_search(&self, fail: bool) {
        self.fail_search.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reverse(&self, fail: bool) {
        self.fail_reverse.store(fail, Ordering::SeqCst);
    }

    pub fn search_call_count(&self) -> usize {
        self.search_calls.lock().unwrap().len()
    }

    pub fn reverse_call_count(&self) -> usize {
        self.reverse_calls.lock().unwrap().len()
    }

    fn close(a: Coordinate, b: Coordinate) -> bool {
        (a.latitude - b.latitude).abs() < 1e-6 && (a.longitude - b.longitude).abs() < 1e-6
    }
}

#[async_trait]
impl GeocodingProvider for FakeGeocoder {
    async fn search(&self, query: &str) -> Result<Vec<LocationSuggestion>, LocationError> {
        self.search_calls.lock().unwrap().push(query.to_string());
        if self.fail_search.load(Ordering::SeqCst) {
            return Err(LocationError::provider("search unavailable"));
        }
        Ok(self
            .results
            .lock()
            .unwrap()
            .get(query)
            .cloned()
            .unwrap_or_default())
    }

    async fn resolve_details(
        &self,
        place_id: &str,
    ) -> Result<Option<LocationSuggestion>, LocationError> {
        Ok(self.details.lock().unwrap().get(place_id).cloned())
    }

    async fn reverse_geocode(
        &self,
        coordinate: Coordinate,
    ) -> Result<Option<LocationSuggestion>, LocationError> {
        self.reverse_calls.lock().unwrap().push(coordinate);
        if self.fail_reverse.load(Ordering::SeqCst) {
            return Err(LocationError::provider("reverse unavailable"));
        }
        Ok(self
            .reverse
            .lock()
            .unwrap()
            .iter()
            .find(|(known, _)| Self::close(*known, coordinate))
            .map(|(_, place)| place.clone()))
    }
}

/// Scripted position provider.
pub enum FakePosition {
    /// Immediately serve a fresh fix.
    Fix(Coordinate),
    /// Serve a cached fix measured this long ago.
    Cached(Coordinate, Duration),
    /// Deny the permission request.
    Denied,
    /// Never produce a fix, forcing the caller's timeout.
    Never,
}

#[async_trait]
impl PositionProvider for FakePosition {
    async fn current_position(&self) -> Result<PositionFix, LocationError> {
        match self {
            FakePosition::Fix(coordinate) => Ok(PositionFix::new(*coordinate)),
            FakePosition::Cached(coordinate, age) => Ok(PositionFix::measured(
                *coordinate,
                chrono::Utc::now() - chrono::Duration::from_std(*age).unwrap(),
            )),
            FakePosition::Denied => Err(LocationError::PermissionDenied),
            FakePosition::Never => std::future::pending().await,
        }
    }
}

/// Memory storage with a gate on writes. Closing the gate parks every
/// `set` until it reopens, which lets a test hold a confirm mid-persist.
#[derive(Clone)]
pub struct GatedStorage {
    inner: MemoryStorage,
    gate: Arc<watch::Sender<bool>>,
}

impl GatedStorage {
    pub fn new() -> Self {
        Self {
            inner: MemoryStorage::new(),
            gate: Arc::new(watch::Sender::new(true)),
        }
    }

    pub fn close_gate(&self) {
        self.gate.send_replace(false);
    }

    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }
}

#[async_trait]
impl StorageBackend for GatedStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let mut open = self.gate.subscribe();
        open.wait_for(|open| *open)
            .await
            .map_err(|e| StorageError::OperationFailed(format!("Gate closed: {}", e)))?;
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.inner.remove(key).await
    }
}

/// A fully wired engine over fakes, plus the event stream.
pub struct TestEngine {
    pub engine: LocationEngine,
    pub events: mpsc::Receiver<PickerEvent>,
    pub geocoder: Arc<FakeGeocoder>,
    pub storage: Arc<dyn StorageBackend>,
}

pub async fn spawn_engine(
    config: EngineConfig,
    geocoder: FakeGeocoder,
    position: FakePosition,
    storage: Arc<dyn StorageBackend>,
) -> TestEngine {
    let geocoder = Arc::new(geocoder);
    let (engine, events) = LocationEngine::build(
        config,
        storage.clone(),
        geocoder.clone(),
        Arc::new(position),
    )
    .await
    .expect("engine should build");
    TestEngine {
        engine,
        events,
        geocoder,
        storage,
    }
}

impl TestEngine {
    /// Receive the next picker event, failing the test after a bounded
    /// wait instead of hanging forever.
    pub async fn next_event(&mut self) -> PickerEvent {
        tokio::time::timeout(Duration::from_secs(30), self.events.recv())
            .await
            .expect("timed out waiting for a picker event")
            .expect("event channel closed")
    }

    /// Assert that no event is currently queued.
    pub fn assert_no_event(&mut self) {
        assert!(
            self.events.try_recv().is_err(),
            "expected no queued picker event"
        );
    }
}
