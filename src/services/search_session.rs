use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::errors::LocationError;
use crate::events::{EventSender, PickerEvent, SuggestionSource};
use crate::models::{LocationKind, LocationSuggestion};
use crate::services::geocoding::{validate_postal_code, GeocodingProvider};
use crate::services::location_cache::LocationCache;

struct SessionInner {
    query: String,
    pending: bool,
    /// Bumped on every input and reset. A search result only lands if its
    /// generation still matches, so late responses for old queries are
    /// dropped instead of overwriting newer ones.
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl SessionInner {
    fn bump(&mut self) -> u64 {
        self.generation = self.generation.wrapping_add(1);
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation
    }
}

/// Debounced free-text search over a [`GeocodingProvider`].
///
/// Rapid keystrokes coalesce into one provider request after a quiet
/// period; queries below the minimum length short-circuit to the
/// recents/popular feed.
#[derive(Clone)]
pub struct SearchSession {
    geocoder: Arc<dyn GeocodingProvider>,
    cache: LocationCache,
    events: EventSender,
    inner: Arc<Mutex<SessionInner>>,
    debounce: Duration,
    min_query_len: usize,
    max_suggestions: usize,
}

impl SearchSession {
    pub fn new(
        geocoder: Arc<dyn GeocodingProvider>,
        cache: LocationCache,
        events: EventSender,
        debounce: Duration,
        min_query_len: usize,
        max_suggestions: usize,
    ) -> Self {
        Self {
            geocoder,
            cache,
            events,
            inner: Arc::new(Mutex::new(SessionInner {
                query: String::new(),
                pending: false,
                generation: 0,
                timer: None,
            })),
            debounce,
            min_query_len,
            max_suggestions,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record a keystroke. Restarts the debounce timer; the search fires
    /// only after the input has been quiet for the configured window.
    #[instrument(skip(self))]
    pub fn input(&self, text: &str) {
        let mut inner = self.lock();
        inner.query = text.to_string();
        let generation = inner.bump();

        if text.trim().chars().count() < self.min_query_len {
            inner.pending = false;
            drop(inner);
            let session = self.clone();
            tokio::spawn(async move {
                session.emit_feed().await;
            });
            return;
        }

        inner.pending = true;
        let session = self.clone();
        let debounce = self.debounce;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            session.fire(generation).await;
        });
        inner.timer = Some(timer);
    }

    /// Search a six-digit postal code. Validation is immediate; the lookup
    /// itself runs without a debounce window.
    #[instrument(skip(self))]
    pub fn input_postal(&self, code: &str) -> Result<(), LocationError> {
        validate_postal_code(code)?;

        let mut inner = self.lock();
        inner.query = code.to_string();
        let generation = inner.bump();
        inner.pending = true;
        drop(inner);

        let session = self.clone();
        let code = code.to_string();
        tokio::spawn(async move {
            let mut results = match session.geocoder.search(&code).await {
                Ok(results) => results,
                Err(e) => {
                    warn!(code = %code, error = %e, "Postal search failed");
                    Vec::new()
                }
            };
            for suggestion in &mut results {
                suggestion.kind = LocationKind::Postal;
            }
            session.apply_results(generation, results).await;
        });
        Ok(())
    }

    /// Invalidate any in-flight search and clear the query.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.bump();
        inner.query.clear();
        inner.pending = false;
    }

    pub fn query(&self) -> String {
        self.lock().query.clone()
    }

    pub fn pending(&self) -> bool {
        self.lock().pending
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    async fn fire(&self, generation: u64) {
        let query = {
            let inner = self.lock();
            if inner.generation != generation {
                return;
            }
            inner.query.clone()
        };

        let results = match self.geocoder.search(&query).await {
            Ok(results) => results,
            Err(e) => {
                warn!(query = %query, error = %e, "Search failed, falling back to feed");
                Vec::new()
            }
        };
        self.apply_results(generation, results).await;
    }

    /// Land a result set for `generation`. Returns false and emits nothing
    /// when a newer input has already superseded it.
    pub async fn apply_results(
        &self,
        generation: u64,
        mut items: Vec<LocationSuggestion>,
    ) -> bool {
        {
            let mut inner = self.lock();
            if inner.generation != generation {
                debug!(
                    generation,
                    current = inner.generation,
                    "Dropping stale search results"
                );
                return false;
            }
            inner.pending = false;
        }

        if items.is_empty() {
            self.emit_feed().await;
        } else {
            items.truncate(self.max_suggestions);
            self.events
                .send_or_log(PickerEvent::SuggestionsChanged {
                    source: SuggestionSource::Search,
                    items,
                })
                .await;
        }
        true
    }

    async fn emit_feed(&self) {
        let (source, items) = self.cache.suggestion_feed().await;
        self.events
            .send_or_log(PickerEvent::SuggestionsChanged { source, items })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::channel;
    use crate::services::geocoding::MockGeocodingProvider;
    use crate::storage::MemoryStorage;
    use mockall::predicate::eq;
    use tokio::sync::mpsc;

    fn test_cache(popular: Vec<LocationSuggestion>) -> LocationCache {
        LocationCache::new(Arc::new(MemoryStorage::new()), 5, popular)
    }

    fn session_with(
        mock: MockGeocodingProvider,
        popular: Vec<LocationSuggestion>,
    ) -> (SearchSession, mpsc::Receiver<PickerEvent>) {
        let (events, rx) = channel(16);
        let session = SearchSession::new(
            Arc::new(mock),
            test_cache(popular),
            events,
            Duration::from_millis(300),
            3,
            8,
        );
        (session, rx)
    }

    fn marina_suggestion() -> LocationSuggestion {
        LocationSuggestion::search("osm-1", "Marina Bay Sands")
            .with_coordinate(crate::models::Coordinate::new(1.2834, 103.8607))
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_keystrokes_coalesce_into_one_search() {
        let mut mock = MockGeocodingProvider::new();
        mock.expect_search()
            .with(eq("Mari"))
            .times(1)
            .returning(|_| Ok(vec![marina_suggestion()]));

        let (session, mut rx) = session_with(mock, Vec::new());
        session.input("Mar");
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.input("Mari");

        let event = rx.recv().await.unwrap();
        match event {
            PickerEvent::SuggestionsChanged { source, items } => {
                assert_eq!(source, SuggestionSource::Search);
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].title, "Marina Bay Sands");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(!session.pending());
    }

    #[tokio::test(start_paused = true)]
    async fn short_query_shows_feed_without_searching() {
        let mut mock = MockGeocodingProvider::new();
        mock.expect_search().never();

        let popular = vec![marina_suggestion()];
        let (session, mut rx) = session_with(mock, popular);
        session.input("Ma");

        let event = rx.recv().await.unwrap();
        match event {
            PickerEvent::SuggestionsChanged { source, items } => {
                assert_eq!(source, SuggestionSource::Popular);
                assert_eq!(items.len(), 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reset_cancels_a_pending_search() {
        let mut mock = MockGeocodingProvider::new();
        mock.expect_search().never();

        let (session, mut rx) = session_with(mock, Vec::new());
        session.input("Marina");
        session.reset();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(rx.try_recv().is_err());
        assert!(!session.pending());
        assert!(session.query().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_results_are_dropped_silently() {
        let mock = MockGeocodingProvider::new();
        let (session, mut rx) = session_with(mock, Vec::new());

        let stale = session.generation();
        session.reset();
        let landed = session.apply_results(stale, vec![marina_suggestion()]).await;

        assert!(!landed);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_results_fall_back_to_feed() {
        let mut mock = MockGeocodingProvider::new();
        mock.expect_search()
            .with(eq("Nowhere Lane"))
            .times(1)
            .returning(|_| Ok(Vec::new()));

        let popular = vec![marina_suggestion()];
        let (session, mut rx) = session_with(mock, popular);
        session.input("Nowhere Lane");

        let event = rx.recv().await.unwrap();
        match event {
            PickerEvent::SuggestionsChanged { source, .. } => {
                assert_eq!(source, SuggestionSource::Popular);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_postal_code_fails_fast() {
        let mut mock = MockGeocodingProvider::new();
        mock.expect_search().never();

        let (session, mut rx) = session_with(mock, Vec::new());
        assert!(session.input_postal("1234").is_err());
        assert!(session.input_postal("12345a").is_err());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn postal_results_are_tagged_as_postal() {
        let mut mock = MockGeocodingProvider::new();
        mock.expect_search()
            .with(eq("018956"))
            .times(1)
            .returning(|_| Ok(vec![marina_suggestion()]));

        let (session, mut rx) = session_with(mock, Vec::new());
        session.input_postal("018956").unwrap();

        let event = rx.recv().await.unwrap();
        match event {
            PickerEvent::SuggestionsChanged { source, items } => {
                assert_eq!(source, SuggestionSource::Search);
                assert_eq!(items[0].kind, LocationKind::Postal);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
