pub mod delivery_location;
pub mod geocoding;
pub mod location_cache;
pub mod nominatim;
pub mod search_session;
pub mod selection;

pub use delivery_location::{DeliveryLocationStore, LocationPreferences};
pub use geocoding::{
    validate_postal_code, FixedPositionProvider, GeocodingProvider, PositionFix,
    PositionProvider,
};
pub use location_cache::LocationCache;
pub use nominatim::NominatimGeocoder;
pub use search_session::SearchSession;
pub use selection::{SelectionController, SelectionState};
