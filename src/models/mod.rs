pub mod address;
pub mod location;
pub mod zone;

pub use address::{SavedAddress, TimeWindow};
pub use location::{
    Coordinate, DeliveryDetails, DeliveryLocation, LocationKind, LocationSource,
    LocationSuggestion,
};
pub use zone::DeliveryZone;
