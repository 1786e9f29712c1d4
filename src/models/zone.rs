use serde::{Deserialize, Serialize};

use super::location::Coordinate;

/// A circular delivery zone. Zones are evaluated in their declared order
/// and the first containing zone wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryZone {
    pub name: String,
    pub center: Coordinate,
    pub radius_km: f64,
    #[serde(default)]
    pub special_pricing: bool,
}

impl DeliveryZone {
    pub fn new(name: impl Into<String>, center: Coordinate, radius_km: f64) -> Self {
        Self {
            name: name.into(),
            center,
            radius_km,
            special_pricing: false,
        }
    }

    pub fn with_special_pricing(mut self) -> Self {
        self.special_pricing = true;
        self
    }
}
