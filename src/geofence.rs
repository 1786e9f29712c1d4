use tracing::debug;

use crate::models::{Coordinate, DeliveryZone};

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two coordinates, in kilometres.
pub fn distance_km(a: Coordinate, b: Coordinate) -> f64 {
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}

/// Outcome of a delivery-eligibility check.
#[derive(Debug, Clone, PartialEq)]
pub struct Eligibility {
    pub available: bool,
    /// The matched zone when available.
    pub zone: Option<DeliveryZone>,
    /// Distance to the matched zone's center, or to the nearest zone's
    /// center when no zone matched. `None` only when no zones exist.
    pub distance_km: Option<f64>,
}

impl Eligibility {
    /// Human-readable reason for an unavailable result.
    pub fn rejection_reason(&self) -> String {
        match (&self.zone, self.distance_km) {
            (Some(zone), Some(distance)) => format!(
                "Outside delivery area. Nearest zone {} is {:.1} km away",
                zone.name, distance
            ),
            _ => "Outside delivery area".to_string(),
        }
    }
}

/// An ordered set of delivery zones. Order is significant: the first zone
/// containing a coordinate wins, so overlapping zones resolve
/// deterministically.
#[derive(Debug, Clone)]
pub struct ZoneSet {
    zones: Vec<DeliveryZone>,
}

impl ZoneSet {
    pub fn new(zones: Vec<DeliveryZone>) -> Self {
        Self { zones }
    }

    pub fn zones(&self) -> &[DeliveryZone] {
        &self.zones
    }

    /// Check a coordinate against the zones in declared order. A point on
    /// a zone boundary counts as inside.
    pub fn check(&self, coordinate: Coordinate) -> Eligibility {
        let mut nearest: Option<(&DeliveryZone, f64)> = None;

        for zone in &self.zones {
            let distance = distance_km(coordinate, zone.center);
            if distance <= zone.radius_km {
                debug!(zone = %zone.name, distance_km = distance, "Coordinate inside zone");
                return Eligibility {
                    available: true,
                    zone: Some(zone.clone()),
                    distance_km: Some(distance),
                };
            }
            match nearest {
                Some((_, best)) if best <= distance => {}
                _ => nearest = Some((zone, distance)),
            }
        }

        let (zone, distance_km) = match nearest {
            Some((zone, distance)) => (Some(zone.clone()), Some(distance)),
            None => (None, None),
        };
        Eligibility {
            available: false,
            zone,
            distance_km,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marina_bay() -> Coordinate {
        Coordinate::new(1.2834, 103.8607)
    }

    fn orchard() -> Coordinate {
        Coordinate::new(1.3048, 103.8318)
    }

    fn zones() -> ZoneSet {
        ZoneSet::new(vec![
            DeliveryZone::new("Marina Bay", marina_bay(), 3.0),
            DeliveryZone::new("Orchard", orchard(), 2.5),
        ])
    }

    #[test]
    fn distance_between_known_points() {
        // Marina Bay to Orchard is just under 4 km.
        let d = distance_km(marina_bay(), orchard());
        assert!((d - 4.0).abs() < 0.05, "got {}", d);
    }

    #[test]
    fn distance_to_self_is_zero() {
        assert!(distance_km(marina_bay(), marina_bay()) < f64::EPSILON);
    }

    #[test]
    fn point_inside_first_zone_matches_it() {
        let result = zones().check(Coordinate::new(1.2850, 103.8590));
        assert!(result.available);
        assert_eq!(result.zone.unwrap().name, "Marina Bay");
    }

    #[test]
    fn overlapping_zones_resolve_to_first_declared() {
        // Between the two centers, inside both circles.
        let midpoint = Coordinate::new(1.2950, 103.8460);
        let result = zones().check(midpoint);
        assert!(result.available);
        assert_eq!(result.zone.unwrap().name, "Marina Bay");
    }

    #[test]
    fn boundary_point_counts_as_inside() {
        let center = Coordinate::new(1.0, 103.0);
        let point = Coordinate::new(1.02, 103.0);
        let radius = distance_km(center, point);
        let set = ZoneSet::new(vec![DeliveryZone::new("Edge", center, radius)]);
        assert!(set.check(point).available);
    }

    #[test]
    fn point_outside_all_zones_reports_nearest() {
        // Changi area, well east of both zones.
        let result = zones().check(Coordinate::new(1.3644, 103.9915));
        assert!(!result.available);
        let distance = result.distance_km.unwrap();
        assert!(distance > 3.0);
        let reason = result.rejection_reason();
        assert!(reason.contains("Outside delivery area"), "got {}", reason);
        assert!(reason.contains("km away"), "got {}", reason);
    }

    #[test]
    fn empty_zone_set_rejects_without_distance() {
        let result = ZoneSet::new(Vec::new()).check(marina_bay());
        assert!(!result.available);
        assert!(result.zone.is_none());
        assert!(result.distance_km.is_none());
        assert_eq!(result.rejection_reason(), "Outside delivery area");
    }
}
