//! Frame-number to position lookup

use crate::types::GeoPoint;

/// Default simulated route, traversed cyclically
pub const DEFAULT_ROUTE: [GeoPoint; 8] = [
    GeoPoint::new(22.5726, 88.3639),
    GeoPoint::new(22.5742, 88.3658),
    GeoPoint::new(22.5760, 88.3676),
    GeoPoint::new(22.5782, 88.3690),
    GeoPoint::new(22.5800, 88.3705),
    GeoPoint::new(22.5820, 88.3720),
    GeoPoint::new(22.5838, 88.3735),
    GeoPoint::new(22.5855, 88.3750),
];

/// Deterministic position for a frame
pub trait Geolocator: Send + Sync {
    fn locate(&self, frame_number: u64) -> GeoPoint;
}

impl<F> Geolocator for F
where
    F: Fn(u64) -> GeoPoint + Send + Sync,
{
    fn locate(&self, frame_number: u64) -> GeoPoint {
        self(frame_number)
    }
}

/// Cycles through a fixed list of waypoints, one per frame
#[derive(Debug, Clone)]
pub struct RouteGeolocator {
    route: Vec<GeoPoint>,
}

impl RouteGeolocator {
    /// `None` for an empty route
    pub fn new(route: Vec<GeoPoint>) -> Option<Self> {
        if route.is_empty() {
            None
        } else {
            Some(Self { route })
        }
    }

    pub fn route(&self) -> &[GeoPoint] {
        &self.route
    }
}

impl Default for RouteGeolocator {
    fn default() -> Self {
        Self {
            route: DEFAULT_ROUTE.to_vec(),
        }
    }
}

impl Geolocator for RouteGeolocator {
    fn locate(&self, frame_number: u64) -> GeoPoint {
        let idx = (frame_number % self.route.len() as u64) as usize;
        self.route[idx]
    }
}
