//! Flat-earth coordinate math.
//!
//! Good enough over the few hundred meters a mission covers.

use crate::collab::{Coordinates, Geospatial};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Equirectangular projection around the origin.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatEarth;

impl FlatEarth {
    /// Approximate ground distance in meters.
    pub fn distance_m(a: Coordinates, b: Coordinates) -> f64 {
        let mean_lat = ((a.latitude + b.latitude) / 2.0).to_radians();
        let north = (b.latitude - a.latitude).to_radians() * EARTH_RADIUS_M;
        let east = (b.longitude - a.longitude).to_radians() * EARTH_RADIUS_M * mean_lat.cos();
        north.hypot(east)
    }
}

impl Geospatial for FlatEarth {
    fn offset(&self, origin: Coordinates, meters_north: f64, meters_east: f64) -> Coordinates {
        let lat = origin.latitude + (meters_north / EARTH_RADIUS_M).to_degrees();
        let lon = origin.longitude
            + (meters_east / (EARTH_RADIUS_M * origin.latitude.to_radians().cos())).to_degrees();
        Coordinates::new(lat, lon)
    }
}
