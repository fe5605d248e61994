use serde::Serialize;

/// Mean Earth radius used for great-circle distances.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Half-width of the area requested around a target point, in degrees.
pub const AREA_MARGIN_DEG: f64 = 0.5;

/// A WGS84 latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Whether the pair lies inside [-90, 90] x [-180, 180].
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Rectangular area in the order the provider expects: north, west, south, east.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub north: f64,
    pub west: f64,
    pub south: f64,
    pub east: f64,
}

impl BoundingBox {
    pub fn around(center: Coordinate, margin_deg: f64) -> Self {
        Self {
            north: center.lat + margin_deg,
            west: center.lon - margin_deg,
            south: center.lat - margin_deg,
            east: center.lon + margin_deg,
        }
    }

    pub fn to_area(self) -> [f64; 4] {
        [self.north, self.west, self.south, self.east]
    }
}

/// Haversine distance between two points, in kilometres.
pub fn haversine_km(a: Coordinate, b: Coordinate) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lon.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lon.to_radians());

    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // Clamp guards against h drifting just above 1.0 for antipodal points.
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Wraps a longitude into [-180, 180]; +180 itself is kept.
pub fn normalize_lon(lon: f64) -> f64 {
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 && lon > 0.0 { 180.0 } else { wrapped }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMA: Coordinate = Coordinate { lat: -12.0464, lon: -77.0428 };
    const HUANCAYO: Coordinate = Coordinate { lat: -12.0667, lon: -75.2 };

    #[test]
    fn distance_to_self_is_zero() {
        for p in [
            LIMA,
            HUANCAYO,
            Coordinate::new(90.0, 180.0),
            Coordinate::new(-90.0, -180.0),
            Coordinate::new(0.0, 0.0),
        ] {
            assert_eq!(haversine_km(p, p), 0.0);
        }
    }

    #[test]
    fn distance_is_symmetric() {
        let a = Coordinate::new(51.5, -0.12);
        let b = Coordinate::new(-33.86, 151.2);
        assert_eq!(haversine_km(a, b), haversine_km(b, a));
        assert_eq!(haversine_km(LIMA, HUANCAYO), haversine_km(HUANCAYO, LIMA));
    }

    #[test]
    fn lima_to_huancayo() {
        // Great-circle distance on the 6371 km sphere; road distance is longer.
        let d = haversine_km(LIMA, HUANCAYO);
        assert!((d - 200.4).abs() <= 1.0, "got {d}");
    }

    #[test]
    fn antipodes_are_half_circumference() {
        let d = haversine_km(Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 180.0));
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_KM).abs() < 1e-6);
    }

    #[test]
    fn bounding_box_uses_fixed_margin() {
        let bbox = BoundingBox::around(LIMA, AREA_MARGIN_DEG);
        assert_eq!(
            bbox.to_area(),
            [-12.0464 + 0.5, -77.0428 - 0.5, -12.0464 - 0.5, -77.0428 + 0.5]
        );
    }

    #[test]
    fn coordinate_range_check() {
        assert!(LIMA.is_valid());
        assert!(Coordinate::new(90.0, -180.0).is_valid());
        assert!(!Coordinate::new(90.1, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, 181.0).is_valid());
    }

    #[test]
    fn longitudes_wrap_into_signed_range() {
        assert_eq!(normalize_lon(285.0), -75.0);
        assert_eq!(normalize_lon(-75.0), -75.0);
        assert_eq!(normalize_lon(0.0), 0.0);
        assert_eq!(normalize_lon(359.5), -0.5);
        assert_eq!(normalize_lon(180.0), 180.0);
    }
}
