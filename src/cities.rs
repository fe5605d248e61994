//! Predefined Peruvian cities.

use serde::Serialize;

use crate::geo::Coordinate;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct City {
    /// Lowercase lookup key.
    #[serde(skip)]
    pub key: &'static str,
    pub name: &'static str,
    pub lat: f64,
    pub lon: f64,
    pub region: &'static str,
}

impl City {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lon)
    }
}

const fn city(key: &'static str, name: &'static str, lat: f64, lon: f64, region: &'static str) -> City {
    City {
        key,
        name,
        lat,
        lon,
        region,
    }
}

pub static CITIES: [City; 8] = [
    city("huancayo", "Huancayo", -12.0667, -75.2, "Junín"),
    city("lima", "Lima", -12.0464, -77.0428, "Lima"),
    city("arequipa", "Arequipa", -16.4090, -71.5375, "Arequipa"),
    city("cusco", "Cusco", -13.5319, -71.9675, "Cusco"),
    city("trujillo", "Trujillo", -8.1116, -79.0287, "La Libertad"),
    city("chiclayo", "Chiclayo", -6.7714, -79.8371, "Lambayeque"),
    city("piura", "Piura", -5.1945, -80.6328, "Piura"),
    city("iquitos", "Iquitos", -3.7437, -73.2516, "Loreto"),
];

/// Case-insensitive lookup; surrounding whitespace is ignored.
pub fn lookup(name: &str) -> Option<&'static City> {
    let key = name.trim().to_lowercase();
    CITIES.iter().find(|c| c.key == key)
}

pub fn keys() -> impl Iterator<Item = &'static str> {
    CITIES.iter().map(|c| c.key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case_and_whitespace() {
        let lima = lookup("  LiMa ").unwrap();
        assert_eq!(lima.name, "Lima");
        assert_eq!(lima.coordinate(), Coordinate::new(-12.0464, -77.0428));
        assert!(lookup("Tokyo").is_none());
        assert!(lookup("").is_none());
    }

    #[test]
    fn keys_are_unique_and_lowercase() {
        let mut all: Vec<&str> = keys().collect();
        assert_eq!(all.len(), 8);
        assert!(all.iter().all(|k| *k == k.to_lowercase()));
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 8);
    }

    #[test]
    fn serializes_without_key() {
        let json = serde_json::to_value(lookup("cusco").unwrap()).unwrap();
        assert_eq!(json["name"], "Cusco");
        assert_eq!(json["region"], "Cusco");
        assert!(json.get("key").is_none());
    }
}
