//! CO2 concentration tiers shown on the map.

use serde::Serialize;

/// Upper bound (inclusive) of the good tier, in ppm.
pub const GOOD_MAX_PPM: f64 = 400.0;
/// Upper bound (inclusive) of the acceptable tier, in ppm.
pub const ACCEPTABLE_MAX_PPM: f64 = 450.0;

/// Radius of the map circle for the good tier, in metres.
pub const BASE_RADIUS_M: u32 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusTier {
    Good,
    Acceptable,
    Dangerous,
}

impl StatusTier {
    pub fn from_ppm(ppm: f64) -> Self {
        if ppm <= GOOD_MAX_PPM {
            StatusTier::Good
        } else if ppm <= ACCEPTABLE_MAX_PPM {
            StatusTier::Acceptable
        } else {
            StatusTier::Dangerous
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            StatusTier::Good => "#28a745",
            StatusTier::Acceptable => "#fd7e14",
            StatusTier::Dangerous => "#dc3545",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StatusTier::Good => "Bueno",
            StatusTier::Acceptable => "Aceptable",
            StatusTier::Dangerous => "Peligroso",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            StatusTier::Good => "Concentración normal de CO2",
            StatusTier::Acceptable => "Concentración moderada de CO2",
            StatusTier::Dangerous => "Concentración alta de CO2",
        }
    }

    pub fn buffer_radius(self) -> u32 {
        match self {
            StatusTier::Good => BASE_RADIUS_M,
            StatusTier::Acceptable => BASE_RADIUS_M + 2000,
            StatusTier::Dangerous => BASE_RADIUS_M + 5000,
        }
    }
}

/// Display attributes of a tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Co2Status {
    pub tier: StatusTier,
    pub color: &'static str,
    pub label: &'static str,
    pub description: &'static str,
}

pub fn classify(ppm: f64) -> Co2Status {
    let tier = StatusTier::from_ppm(ppm);
    Co2Status {
        tier,
        color: tier.color(),
        label: tier.label(),
        description: tier.description(),
    }
}

/// Map circle radius in metres for a concentration.
pub fn buffer_radius(ppm: f64) -> u32 {
    StatusTier::from_ppm(ppm).buffer_radius()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries_are_inclusive_upward() {
        assert_eq!(classify(400.0).tier, StatusTier::Good);
        assert_eq!(classify(400.01).tier, StatusTier::Acceptable);
        assert_eq!(classify(450.0).tier, StatusTier::Acceptable);
        assert_eq!(classify(450.01).tier, StatusTier::Dangerous);
        assert_eq!(classify(0.0).tier, StatusTier::Good);
    }

    #[test]
    fn radius_grows_with_tier() {
        assert_eq!(buffer_radius(380.0), 5000);
        assert_eq!(buffer_radius(420.0), 7000);
        assert_eq!(buffer_radius(500.0), 10000);
    }

    #[test]
    fn status_carries_display_fields() {
        let status = classify(402.33);
        assert_eq!(status.color, "#fd7e14");
        assert_eq!(status.label, "Aceptable");
        assert_eq!(
            serde_json::to_value(&status).unwrap()["tier"],
            serde_json::json!("acceptable")
        );
    }
}
