use serde::{Deserialize, Serialize};

pub const KELVIN_OFFSET: f64 = 273.15;

/// A temperature reading in kelvin.
///
/// Providers report in whatever unit their API uses; adapters normalize into
/// this type before anything else sees the value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Temperature(f64);

impl Temperature {
    pub fn from_kelvin(kelvin: f64) -> Self {
        Self(kelvin)
    }

    pub fn from_celsius(celsius: f64) -> Self {
        Self(celsius + KELVIN_OFFSET)
    }

    pub fn kelvin(&self) -> f64 {
        self.0
    }

    pub fn celsius(&self) -> f64 {
        self.0 - KELVIN_OFFSET
    }
}

impl std::fmt::Display for Temperature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}K", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn celsius_kelvin_conversion() {
        let t = Temperature::from_celsius(26.85);
        assert!((t.kelvin() - 300.0).abs() < 1e-9);
        assert!((t.celsius() - 26.85).abs() < 1e-9);
    }

    #[test]
    fn display_is_two_decimal_kelvin() {
        let t = Temperature::from_kelvin(300.0);
        assert_eq!(t.to_string(), "300.00K");
    }
}
