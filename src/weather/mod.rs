pub mod generator;
pub mod schema;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use generator::{
    classify, cycle_fraction, generate, generate_now, round1, DiurnalComponents, NoiseAmplitudes,
    NoiseField, NoiseSource, UniformNoise, ZeroNoise,
};

/// Timestamp layout shared by every payload schema.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Simulated minutes in one diurnal cycle.
pub const MINUTES_PER_DAY: u64 = 1440;

/// Baseline climate around which the diurnal cycle oscillates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClimateBaseline {
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_humidity")]
    pub humidity: f64,
    #[serde(default = "default_wind_speed")]
    pub wind_speed: f64,
    #[serde(default = "default_pressure")]
    pub pressure: f64,
}

fn default_temperature() -> f64 {
    75.0
}
fn default_humidity() -> f64 {
    60.0
}
fn default_wind_speed() -> f64 {
    10.0
}
fn default_pressure() -> f64 {
    1012.0
}

impl Default for ClimateBaseline {
    fn default() -> Self {
        ClimateBaseline {
            temperature: default_temperature(),
            humidity: default_humidity(),
            wind_speed: default_wind_speed(),
            pressure: default_pressure(),
        }
    }
}

/// Categorical condition derived from a reading's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeatherStatus {
    Clear,
    Rain,
    Windy,
    Hot,
}

impl WeatherStatus {
    /// Rain and wind are hazardous; heat is reported but not alerted.
    pub fn is_high_alert(&self) -> bool {
        matches!(self, WeatherStatus::Rain | WeatherStatus::Windy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WeatherStatus::Clear => "Clear",
            WeatherStatus::Rain => "Rain",
            WeatherStatus::Windy => "Windy",
            WeatherStatus::Hot => "Hot",
        }
    }
}

impl std::fmt::Display for WeatherStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One generated observation. Built once per tick and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherReading {
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub humidity: f64,
    pub wind_speed: f64,
    pub pressure: f64,
    pub status: WeatherStatus,
    pub high_alert: bool,
    pub location: String,
}

impl WeatherReading {
    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rain_and_windy_raise_alerts() {
        assert!(WeatherStatus::Rain.is_high_alert());
        assert!(WeatherStatus::Windy.is_high_alert());
        assert!(!WeatherStatus::Hot.is_high_alert());
        assert!(!WeatherStatus::Clear.is_high_alert());
    }

    #[test]
    fn baseline_defaults_match_sky_plaza_climate() {
        let b = ClimateBaseline::default();
        assert_eq!(b.temperature, 75.0);
        assert_eq!(b.humidity, 60.0);
        assert_eq!(b.wind_speed, 10.0);
        assert_eq!(b.pressure, 1012.0);
    }

    #[test]
    fn status_display_uses_variant_name() {
        assert_eq!(WeatherStatus::Windy.to_string(), "Windy");
        assert_eq!(
            serde_json::to_string(&WeatherStatus::Hot).unwrap(),
            "\"Hot\""
        );
    }
}
