//! JSON encodings of a [`WeatherReading`].
//!
//! `Unified` is the default wire format. `Legacy` reproduces the field names the
//! first dashboard consumed (`Time`, `Temp`, ..., `highalert`) for deployments
//! that still read them. Decoding accepts either.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::weather::generator::classify;
use crate::weather::{WeatherReading, WeatherStatus, TIMESTAMP_FORMAT};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadSchema {
    #[default]
    Unified,
    Legacy,
}

impl std::str::FromStr for PayloadSchema {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unified" => Ok(PayloadSchema::Unified),
            "legacy" => Ok(PayloadSchema::Legacy),
            other => Err(format!(
                "unknown payload schema '{}', expected \"unified\" or \"legacy\"",
                other
            )),
        }
    }
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Malformed reading JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Bad timestamp '{value}': {source}")]
    Timestamp {
        value: String,
        source: chrono::ParseError,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnifiedPayload {
    timestamp: String,
    location: String,
    temperature: f64,
    humidity: f64,
    wind_speed: f64,
    pressure: f64,
    status: WeatherStatus,
    high_alert: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uploaded_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LegacyPayload {
    #[serde(rename = "Time")]
    time: String,
    #[serde(rename = "Temp")]
    temp: f64,
    #[serde(rename = "Humidity")]
    humidity: f64,
    #[serde(rename = "Wind")]
    wind: f64,
    #[serde(rename = "Pressure")]
    pressure: f64,
    #[serde(rename = "Status")]
    status: WeatherStatus,
    #[serde(rename = "Location")]
    location: String,
    #[serde(rename = "highalert")]
    high_alert: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AnyPayload {
    Unified(UnifiedPayload),
    Legacy(LegacyPayload),
}

/// Serialize a reading. `uploaded_at` is only carried by the unified schema.
pub fn encode(
    reading: &WeatherReading,
    schema: PayloadSchema,
    uploaded_at: DateTime<Utc>,
) -> Result<Vec<u8>, SchemaError> {
    let bytes = match schema {
        PayloadSchema::Unified => serde_json::to_vec(&UnifiedPayload {
            timestamp: reading.formatted_timestamp(),
            location: reading.location.clone(),
            temperature: reading.temperature,
            humidity: reading.humidity,
            wind_speed: reading.wind_speed,
            pressure: reading.pressure,
            status: reading.status,
            high_alert: reading.high_alert,
            uploaded_at: Some(uploaded_at.format(TIMESTAMP_FORMAT).to_string()),
        })?,
        PayloadSchema::Legacy => serde_json::to_vec(&LegacyPayload {
            time: reading.formatted_timestamp(),
            temp: reading.temperature,
            humidity: reading.humidity,
            wind: reading.wind_speed,
            pressure: reading.pressure,
            status: reading.status,
            location: reading.location.clone(),
            high_alert: reading.high_alert,
        })?,
    };
    Ok(bytes)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, SchemaError> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|source| SchemaError::Timestamp {
            value: value.to_string(),
            source,
        })
}

/// Parse a reading in either schema.
///
/// Status and alert are re-derived from the decoded values so a decoded reading
/// obeys the same invariants as a generated one.
pub fn decode_any(bytes: &[u8]) -> Result<WeatherReading, SchemaError> {
    let (time, location, temperature, humidity, wind_speed, pressure) =
        match serde_json::from_slice::<AnyPayload>(bytes)? {
            AnyPayload::Unified(p) => (
                p.timestamp,
                p.location,
                p.temperature,
                p.humidity,
                p.wind_speed,
                p.pressure,
            ),
            AnyPayload::Legacy(p) => (p.time, p.location, p.temp, p.humidity, p.wind, p.pressure),
        };

    let status = classify(temperature, humidity, wind_speed);
    Ok(WeatherReading {
        timestamp: parse_timestamp(&time)?,
        temperature,
        humidity,
        wind_speed,
        pressure,
        status,
        high_alert: status.is_high_alert(),
        location,
    })
}
