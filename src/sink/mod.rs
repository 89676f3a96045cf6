pub mod dashboard;
pub mod object_store;

use std::io;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::weather::WeatherReading;

pub use dashboard::DashboardSink;
pub use object_store::{
    BlobMetadata, HttpObjectStore, LocalObjectStore, ObjectStore, ObjectStoreSink,
};

/// Alias the object store keeps pointing at the newest reading.
pub const LATEST_KEY: &str = "weather-log-latest.json";

/// Errors raised while handing a reading to a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Endpoint responded {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid blob key '{0}'")]
    InvalidKey(String),
}

/// A reading ready to leave the process: the value, its encoded payload, and
/// the blob key it is stored under.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub reading: WeatherReading,
    pub key: String,
    pub payload: Vec<u8>,
}

/// Destination for generated readings. One delivery attempt per tick; the
/// driver logs failures and never retries.
pub trait ReadingSink: Send + Sync {
    fn name(&self) -> &str;

    fn deliver<'a>(&'a self, delivery: &'a Delivery) -> BoxFuture<'a, Result<(), SinkError>>;
}

/// Build a blob key from upload time: `weather-log-{unix_seconds}.json`.
pub fn blob_key(uploaded_at: DateTime<Utc>) -> String {
    format!("weather-log-{}.json", uploaded_at.timestamp())
}

/// Parse the unix timestamp out of a blob key.
/// Expected format: `weather-log-{N}.json`
pub fn parse_blob_key(key: &str) -> Option<u64> {
    key.strip_suffix(".json")?
        .strip_prefix("weather-log-")?
        .parse::<u64>()
        .ok()
}

/// Keep error bodies short enough for a single log line.
pub(crate) fn truncate_body(body: String) -> String {
    const MAX: usize = 200;
    if body.len() <= MAX {
        return body;
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
