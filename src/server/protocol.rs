use serde::Serialize;

/// Pushed to WebSocket viewers for every ingested reading.
#[derive(Debug, Clone, Serialize)]
pub struct ReadingMessage {
    pub message_type: &'static str,
    pub reading: serde_json::Value,
}

impl ReadingMessage {
    pub fn new(reading: serde_json::Value) -> Self {
        ReadingMessage {
            message_type: "Reading",
            reading,
        }
    }
}

/// Health endpoint response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub readings_received: u64,
    pub last_reading_at: Option<String>,
    pub last_status: Option<String>,
    pub viewers: usize,
    pub uptime_secs: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AckBody {
    pub status: &'static str,
}
