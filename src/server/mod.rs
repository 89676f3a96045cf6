pub mod protocol;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use crate::sink::{ObjectStore, SinkError};
use crate::weather::schema::{self, decode_any, PayloadSchema, SchemaError};
use crate::weather::{WeatherReading, TIMESTAMP_FORMAT};
use protocol::{AckBody, ErrorBody, HealthStatus, ReadingMessage};

/// Shared server state accessible from all request handlers.
pub struct ServerState {
    /// Newest ingested reading, re-encoded in the server's schema.
    pub latest_json: RwLock<Option<String>>,
    /// Broadcast channel of `ReadingMessage` JSON for WebSocket viewers.
    pub reading_sender: broadcast::Sender<String>,
    /// Health data updated on each ingest.
    pub health: RwLock<HealthData>,
    /// Where to look for the newest reading before anything has been posted.
    store: Option<Box<dyn ObjectStore>>,
    schema: PayloadSchema,
}

/// Data needed for the health endpoint.
pub struct HealthData {
    pub started_at: DateTime<Utc>,
    pub readings_received: u64,
    pub last_reading_at: Option<DateTime<Utc>>,
    pub last_status: Option<String>,
}

impl ServerState {
    pub fn new(schema: PayloadSchema, store: Option<Box<dyn ObjectStore>>) -> Self {
        let (tx, _) = broadcast::channel(64);
        ServerState {
            latest_json: RwLock::new(None),
            reading_sender: tx,
            health: RwLock::new(HealthData {
                started_at: Utc::now(),
                readings_received: 0,
                last_reading_at: None,
                last_status: None,
            }),
            store,
            schema,
        }
    }

    /// Record a newly ingested reading and fan it out to viewers.
    ///
    /// The reading is re-encoded rather than kept as received, so status and
    /// alert always match the values they were derived from.
    pub async fn on_reading(&self, reading: &WeatherReading) -> Result<(), SchemaError> {
        let payload = schema::encode(reading, self.schema, Utc::now())?;
        let json = String::from_utf8_lossy(&payload).into_owned();
        let message = reading_message(&json);

        *self.latest_json.write().await = Some(json);

        // No receivers is fine
        let _ = self.reading_sender.send(message);

        let mut health = self.health.write().await;
        health.readings_received += 1;
        health.last_reading_at = Some(reading.timestamp);
        health.last_status = Some(reading.status.to_string());
        Ok(())
    }

    /// Newest reading JSON: the last one posted, else the newest stored blob.
    pub async fn latest_reading_json(&self) -> Result<Option<String>, SinkError> {
        if let Some(json) = self.latest_json.read().await.clone() {
            return Ok(Some(json));
        }

        let Some(store) = self.store.as_ref() else {
            return Ok(None);
        };
        Ok(store.latest().await?.map(|(key, data)| {
            debug!(%key, store = %store.describe(), "Serving latest reading from store");
            String::from_utf8_lossy(&data).into_owned()
        }))
    }

    pub async fn health_status(&self) -> HealthStatus {
        let health = self.health.read().await;
        HealthStatus {
            status: "ok",
            readings_received: health.readings_received,
            last_reading_at: health
                .last_reading_at
                .map(|t| t.format(TIMESTAMP_FORMAT).to_string()),
            last_status: health.last_status.clone(),
            viewers: self.reading_sender.receiver_count(),
            uptime_secs: (Utc::now() - health.started_at).num_seconds(),
        }
    }
}

/// Wrap reading JSON in the message pushed to viewers.
fn reading_message(json: &str) -> String {
    let value = serde_json::from_str(json).unwrap_or(serde_json::Value::Null);
    serde_json::to_string(&ReadingMessage::new(value)).unwrap_or_else(|_| "{}".to_string())
}

/// Routes of the dashboard API.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route(
            "/api/weather",
            get(get_weather).post(post_weather).fallback(not_found),
        )
        .route("/health", get(health))
        .route("/ws", get(websocket))
        .fallback(not_found)
        .with_state(state)
}

/// Start the dashboard API (HTTP + WebSocket) on the given address.
pub async fn start_server(
    state: Arc<ServerState>,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Dashboard API listening on http://{}", addr);
    serve(listener, state).await
}

/// Serve the API forever on an already-bound listener.
pub async fn serve(
    listener: TcpListener,
    state: Arc<ServerState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app).await?;
    Ok(())
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

async fn index() -> &'static str {
    "Weather dashboard API is running"
}

async fn get_weather(State(state): State<Arc<ServerState>>) -> Response {
    match state.latest_reading_json().await {
        Ok(Some(json)) => ([(header::CONTENT_TYPE, "application/json")], json).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "No logs available."),
        Err(e) => {
            error!(error = %e, "Failed to read latest reading from store");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to retrieve weather data.",
            )
        }
    }
}

async fn post_weather(State(state): State<Arc<ServerState>>, body: Bytes) -> Response {
    let reading = match decode_any(&body) {
        Ok(reading) => reading,
        Err(e) => {
            warn!(error = %e, "Rejected reading");
            return error_response(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    debug!(status = %reading.status, location = %reading.location, "Reading ingested");
    match state.on_reading(&reading).await {
        Ok(()) => Json(AckBody { status: "ok" }).into_response(),
        Err(e) => {
            error!(error = %e, "Cannot re-encode reading");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthStatus> {
    Json(state.health_status().await)
}

async fn not_found(method: Method, uri: Uri) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        format!("No route for {} {}", method, uri.path()),
    )
}

async fn websocket(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<ServerState>>,
) -> Response {
    ws.on_upgrade(move |socket| viewer_session(socket, peer, state))
}

/// Send the newest reading, then stream new ones until the viewer leaves.
async fn viewer_session(socket: WebSocket, peer: SocketAddr, state: Arc<ServerState>) {
    info!(%peer, "WebSocket connected");
    let (mut write, mut read) = socket.split();

    // Subscribe before reading the latest so nothing slips between the two
    let mut rx = state.reading_sender.subscribe();

    match state.latest_reading_json().await {
        Ok(Some(latest)) => {
            if write
                .send(Message::Text(reading_message(&latest).into()))
                .await
                .is_err()
            {
                info!(%peer, "WebSocket disconnected");
                return;
            }
        }
        Ok(None) => {}
        Err(e) => warn!(%peer, error = %e, "Cannot load latest reading for viewer"),
    }

    loop {
        tokio::select! {
            reading = rx.recv() => {
                match reading {
                    Ok(json) => {
                        if write.send(Message::Text(json.into())).await.is_err() {
                            break; // Client disconnected
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(%peer, lagged = n, "Viewer lagged behind on readings");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break; // Server shutting down
                    }
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {} // Ignore other messages from client
                }
            }
        }
    }

    info!(%peer, "WebSocket disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::LocalObjectStore;
    use crate::weather::schema::encode;
    use crate::weather::{generate, ClimateBaseline, WeatherStatus, ZeroNoise};
    use chrono::TimeZone;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn reading_json(schema: PayloadSchema) -> String {
        let now = Utc.with_ymd_and_hms(2024, 5, 5, 12, 0, 0).unwrap();
        let reading = generate(&ClimateBaseline::default(), 360, "SkyPlaza", now, &mut ZeroNoise);
        String::from_utf8(encode(&reading, schema, now).unwrap()).unwrap()
    }

    async fn spawn_server(state: Arc<ServerState>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = serve(listener, state).await;
        });
        addr
    }

    fn weather_url(addr: SocketAddr) -> String {
        format!("http://{}/api/weather", addr)
    }

    async fn post_json(addr: SocketAddr, body: String) -> reqwest::Response {
        reqwest::Client::new()
            .post(weather_url(addr))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn get_weather_is_404_without_readings() {
        let addr = spawn_server(Arc::new(ServerState::new(PayloadSchema::Unified, None))).await;
        let response = reqwest::get(weather_url(addr)).await.unwrap();
        assert_eq!(response.status(), 404);
        let parsed: serde_json::Value = response.json().await.unwrap();
        assert_eq!(parsed["error"], "No logs available.");
    }

    #[tokio::test]
    async fn post_then_get_returns_posted_reading() {
        let state = Arc::new(ServerState::new(PayloadSchema::Legacy, None));
        let addr = spawn_server(Arc::clone(&state)).await;
        let json = reading_json(PayloadSchema::Legacy);

        let response = post_json(addr, json.clone()).await;
        assert_eq!(response.status(), 200);
        let ack: serde_json::Value = response.json().await.unwrap();
        assert_eq!(ack["status"], "ok");

        let response = reqwest::get(weather_url(addr)).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers()["content-type"].to_str().unwrap(),
            "application/json"
        );
        let served: serde_json::Value = response.json().await.unwrap();
        let posted: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(served, posted);

        let health = state.health_status().await;
        assert_eq!(health.readings_received, 1);
        assert_eq!(health.last_reading_at.as_deref(), Some("2024-05-05 18:00:00"));
        assert_eq!(health.last_status.as_deref(), Some("Clear"));
    }

    #[tokio::test]
    async fn posted_status_is_replaced_by_derived_status() {
        let state = Arc::new(ServerState::new(PayloadSchema::Legacy, None));
        let addr = spawn_server(Arc::clone(&state)).await;
        let mut rx = state.reading_sender.subscribe();

        let body = r#"{"Time":"2024-05-05 12:00:00","Temp":70.0,"Humidity":50.0,"Wind":40.0,"Pressure":1010.0,"Status":"Clear","Location":"SkyPlaza","highalert":false}"#;
        assert_eq!(post_json(addr, body.to_string()).await.status(), 200);

        let served: serde_json::Value = reqwest::get(weather_url(addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(served["Wind"], 40.0);
        assert_eq!(served["Status"], "Windy");
        assert_eq!(served["highalert"], true);

        let pushed: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(pushed["reading"]["Status"], "Windy");
        assert_eq!(pushed["reading"]["highalert"], true);
    }

    #[tokio::test]
    async fn server_schema_decides_served_field_names() {
        let state = Arc::new(ServerState::new(PayloadSchema::Unified, None));
        let addr = spawn_server(state).await;

        assert_eq!(post_json(addr, reading_json(PayloadSchema::Legacy)).await.status(), 200);

        let served: serde_json::Value = reqwest::get(weather_url(addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(served["windSpeed"], 10.0);
        assert_eq!(served["highAlert"], false);
        assert!(served.get("Wind").is_none());
    }

    #[tokio::test]
    async fn chunked_post_is_accepted() {
        let state = Arc::new(ServerState::new(PayloadSchema::Legacy, None));
        let addr = spawn_server(Arc::clone(&state)).await;
        let json = reading_json(PayloadSchema::Legacy);
        let (first, second) = json.split_at(json.len() / 2);

        let request = format!(
            "POST /api/weather HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n{:x}\r\n{}\r\n{:x}\r\n{}\r\n0\r\n\r\n",
            first.len(),
            first,
            second.len(),
            second
        );
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        let text = String::from_utf8_lossy(&response);

        assert!(text.starts_with("HTTP/1.1 200"), "response: {}", text);
        assert_eq!(state.health_status().await.readings_received, 1);
    }

    #[tokio::test]
    async fn malformed_post_is_rejected() {
        let state = Arc::new(ServerState::new(PayloadSchema::Unified, None));
        let addr = spawn_server(Arc::clone(&state)).await;
        let response = post_json(addr, "{\"nope\":true}".to_string()).await;
        assert_eq!(response.status(), 400);
        let parsed: serde_json::Value = response.json().await.unwrap();
        assert!(parsed["error"].as_str().unwrap().contains("Malformed reading JSON"));
        assert!(state.latest_json.read().await.is_none());
    }

    #[tokio::test]
    async fn get_weather_falls_back_to_store() {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path(), "weatherdata");
        store
            .put_blob("weather-log-100.json", br#"{"from":"old"}"#)
            .unwrap();
        store
            .put_blob("weather-log-200.json", br#"{"from":"store"}"#)
            .unwrap();

        let state = Arc::new(ServerState::new(PayloadSchema::Unified, Some(Box::new(store))));
        let addr = spawn_server(state).await;
        let response = reqwest::get(weather_url(addr)).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), r#"{"from":"store"}"#);
    }

    #[tokio::test]
    async fn unreadable_store_is_500() {
        let dir = TempDir::new().unwrap();
        // A file where the container directory should be
        std::fs::write(dir.path().join("weatherdata"), b"").unwrap();
        let store = LocalObjectStore::new(dir.path(), "weatherdata");

        let state = Arc::new(ServerState::new(PayloadSchema::Unified, Some(Box::new(store))));
        let addr = spawn_server(state).await;
        let response = reqwest::get(weather_url(addr)).await.unwrap();
        assert_eq!(response.status(), 500);
        let parsed: serde_json::Value = response.json().await.unwrap();
        assert_eq!(parsed["error"], "Failed to retrieve weather data.");
    }

    #[tokio::test]
    async fn health_endpoint_returns_json() {
        let addr = spawn_server(Arc::new(ServerState::new(PayloadSchema::Unified, None))).await;
        let response = reqwest::get(format!("http://{}/health", addr)).await.unwrap();
        assert_eq!(response.status(), 200);
        assert!(
            response.headers()["content-type"]
                .to_str()
                .unwrap()
                .contains("application/json")
        );
        let parsed: serde_json::Value = response.json().await.unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["readings_received"], 0);
        assert_eq!(parsed["viewers"], 0);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let addr = spawn_server(Arc::new(ServerState::new(PayloadSchema::Unified, None))).await;
        let client = reqwest::Client::new();

        let response = client.delete(weather_url(addr)).send().await.unwrap();
        assert_eq!(response.status(), 404);
        assert!(
            response
                .text()
                .await
                .unwrap()
                .contains("No route for DELETE /api/weather")
        );

        let response = client
            .get(format!("http://{}/nowhere", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn broadcast_reading_to_subscribers() {
        let state = ServerState::new(PayloadSchema::Unified, None);
        let mut rx = state.reading_sender.subscribe();
        let json = reading_json(PayloadSchema::Unified);
        let reading = decode_any(json.as_bytes()).unwrap();

        state.on_reading(&reading).await.unwrap();

        let received = rx.recv().await.expect("should receive reading");
        let parsed: serde_json::Value = serde_json::from_str(&received).unwrap();
        assert_eq!(parsed["message_type"], "Reading");
        assert_eq!(parsed["reading"]["status"], "Clear");
    }

    #[tokio::test]
    async fn websocket_client_receives_latest_and_new_readings() {
        let state = Arc::new(ServerState::new(PayloadSchema::Unified, None));
        let first = reading_json(PayloadSchema::Unified);
        state
            .on_reading(&decode_any(first.as_bytes()).unwrap())
            .await
            .unwrap();

        let addr = spawn_server(Arc::clone(&state)).await;

        let url = format!("ws://{}/ws", addr);
        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

        // Newest reading on connect
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for latest")
            .expect("stream ended")
            .expect("message error");
        let parsed: serde_json::Value = serde_json::from_str(&msg.into_text().unwrap()).unwrap();
        assert_eq!(parsed["reading"]["location"], "SkyPlaza");

        // Then a fresh one
        let now = Utc.with_ymd_and_hms(2024, 5, 5, 12, 0, 0).unwrap();
        let rainy = generate(
            &ClimateBaseline {
                temperature: 70.0,
                humidity: 80.0,
                wind_speed: 5.0,
                pressure: 1000.0,
            },
            0,
            "SkyPlaza",
            now,
            &mut ZeroNoise,
        );
        assert_eq!(rainy.status, WeatherStatus::Rain);
        state.on_reading(&rainy).await.unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for reading")
            .expect("stream ended")
            .expect("message error");
        let parsed: serde_json::Value = serde_json::from_str(&msg.into_text().unwrap()).unwrap();
        assert_eq!(parsed["reading"]["status"], "Rain");
        assert_eq!(parsed["reading"]["highAlert"], true);

        ws.close(None).await.unwrap();
    }

    #[tokio::test]
    async fn viewer_count_drops_after_disconnect() {
        let state = Arc::new(ServerState::new(PayloadSchema::Unified, None));
        let addr = spawn_server(Arc::clone(&state)).await;

        let url = format!("ws://{}/ws", addr);
        let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        drop(ws);

        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while state.reading_sender.receiver_count() > 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(drained.is_ok(), "Server should release the viewer within 5s");

        // Server keeps answering after the viewer left
        let response = reqwest::get(format!("http://{}/health", addr)).await.unwrap();
        assert_eq!(response.status(), 200);
    }
}
