use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::SimulationConfig;
use crate::server::{self, ServerState};
use crate::simulation::statistics::TickStatistics;
use crate::simulation::{self, SimulationState};
use crate::sink::{
    blob_key, DashboardSink, Delivery, HttpObjectStore, LocalObjectStore, ObjectStore,
    ObjectStoreSink, ReadingSink,
};
use crate::weather::schema::{self, decode_any, PayloadSchema};
use crate::weather::{NoiseSource, UniformNoise, ZeroNoise};

/// Ticks between milestone summaries in the log.
const MILESTONE_TICKS: u64 = 100;

/// Convert a validated seconds value from the config.
fn config_duration(name: &str, secs: f64) -> Result<Duration, String> {
    Duration::try_from_secs_f64(secs).map_err(|e| format!("{}: {}", name, e))
}

/// Open the configured object store backend.
pub fn open_store(config: &SimulationConfig) -> Result<Box<dyn ObjectStore>, String> {
    let store = &config.store;
    if !store.is_http() {
        return Ok(Box::new(LocalObjectStore::new(
            Path::new(&store.root),
            &store.container,
        )));
    }

    let account_url = store
        .account_url
        .as_deref()
        .ok_or_else(|| "store.account_url is required for the http backend".to_string())?;
    let http = HttpObjectStore::new(
        account_url,
        &store.container,
        store.sas_token.as_deref(),
        config_duration("store.timeout_secs", store.timeout_secs)?,
    )
    .map_err(|e| format!("Failed to create object store client: {}", e))?;
    Ok(Box::new(http))
}

/// Build the configured sinks: the object store first, then the dashboard if set.
pub fn build_sinks(config: &SimulationConfig) -> Result<Vec<Box<dyn ReadingSink>>, String> {
    let mut sinks: Vec<Box<dyn ReadingSink>> = vec![Box::new(ObjectStoreSink::new(
        open_store(config)?,
        config.store.write_latest,
    ))];

    if let Some(url) = &config.dashboard.url {
        let timeout = config_duration("dashboard.timeout_secs", config.dashboard.timeout_secs)?;
        let dashboard = DashboardSink::new(url, timeout)
            .map_err(|e| format!("Failed to create dashboard client: {}", e))?;
        sinks.push(Box::new(dashboard));
    }

    Ok(sinks)
}

/// Options for the tick loop that do not come from the config file.
#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub interval: Duration,
    pub schema: PayloadSchema,
    /// Stop after this many ticks; run until shutdown when `None`.
    pub max_ticks: Option<u64>,
}

/// Run the tick loop: generate, encode, deliver to every sink, wait.
///
/// Sink failures are logged and counted, never fatal. The loop ends when
/// `shutdown` resolves or `max_ticks` is reached.
pub async fn drive<N, F>(
    state: &mut SimulationState,
    noise: &mut N,
    sinks: &[Box<dyn ReadingSink>],
    options: &LoopOptions,
    shutdown: F,
) -> TickStatistics
where
    N: NoiseSource + ?Sized,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut stats = TickStatistics::default();

    loop {
        let tick_start = Instant::now();

        let result = simulation::execute_tick(state, &mut *noise, Utc::now());
        let reading = &result.reading;
        stats.record_reading(reading.status, reading.high_alert);

        info!(
            tick = result.tick,
            minute = result.minutes_elapsed,
            timestamp = %reading.formatted_timestamp(),
            temperature = reading.temperature,
            humidity = reading.humidity,
            wind_speed = reading.wind_speed,
            pressure = reading.pressure,
            status = %reading.status,
            high_alert = reading.high_alert,
            "Reading generated"
        );

        let uploaded_at = Utc::now();
        match schema::encode(reading, options.schema, uploaded_at) {
            Ok(payload) => {
                let delivery = Delivery {
                    reading: result.reading.clone(),
                    key: blob_key(uploaded_at),
                    payload,
                };
                for sink in sinks {
                    match sink.deliver(&delivery).await {
                        Ok(()) => {
                            stats.record_delivery();
                            info!(tick = result.tick, sink = sink.name(), key = %delivery.key, "Reading delivered");
                        }
                        Err(e) => {
                            stats.record_failure(sink.name());
                            warn!(tick = result.tick, sink = sink.name(), error = %e, "Delivery failed");
                        }
                    }
                }
            }
            Err(e) => {
                error!(tick = result.tick, error = %e, "Cannot encode reading");
            }
        }

        stats.last_tick_duration_ms = tick_start.elapsed().as_secs_f32() * 1000.0;

        if result.tick % MILESTONE_TICKS == 0 {
            info!(
                tick = result.tick,
                minutes_elapsed = state.minutes_elapsed,
                high_alerts = stats.high_alerts,
                deliveries = stats.deliveries,
                failures = stats.total_failures(),
                dominant = ?stats.dominant_status(),
                last_tick_ms = stats.last_tick_duration_ms,
                "Milestone"
            );
        }

        if options.max_ticks.is_some_and(|max| result.tick >= max) {
            info!(ticks = result.tick, "Tick limit reached");
            break;
        }

        // Sleep the remainder of the interval, measured from tick start
        let remaining = options.interval.saturating_sub(tick_start.elapsed());
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            _ = tokio::time::sleep(remaining) => {}
        }
    }

    stats
}

/// Run the generator against the configured sinks until Ctrl-C or `max_ticks`.
pub async fn run_simulation(config: &SimulationConfig, max_ticks: Option<u64>) -> Result<(), String> {
    let sinks = build_sinks(config)?;
    let mut noise = UniformNoise::new(Some(config.seed));
    let mut state = SimulationState::new(config.baseline, config.location.clone(), config.minute_step)
        .starting_at(config.start_minute);

    let sink_names: Vec<&str> = sinks.iter().map(|s| s.name()).collect();
    info!(
        location = %state.location,
        seed = noise.seed(),
        interval_secs = config.tick_interval_secs,
        minute_step = config.minute_step,
        schema = ?config.schema,
        sinks = ?sink_names,
        "Simulation starting"
    );

    let options = LoopOptions {
        interval: config_duration("tick_interval_secs", config.tick_interval_secs)?,
        schema: config.schema,
        max_ticks,
    };
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    let stats = drive(&mut state, &mut noise, &sinks, &options, shutdown).await;

    info!(
        ticks = stats.ticks,
        high_alerts = stats.high_alerts,
        deliveries = stats.deliveries,
        failures = ?stats.sink_failures,
        minutes_elapsed = state.minutes_elapsed,
        "Simulation stopped"
    );
    Ok(())
}

/// Print `count` readings to stdout as JSON lines without delivering them.
pub fn sample(
    config: &SimulationConfig,
    count: u64,
    start_minute: Option<u64>,
    without_noise: bool,
) -> Result<(), String> {
    let mut state = SimulationState::new(config.baseline, config.location.clone(), config.minute_step)
        .starting_at(start_minute.unwrap_or(config.start_minute));
    let mut uniform = UniformNoise::new(Some(config.seed));
    let mut zero = ZeroNoise;
    let noise: &mut dyn NoiseSource = if without_noise { &mut zero } else { &mut uniform };

    let now = Utc::now();
    for _ in 0..count {
        let result = simulation::execute_tick(&mut state, &mut *noise, now);
        let payload = schema::encode(&result.reading, config.schema, now)
            .map_err(|e| format!("Cannot encode reading: {}", e))?;
        println!("{}", String::from_utf8_lossy(&payload));
    }
    Ok(())
}

/// Serve the dashboard API until Ctrl-C.
pub async fn serve(config: &SimulationConfig) -> Result<(), String> {
    let store = open_store(config)?;
    info!(store = %store.describe(), schema = ?config.schema, "Serving stored readings");
    let state = Arc::new(ServerState::new(config.schema, Some(store)));

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .map_err(|e| format!("Invalid bind address: {}", e))?;

    tokio::select! {
        result = server::start_server(state, addr) => {
            result.map_err(|e| format!("Server error: {}", e))
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
    }
}

/// List stored readings, newest first.
pub async fn list_readings(config: &SimulationConfig, limit: usize) -> Result<(), String> {
    let store = open_store(config)?;
    let blobs = store
        .list()
        .await
        .map_err(|e| format!("Failed to list readings: {}", e))?;

    if blobs.is_empty() {
        println!("No readings found in {}", store.describe());
        return Ok(());
    }

    println!("{:<36} {:>20} {:>8}", "Key", "Uploaded (UTC)", "Size");
    println!("{}", "-".repeat(66));
    for blob in blobs.iter().take(limit) {
        let uploaded = blob
            .uploaded_at
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(|secs| chrono::DateTime::<Utc>::from_timestamp(secs, 0))
            .map(|t| t.format(crate::weather::TIMESTAMP_FORMAT).to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:<36} {:>20} {:>6} B", blob.key, uploaded, blob.size);
    }
    println!("\n{} reading(s) in {}", blobs.len(), store.describe());
    Ok(())
}

/// Show the newest stored reading.
pub async fn latest_reading(config: &SimulationConfig) -> Result<(), String> {
    let store = open_store(config)?;
    let (key, data) = store
        .latest()
        .await
        .map_err(|e| format!("Failed to read latest reading: {}", e))?
        .ok_or_else(|| format!("No readings found in {}", store.describe()))?;

    let reading = decode_any(&data).map_err(|e| format!("{}: {}", key, e))?;

    println!("=== {} ===", key);
    println!("Location: {}", reading.location);
    println!("Time: {}", reading.formatted_timestamp());
    println!("Temperature: {:.1}", reading.temperature);
    println!("Humidity: {:.1}", reading.humidity);
    println!("Wind: {:.1}", reading.wind_speed);
    println!("Pressure: {:.1}", reading.pressure);
    println!(
        "Status: {}{}",
        reading.status,
        if reading.high_alert { " (HIGH ALERT)" } else { "" }
    );
    Ok(())
}
