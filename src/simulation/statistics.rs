use std::collections::HashMap;

use crate::weather::WeatherStatus;

/// Running counters kept by the driver for milestone logs and the exit summary.
#[derive(Debug, Clone, Default)]
pub struct TickStatistics {
    pub ticks: u64,
    pub high_alerts: u64,
    pub status_counts: HashMap<WeatherStatus, u64>,
    pub deliveries: u64,
    pub sink_failures: HashMap<String, u64>,
    pub last_tick_duration_ms: f32,
}

impl TickStatistics {
    pub fn record_reading(&mut self, status: WeatherStatus, high_alert: bool) {
        self.ticks += 1;
        if high_alert {
            self.high_alerts += 1;
        }
        *self.status_counts.entry(status).or_insert(0) += 1;
    }

    pub fn record_delivery(&mut self) {
        self.deliveries += 1;
    }

    pub fn record_failure(&mut self, sink: &str) {
        *self.sink_failures.entry(sink.to_string()).or_insert(0) += 1;
    }

    pub fn total_failures(&self) -> u64 {
        self.sink_failures.values().sum()
    }

    /// Most frequent status so far, ties broken by declaration order.
    pub fn dominant_status(&self) -> Option<WeatherStatus> {
        [
            WeatherStatus::Clear,
            WeatherStatus::Rain,
            WeatherStatus::Windy,
            WeatherStatus::Hot,
        ]
        .into_iter()
        .filter_map(|s| self.status_counts.get(&s).map(|&n| (s, n)))
        .fold(None, |best: Option<(WeatherStatus, u64)>, (s, n)| match best {
            Some((_, best_n)) if best_n >= n => best,
            _ => Some((s, n)),
        })
        .map(|(s, _)| s)
    }
}
