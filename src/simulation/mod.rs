pub mod statistics;

use chrono::{DateTime, Utc};

use crate::weather::{self, ClimateBaseline, NoiseSource, WeatherReading};

/// Simulated minutes added to the clock after every tick unless configured.
pub const DEFAULT_MINUTE_STEP: u64 = 5;

/// Mutable simulation state owned by the loop driver.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationState {
    pub baseline: ClimateBaseline,
    pub location: String,
    pub minute_step: u64,
    /// Grows without bound; the generator reduces it modulo one day.
    pub minutes_elapsed: u64,
    pub tick_count: u64,
}

impl SimulationState {
    pub fn new(baseline: ClimateBaseline, location: impl Into<String>, minute_step: u64) -> Self {
        SimulationState {
            baseline,
            location: location.into(),
            minute_step,
            minutes_elapsed: 0,
            tick_count: 0,
        }
    }

    /// Continue from an arbitrary point in the simulated day.
    pub fn starting_at(mut self, minutes_elapsed: u64) -> Self {
        self.minutes_elapsed = minutes_elapsed;
        self
    }

    fn advance(&mut self) {
        self.minutes_elapsed = self.minutes_elapsed.saturating_add(self.minute_step);
        self.tick_count += 1;
    }
}

/// Result of executing a single tick.
#[derive(Debug, Clone)]
pub struct TickResult {
    /// 1-based index of the tick that produced this reading.
    pub tick: u64,
    /// Simulated minute the reading was generated at (before advancing).
    pub minutes_elapsed: u64,
    pub reading: WeatherReading,
}

/// Generate the reading for the current simulated minute, then advance the clock.
pub fn execute_tick<N: NoiseSource + ?Sized>(
    state: &mut SimulationState,
    noise: &mut N,
    now: DateTime<Utc>,
) -> TickResult {
    let minutes_elapsed = state.minutes_elapsed;
    let reading = weather::generate(&state.baseline, minutes_elapsed, &state.location, now, noise);
    state.advance();

    TickResult {
        tick: state.tick_count,
        minutes_elapsed,
        reading,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weather::{WeatherStatus, ZeroNoise};
    use chrono::{TimeDelta, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn tick_generates_then_advances() {
        let mut state = SimulationState::new(ClimateBaseline::default(), "SkyPlaza", 5);
        let first = execute_tick(&mut state, &mut ZeroNoise, now());
        assert_eq!(first.tick, 1);
        assert_eq!(first.minutes_elapsed, 0);
        assert_eq!(first.reading.timestamp, now());
        assert_eq!(state.minutes_elapsed, 5);

        let second = execute_tick(&mut state, &mut ZeroNoise, now());
        assert_eq!(second.tick, 2);
        assert_eq!(second.minutes_elapsed, 5);
        assert_eq!(second.reading.timestamp, now() + TimeDelta::minutes(5));
        assert_eq!(state.tick_count, 2);
    }

    #[test]
    fn counter_keeps_growing_past_one_day() {
        let mut state = SimulationState::new(ClimateBaseline::default(), "SkyPlaza", 5);
        for _ in 0..300 {
            execute_tick(&mut state, &mut ZeroNoise, now());
        }
        assert_eq!(state.minutes_elapsed, 1500);

        // 1500 mod 1440 = 60, same phase as minute 60 of day one
        let wrapped = execute_tick(&mut state, &mut ZeroNoise, now());
        let mut fresh = SimulationState::new(ClimateBaseline::default(), "SkyPlaza", 5).starting_at(60);
        let first_day = execute_tick(&mut fresh, &mut ZeroNoise, now());
        assert_eq!(wrapped.reading.temperature, first_day.reading.temperature);
        assert_eq!(wrapped.reading.humidity, first_day.reading.humidity);
        assert_eq!(wrapped.reading.pressure, first_day.reading.pressure);
    }

    #[test]
    fn counter_saturates_instead_of_overflowing() {
        let mut state =
            SimulationState::new(ClimateBaseline::default(), "SkyPlaza", 5).starting_at(u64::MAX - 2);
        let result = execute_tick(&mut state, &mut ZeroNoise, now());
        assert_eq!(result.reading.status, WeatherStatus::Clear);
        assert_eq!(state.minutes_elapsed, u64::MAX);
    }
}
