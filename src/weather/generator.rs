use std::f64::consts::{FRAC_PI_2, TAU};

use chrono::{DateTime, TimeDelta, Utc};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::weather::{ClimateBaseline, WeatherReading, WeatherStatus, MINUTES_PER_DAY};

const HUMIDITY_MIN: f64 = 20.0;
const HUMIDITY_MAX: f64 = 100.0;

const RAIN_HUMIDITY_ABOVE: f64 = 85.0;
const RAIN_TEMPERATURE_BELOW: f64 = 75.0;
const WINDY_SPEED_ABOVE: f64 = 25.0;
const HOT_TEMPERATURE_ABOVE: f64 = 95.0;

/// Which reading field a noise sample perturbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoiseField {
    Wind,
    Temperature,
    Humidity,
    Pressure,
}

/// Half-widths of the uniform noise band applied to each field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseAmplitudes {
    pub wind: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
}

impl NoiseAmplitudes {
    pub const STANDARD: NoiseAmplitudes = NoiseAmplitudes {
        wind: 2.0,
        temperature: 1.0,
        humidity: 2.0,
        pressure: 0.2,
    };

    pub fn for_field(&self, field: NoiseField) -> f64 {
        match field {
            NoiseField::Wind => self.wind,
            NoiseField::Temperature => self.temperature,
            NoiseField::Humidity => self.humidity,
            NoiseField::Pressure => self.pressure,
        }
    }
}

/// Source of the bounded random perturbation added to each field.
///
/// Implementations must return a value in `[-amplitude, amplitude]`.
pub trait NoiseSource {
    fn offset(&mut self, field: NoiseField, amplitude: f64) -> f64;
}

/// Uniform noise drawn from a ChaCha8 stream.
pub struct UniformNoise {
    seed: u64,
    rng: ChaCha8Rng,
}

impl UniformNoise {
    /// Seed 0 (or `None`) picks a random seed; the chosen seed is kept for logging.
    pub fn new(seed: Option<u64>) -> Self {
        let seed = match seed {
            Some(s) if s != 0 => s,
            _ => rand::thread_rng().r#gen(),
        };
        UniformNoise {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl NoiseSource for UniformNoise {
    fn offset(&mut self, _field: NoiseField, amplitude: f64) -> f64 {
        if amplitude <= 0.0 {
            return 0.0;
        }
        self.rng.gen_range(-amplitude..=amplitude)
    }
}

/// Noise disabled: the reading is the pure diurnal signal.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZeroNoise;

impl NoiseSource for ZeroNoise {
    fn offset(&mut self, _field: NoiseField, _amplitude: f64) -> f64 {
        0.0
    }
}

/// Position within the simulated day, in `[0, 1)`.
pub fn cycle_fraction(minutes_elapsed: u64) -> f64 {
    (minutes_elapsed % MINUTES_PER_DAY) as f64 / MINUTES_PER_DAY as f64
}

/// Deterministic part of the signal at a given simulated minute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiurnalComponents {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
}

impl DiurnalComponents {
    pub fn at(minutes_elapsed: u64) -> Self {
        let angle = cycle_fraction(minutes_elapsed) * TAU;
        DiurnalComponents {
            temperature: angle.sin() * 10.0,
            humidity: angle.cos() * 10.0,
            pressure: (angle + FRAC_PI_2).sin() * 1.5,
        }
    }
}

/// Round half away from zero to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Derive the status from final field values. First matching rule wins:
/// Rain, then Windy, then Hot, else Clear.
pub fn classify(temperature: f64, humidity: f64, wind_speed: f64) -> WeatherStatus {
    if humidity > RAIN_HUMIDITY_ABOVE && temperature < RAIN_TEMPERATURE_BELOW {
        WeatherStatus::Rain
    } else if wind_speed > WINDY_SPEED_ABOVE {
        WeatherStatus::Windy
    } else if temperature > HOT_TEMPERATURE_ABOVE {
        WeatherStatus::Hot
    } else {
        WeatherStatus::Clear
    }
}

fn advance_clock(now: DateTime<Utc>, minutes_elapsed: u64) -> DateTime<Utc> {
    i64::try_from(minutes_elapsed)
        .ok()
        .and_then(TimeDelta::try_minutes)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Produce one reading for `minutes_elapsed` simulated minutes after `now`.
///
/// Total over all inputs. The only side channel is the noise source; passing
/// [`ZeroNoise`] makes the result a pure function of the arguments.
pub fn generate<N: NoiseSource + ?Sized>(
    baseline: &ClimateBaseline,
    minutes_elapsed: u64,
    location: &str,
    now: DateTime<Utc>,
    noise: &mut N,
) -> WeatherReading {
    let diurnal = DiurnalComponents::at(minutes_elapsed);
    let amp = NoiseAmplitudes::STANDARD;

    let wind_noise = noise.offset(NoiseField::Wind, amp.wind);
    let temp_noise = noise.offset(NoiseField::Temperature, amp.temperature);
    let humidity_noise = noise.offset(NoiseField::Humidity, amp.humidity);
    let pressure_noise = noise.offset(NoiseField::Pressure, amp.pressure);

    let temperature = round1(baseline.temperature + diurnal.temperature + temp_noise);
    let humidity = round1(
        (baseline.humidity + diurnal.humidity + humidity_noise).clamp(HUMIDITY_MIN, HUMIDITY_MAX),
    );
    let wind_speed = round1((baseline.wind_speed + wind_noise).max(0.0));
    let pressure = round1(baseline.pressure + diurnal.pressure + pressure_noise);

    let status = classify(temperature, humidity, wind_speed);

    WeatherReading {
        timestamp: advance_clock(now, minutes_elapsed),
        temperature,
        humidity,
        wind_speed,
        pressure,
        status,
        high_alert: status.is_high_alert(),
        location: location.to_string(),
    }
}

/// [`generate`] stamped against the current wall clock.
pub fn generate_now<N: NoiseSource + ?Sized>(
    baseline: &ClimateBaseline,
    minutes_elapsed: u64,
    location: &str,
    noise: &mut N,
) -> WeatherReading {
    generate(baseline, minutes_elapsed, location, Utc::now(), noise)
}
