// src/forecast.rs - Hourly forecast assembly and aggregates.
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// One temperature sample with its timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempTs {
    pub temp: Decimal,
    pub ts: DateTime<Utc>,
}

impl TempTs {
    pub fn new(temp: Decimal, ts: DateTime<Utc>) -> Self {
        Self { temp, ts }
    }
}

/// A coarse long-range sample covering everything up to `until`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoarseSpan {
    pub temp: Decimal,
    pub until: DateTime<Utc>,
}

/// Ordered hourly forecast, immutable once built for a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Forecast {
    pub temps: Vec<TempTs>,
    pub ts: DateTime<Utc>,
}

/// Extend a high-resolution hourly series with a coarse long-range series:
/// every coarse span past the end of the series contributes flat hourly
/// points at the span's temperature until the span's end.
pub fn extend_with_coarse(mut points: Vec<TempTs>, coarse: &[CoarseSpan]) -> Vec<TempTs> {
    if points.is_empty() {
        return points;
    }
    for span in coarse {
        while span.until > points.last().unwrap().ts {
            let next_ts = points.last().unwrap().ts + Duration::hours(1);
            points.push(TempTs::new(span.temp, next_ts));
        }
    }
    points
}

/// Flat-continue the last known temperature at one-hour increments until
/// the series covers `horizon_end`.
pub fn extend_flat(mut points: Vec<TempTs>, horizon_end: DateTime<Utc>) -> Vec<TempTs> {
    if points.is_empty() {
        return points;
    }
    while points.last().unwrap().ts < horizon_end {
        let last = points.last().unwrap();
        points.push(TempTs::new(last.temp, last.ts + Duration::hours(1)));
    }
    points
}

/// Build the cycle's forecast. With `forward_only` set, points at or before
/// `now` are dropped. Non-increasing timestamps are discarded so the result
/// is strictly time-monotonic.
pub fn make_forecast(
    points: Vec<TempTs>,
    retrieved_at: DateTime<Utc>,
    now: DateTime<Utc>,
    forward_only: bool,
) -> Forecast {
    let mut temps: Vec<TempTs> = Vec::with_capacity(points.len());
    for point in points {
        if forward_only && point.ts <= now {
            continue;
        }
        if let Some(last) = temps.last() {
            if point.ts <= last.ts {
                tracing::warn!("Dropping out-of-order forecast point at {}", point.ts);
                continue;
            }
        }
        temps.push(point);
    }
    Forecast {
        temps,
        ts: retrieved_at,
    }
}

/// Mean of the first `hours` forecast temperatures.
pub fn forecast_mean(forecast: Option<&Forecast>, hours: Decimal) -> Option<Decimal> {
    let forecast = forecast?;
    if forecast.temps.is_empty() {
        return None;
    }
    let take = hours.to_i64().unwrap_or(0).max(0) as usize;
    let window: Vec<Decimal> = forecast
        .temps
        .iter()
        .take(take)
        .map(|t| t.temp)
        .collect();
    if window.is_empty() {
        return None;
    }
    let sum: Decimal = window.iter().copied().sum();
    Some(sum / Decimal::from(window.len() as u64))
}

/// Span and content summary for the audit log.
pub fn log_forecast(name: &str, temps: &[TempTs]) {
    if let (Some(first), Some(last)) = (temps.first(), temps.last()) {
        let hours = Decimal::from((last.ts - first.ts).num_seconds()) / dec!(3600);
        let sum: Decimal = temps.iter().map(|t| t.temp).sum();
        let mean = sum / Decimal::from(temps.len() as u64);
        tracing::info!(
            "Forecast {} between {} and {} ({} h), mean {}",
            name,
            first.ts,
            last.ts,
            hours.round_dp(1),
            mean.round_dp(1)
        );
    } else {
        tracing::info!("No forecast from {}", name);
    }
}
