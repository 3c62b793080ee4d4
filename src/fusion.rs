// src/fusion.rs - Median consensus over same-kind readings.
use crate::forecast::TempTs;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// A single fused or raw measurement. `ts` is absent only when the value
/// was synthesized without provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub temp: Decimal,
    pub ts: Option<DateTime<Utc>>,
}

impl Reading {
    pub fn new(temp: Decimal, ts: DateTime<Utc>) -> Self {
        Self { temp, ts: Some(ts) }
    }

    pub fn synthetic(temp: Decimal) -> Self {
        Self { temp, ts: None }
    }
}

/// A raw forecast series plus the instant it was retrieved.
pub type ForecastSeries = (Vec<TempTs>, DateTime<Utc>);

fn midpoint(a: DateTime<Utc>, b: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let ms = (a.timestamp_millis() + b.timestamp_millis()) / 2;
    DateTime::from_timestamp_millis(ms)
}

fn average_ts(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => midpoint(a, b),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

/// Drop readings whose timestamp is further than `max_age_minutes` from
/// `now`. Synthetic readings (no timestamp) pass unconditionally.
pub fn within_age(readings: Vec<Reading>, now: DateTime<Utc>, max_age_minutes: i64) -> Vec<Reading> {
    readings
        .into_iter()
        .filter(|reading| match reading.ts {
            None => true,
            Some(ts) => {
                let age_seconds = (now - ts).num_seconds().abs();
                if age_seconds < max_age_minutes * 60 {
                    true
                } else {
                    tracing::info!(
                        "Discarding reading {} from {}: older than {} min",
                        reading.temp,
                        ts,
                        max_age_minutes
                    );
                    false
                }
            }
        })
        .collect()
}

/// Median by value with rank-paired timestamps. Even counts average the two
/// central values and the two central timestamps.
pub fn median_reading(mut readings: Vec<Reading>) -> Option<Reading> {
    if readings.is_empty() {
        return None;
    }
    readings.sort_by(|a, b| a.temp.cmp(&b.temp));
    let n = readings.len();
    if n % 2 == 1 {
        Some(readings[n / 2].clone())
    } else {
        let lo = &readings[n / 2 - 1];
        let hi = &readings[n / 2];
        Some(Reading {
            temp: (lo.temp + hi.temp) / dec!(2),
            ts: average_ts(lo.ts, hi.ts),
        })
    }
}

/// Pointwise median across forecast series at matching rank positions, up to
/// the shortest series. The fused reference timestamp is the earliest fused
/// point's timestamp.
pub fn median_forecast(series: Vec<ForecastSeries>) -> Option<ForecastSeries> {
    if series.is_empty() {
        return None;
    }
    let shortest = series.iter().map(|(points, _)| points.len()).min()?;
    let mut fused = Vec::with_capacity(shortest);
    for rank in 0..shortest {
        let at_rank: Vec<Reading> = series
            .iter()
            .map(|(points, _)| Reading::new(points[rank].temp, points[rank].ts))
            .collect();
        let median = median_reading(at_rank)?;
        fused.push(TempTs::new(median.temp, median.ts?));
    }
    let ts = fused.first()?.ts;
    Some((fused, ts))
}
