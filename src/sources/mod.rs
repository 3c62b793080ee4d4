// src/sources/mod.rs - Source adapters and the cached, fused fetch path.
use crate::cache::{StaleCheck, StalenessCache};
use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::forecast::{CoarseSpan, TempTs, extend_flat, extend_with_coarse};
use crate::fusion::{self, ForecastSeries, Reading};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Fetch timed out")]
    Timeout,
}

/// A fallible scalar temperature source. Internal failures surface as
/// `Err` and are absorbed by the fetch path; they never cross the cycle
/// boundary.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self) -> Result<Option<Reading>, SourceError>;
}

/// A fallible hourly forecast source.
#[async_trait]
pub trait ForecastAdapter: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self) -> Result<Option<ForecastSeries>, SourceError>;
}

async fn fetch_reading_with_timeout(
    adapter: &dyn SourceAdapter,
    timeout: std::time::Duration,
) -> Result<Option<Reading>, SourceError> {
    match tokio::time::timeout(timeout, adapter.fetch()).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Timeout),
    }
}

async fn fetch_forecast_with_timeout(
    adapter: &dyn ForecastAdapter,
    timeout: std::time::Duration,
) -> Result<Option<ForecastSeries>, SourceError> {
    match tokio::time::timeout(timeout, adapter.fetch()).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Timeout),
    }
}

fn cache_result<T: Clone>(
    cache: &mut StalenessCache<T>,
    cache_config: &CacheConfig,
    name: &str,
    produced_at: DateTime<Utc>,
    payload: T,
) {
    let (ok_minutes, failed_minutes) = cache_config.ttl_minutes(name);
    cache.put(
        name,
        produced_at + Duration::minutes(ok_minutes),
        produced_at + Duration::minutes(failed_minutes),
        payload,
    );
}

/// Fetch every adapter (cache hits short-circuit; misses run concurrently,
/// bounded by `timeout`), apply the staleness discipline, then fuse the
/// accepted readings by median within `max_age_minutes` of now.
pub async fn fused_reading(
    cache: &mut StalenessCache<Reading>,
    cache_config: &CacheConfig,
    clock: &dyn Clock,
    adapters: &[Box<dyn SourceAdapter>],
    max_age_minutes: i64,
    timeout: std::time::Duration,
) -> Option<Reading> {
    let now = clock.now();
    let mut candidates: Vec<Reading> = Vec::new();
    let mut misses: Vec<&dyn SourceAdapter> = Vec::new();

    for adapter in adapters {
        match cache.get(adapter.name(), StaleCheck::Ok, now) {
            Some(cached) => {
                tracing::debug!("{} cache hit: {:?}", adapter.name(), cached);
                candidates.push(cached);
            }
            None => misses.push(adapter.as_ref()),
        }
    }

    let fetched = join_all(
        misses
            .iter()
            .map(|adapter| fetch_reading_with_timeout(*adapter, timeout)),
    )
    .await;

    for (adapter, result) in misses.iter().zip(fetched) {
        let usable = match result {
            Ok(Some(reading)) if reading.ts.is_some() => Some(reading),
            Ok(other) => {
                tracing::debug!("{} produced nothing usable: {:?}", adapter.name(), other);
                None
            }
            Err(e) => {
                tracing::warn!("{} failed: {}", adapter.name(), e);
                None
            }
        };
        match usable {
            Some(reading) => {
                let produced_at = reading.ts.unwrap();
                cache_result(cache, cache_config, adapter.name(), produced_at, reading.clone());
                candidates.push(reading);
            }
            None => {
                if let Some(old) = cache.get(adapter.name(), StaleCheck::Failed, now) {
                    tracing::debug!("{} failed, reusing old result: {:?}", adapter.name(), old);
                    candidates.push(old);
                } else {
                    tracing::debug!("{} failed and no result in cache", adapter.name());
                }
            }
        }
    }

    fusion::median_reading(fusion::within_age(candidates, now, max_age_minutes))
}

/// Forecast counterpart of [`fused_reading`]: same staleness discipline,
/// pointwise median fusion.
pub async fn fused_forecast(
    cache: &mut StalenessCache<ForecastSeries>,
    cache_config: &CacheConfig,
    clock: &dyn Clock,
    adapters: &[Box<dyn ForecastAdapter>],
    max_age_minutes: i64,
    timeout: std::time::Duration,
) -> Option<ForecastSeries> {
    let now = clock.now();
    let mut candidates: Vec<ForecastSeries> = Vec::new();
    let mut misses: Vec<&dyn ForecastAdapter> = Vec::new();

    for adapter in adapters {
        match cache.get(adapter.name(), StaleCheck::Ok, now) {
            Some(cached) => candidates.push(cached),
            None => misses.push(adapter.as_ref()),
        }
    }

    let fetched = join_all(
        misses
            .iter()
            .map(|adapter| fetch_forecast_with_timeout(*adapter, timeout)),
    )
    .await;

    for (adapter, result) in misses.iter().zip(fetched) {
        match result {
            Ok(Some(series)) => {
                cache_result(cache, cache_config, adapter.name(), series.1, series.clone());
                candidates.push(series);
            }
            Ok(None) | Err(_) => {
                if let Err(e) = &result {
                    tracing::warn!("{} failed: {}", adapter.name(), e);
                }
                if let Some(old) = cache.get(adapter.name(), StaleCheck::Failed, now) {
                    candidates.push(old);
                }
            }
        }
    }

    let accepted: Vec<ForecastSeries> = candidates
        .into_iter()
        .filter(|(_, ts)| {
            let fresh = (now - *ts).num_seconds().abs() < max_age_minutes * 60;
            if !fresh {
                tracing::info!("Discarding forecast retrieved at {}", ts);
            }
            fresh
        })
        .collect();

    fusion::median_forecast(accepted)
}

#[derive(Debug, Deserialize)]
struct SensorDrop {
    temperature: Decimal,
    ts: DateTime<Utc>,
}

/// Reads the latest scalar sample a sensor daemon dropped as JSON.
pub struct FileSource {
    name: String,
    path: PathBuf,
}

impl FileSource {
    pub fn new(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            path,
        }
    }
}

#[async_trait]
impl SourceAdapter for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Option<Reading>, SourceError> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let drop: SensorDrop = serde_json::from_str(&raw)?;
        tracing::info!("{} temp:{} ts:{}", self.name, drop.temperature, drop.ts);
        Ok(Some(Reading::new(drop.temperature, drop.ts)))
    }
}

#[derive(Debug, Deserialize)]
struct ForecastDrop {
    retrieved: DateTime<Utc>,
    hourly: Vec<TempTs>,
    #[serde(default)]
    coarse: Vec<CoarseSpan>,
}

/// Hours a forecast series must cover for the cooling simulation; shorter
/// drops are flat-continued to this horizon.
const FORECAST_HORIZON_HOURS: i64 = 48;

/// Reads an hourly forecast dropped as JSON, merging the optional coarse
/// long-range tail into the hourly series and flat-continuing the last
/// temperature when the tail falls short of the horizon.
pub struct FileForecastSource {
    name: String,
    path: PathBuf,
}

impl FileForecastSource {
    pub fn new(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            path,
        }
    }
}

#[async_trait]
impl ForecastAdapter for FileForecastSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Option<ForecastSeries>, SourceError> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let drop: ForecastDrop = serde_json::from_str(&raw)?;
        let merged = extend_flat(
            extend_with_coarse(drop.hourly, &drop.coarse),
            drop.retrieved + Duration::hours(FORECAST_HORIZON_HOURS),
        );
        crate::forecast::log_forecast(&self.name, &merged);
        Ok(Some((merged, drop.retrieved)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap()
    }

    struct ScriptedSource {
        name: String,
        script: Mutex<Vec<Result<Option<Reading>, SourceError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(name: &str, script: Vec<Result<Option<Reading>, SourceError>>) -> Self {
            Self {
                name: name.to_string(),
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SourceAdapter for ScriptedSource {
        fn name(&self) -> &str {
            &self.name
        }

        async fn fetch(&self) -> Result<Option<Reading>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                Ok(None)
            } else {
                script.remove(0)
            }
        }
    }

    fn config() -> CacheConfig {
        CacheConfig::default()
    }

    #[tokio::test]
    async fn test_cache_hit_skips_the_adapter() {
        let clock = ManualClock::new(base());
        let mut cache = StalenessCache::new();
        let reading = Reading::new(dec!(4), base());
        let adapters: Vec<Box<dyn SourceAdapter>> = vec![Box::new(ScriptedSource::new(
            "outside",
            vec![Ok(Some(reading.clone()))],
        ))];

        let first = fused_reading(
            &mut cache,
            &config(),
            &clock,
            &adapters,
            60,
            std::time::Duration::from_secs(1),
        )
        .await;
        assert_eq!(first, Some(reading.clone()));

        // Second cycle inside the ok window: the scripted source is empty
        // now, so a real call would return nothing.
        clock.advance(Duration::minutes(5));
        let second = fused_reading(
            &mut cache,
            &config(),
            &clock,
            &adapters,
            60,
            std::time::Duration::from_secs(1),
        )
        .await;
        assert_eq!(second, Some(reading));
    }

    #[tokio::test]
    async fn test_failed_channel_survives_ok_expiry() {
        let clock = ManualClock::new(base());
        let mut cache = StalenessCache::new();
        let reading = Reading::new(dec!(4), base());
        let source = ScriptedSource::new(
            "outside",
            vec![
                Ok(Some(reading.clone())),
                Err(SourceError::Timeout),
                Err(SourceError::Timeout),
            ],
        );
        let adapters: Vec<Box<dyn SourceAdapter>> = vec![Box::new(source)];

        let first = fused_reading(
            &mut cache,
            &config(),
            &clock,
            &adapters,
            24 * 60,
            std::time::Duration::from_secs(1),
        )
        .await;
        assert_eq!(first, Some(reading.clone()));

        // Past the ok TTL (60 min) but within the failed TTL (120 min): the
        // source now fails, the old payload is reused verbatim.
        clock.advance(Duration::minutes(90));
        let second = fused_reading(
            &mut cache,
            &config(),
            &clock,
            &adapters,
            24 * 60,
            std::time::Duration::from_secs(1),
        )
        .await;
        assert_eq!(second, Some(reading));

        // Past the failed TTL too: nothing left.
        clock.advance(Duration::minutes(60));
        let third = fused_reading(
            &mut cache,
            &config(),
            &clock,
            &adapters,
            24 * 60,
            std::time::Duration::from_secs(1),
        )
        .await;
        assert_eq!(third, None);
    }

    #[tokio::test]
    async fn test_stale_reading_is_discarded_before_fusion() {
        let clock = ManualClock::new(base());
        let mut cache = StalenessCache::new();
        let fresh = Reading::new(dec!(4), base() - Duration::minutes(10));
        let stale = Reading::new(dec!(-20), base() - Duration::minutes(90));
        let adapters: Vec<Box<dyn SourceAdapter>> = vec![
            Box::new(ScriptedSource::new("a", vec![Ok(Some(fresh.clone()))])),
            Box::new(ScriptedSource::new("b", vec![Ok(Some(stale))])),
        ];

        let fused = fused_reading(
            &mut cache,
            &config(),
            &clock,
            &adapters,
            60,
            std::time::Duration::from_secs(1),
        )
        .await;
        assert_eq!(fused, Some(fresh));
    }

    #[tokio::test]
    async fn test_all_sources_failing_yields_nothing() {
        let clock = ManualClock::new(base());
        let mut cache = StalenessCache::new();
        let adapters: Vec<Box<dyn SourceAdapter>> = vec![
            Box::new(ScriptedSource::new("a", vec![Err(SourceError::Timeout)])),
            Box::new(ScriptedSource::new("b", vec![Ok(None)])),
        ];

        let fused = fused_reading(
            &mut cache,
            &config(),
            &clock,
            &adapters,
            60,
            std::time::Duration::from_secs(1),
        )
        .await;
        assert_eq!(fused, None);
    }

    #[tokio::test]
    async fn test_file_source_reads_sensor_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outside.json");
        tokio::fs::write(
            &path,
            r#"{"temperature": "3.5", "ts": "2026-01-10T12:00:00Z"}"#,
        )
        .await
        .unwrap();

        let source = FileSource::new("outside", path);
        let reading = source.fetch().await.unwrap().unwrap();
        assert_eq!(reading.temp, dec!(3.5));
        assert_eq!(reading.ts, Some(base()));
    }

    #[tokio::test]
    async fn test_file_forecast_source_merges_coarse_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forecast.json");
        tokio::fs::write(
            &path,
            r#"{
                "retrieved": "2026-01-10T12:00:00Z",
                "hourly": [
                    {"temp": "-1", "ts": "2026-01-10T13:00:00Z"},
                    {"temp": "-2", "ts": "2026-01-10T14:00:00Z"}
                ],
                "coarse": [
                    {"temp": "-6", "until": "2026-01-10T16:00:00Z"}
                ]
            }"#,
        )
        .await
        .unwrap();

        let source = FileForecastSource::new("forecast", path);
        let (points, retrieved) = source.fetch().await.unwrap().unwrap();
        assert_eq!(retrieved, base());
        // Hourly 13-14h, coarse to 16h, then flat continuation of the coarse
        // temperature out to the 48 h horizon.
        assert_eq!(points.len(), 48);
        assert_eq!(points[2].temp, dec!(-6));
        assert_eq!(points[3].temp, dec!(-6));
        let last = points.last().unwrap();
        assert_eq!(last.temp, dec!(-6));
        assert_eq!(last.ts, base() + Duration::hours(48));
    }

    #[tokio::test]
    async fn test_missing_file_is_an_absorbed_failure() {
        let source = FileSource::new("outside", PathBuf::from("/nonexistent/outside.json"));
        assert!(source.fetch().await.is_err());
    }
}
