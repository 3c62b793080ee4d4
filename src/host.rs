// src/host.rs - The control cycle: fuse readings, project a target, run the
// controller, pick and transmit a command.
use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

use crate::cache::StalenessCache;
use crate::clock::{Clock, SystemClock};
use crate::command::Command;
use crate::config::{Config, ConfigError};
use crate::controller::Controller;
use crate::decision::{
    classify_status, control_error, next_command, temperature_at_rh,
};
use crate::forecast::{Forecast, TempTs, forecast_mean, log_forecast, make_forecast};
use crate::fusion::{ForecastSeries, Reading};
use crate::notify::{LogNotifier, Notifier};
use crate::simulation::{cooling_time_buffer_resolved, target_inside_temperature};
use crate::sources::{
    FileForecastSource, FileSource, ForecastAdapter, SourceAdapter, fused_forecast, fused_reading,
};
use crate::store::{FileStateStore, StateStore};
use crate::transmit::{CommandTransmitter, SerialTransmitter, TransmitError};

/// A transition into off is suppressed until this much continuous heating
/// has elapsed, to avoid short-cycling the compressor.
const MIN_HEATING_SECONDS: i64 = 3 * 60 * 60;
/// Outdoor icing becomes possible below this temperature.
const FREEZE_RISK_OUTSIDE_TEMP: Decimal = dec!(1);

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Transmit error: {0}")]
    Transmit(#[from] TransmitError),
}

/// Human-readable audit trail; lines are both logged and returned to the
/// caller in computation order.
#[derive(Default)]
struct Audit {
    lines: Vec<String>,
}

impl Audit {
    fn add(&mut self, line: String) {
        tracing::info!("{}", line);
        self.lines.push(line);
    }
}

fn fmt_opt(value: Option<Decimal>, dp: u32) -> String {
    match value {
        Some(value) => value.round_dp(dp).to_string(),
        None => "none".to_string(),
    }
}

pub struct Host {
    config: Config,
    clock: Arc<dyn Clock>,
    temp_cache: StalenessCache<Reading>,
    forecast_cache: StalenessCache<ForecastSeries>,
    controller: Controller,
    outside_sources: Vec<Box<dyn SourceAdapter>>,
    inside_sources: Vec<Box<dyn SourceAdapter>>,
    dew_point_sources: Vec<Box<dyn SourceAdapter>>,
    forecast_sources: Vec<Box<dyn ForecastAdapter>>,
    transmitter: Box<dyn CommandTransmitter>,
    store: Box<dyn StateStore>,
    notifier: Box<dyn Notifier>,
    minimum_inside_temp: Decimal,
    last_command: Option<Command>,
    heating_started: DateTime<Utc>,
    last_status_notified: Option<String>,
}

impl Host {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        clock: Arc<dyn Clock>,
        outside_sources: Vec<Box<dyn SourceAdapter>>,
        inside_sources: Vec<Box<dyn SourceAdapter>>,
        dew_point_sources: Vec<Box<dyn SourceAdapter>>,
        forecast_sources: Vec<Box<dyn ForecastAdapter>>,
        transmitter: Box<dyn CommandTransmitter>,
        store: Box<dyn StateStore>,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        let controller = Controller::new(
            config.controller.kp,
            config.controller.ki,
            config.controller.kd,
        );
        let minimum_inside_temp = config.thermal.minimum_inside_temp;
        let heating_started = clock.now();
        Self {
            config,
            clock,
            temp_cache: StalenessCache::new(),
            forecast_cache: StalenessCache::new(),
            controller,
            outside_sources,
            inside_sources,
            dew_point_sources,
            forecast_sources,
            transmitter,
            store,
            notifier,
            minimum_inside_temp,
            last_command: None,
            heating_started,
            last_status_notified: None,
        }
    }

    /// Wire the production host from configuration: file-drop sensor
    /// adapters, serial IR transmitter, file-backed checkpoint store.
    pub fn from_config(config: Config) -> Result<Self, HostError> {
        let outside = file_sources(&config.sources.outside);
        let inside = file_sources(&config.sources.inside);
        let dew_point = file_sources(&config.sources.dew_point);
        let forecasts: Vec<Box<dyn ForecastAdapter>> = config
            .sources
            .forecast
            .iter()
            .map(|(name, path)| {
                Box::new(FileForecastSource::new(name.clone(), path.clone()))
                    as Box<dyn ForecastAdapter>
            })
            .collect();
        let transmitter =
            SerialTransmitter::open(&config.transmit.device, config.transmit.baud)?;
        let store = FileStateStore::new(config.store.path.clone());
        Ok(Self::new(
            config,
            Arc::new(SystemClock),
            outside,
            inside,
            dew_point,
            forecasts,
            Box::new(transmitter),
            Box::new(store),
            Box::new(LogNotifier),
        ))
    }

    /// Override (or restore) the hard minimum target temperature. Clears
    /// the trend samples so the derivative does not spike on the new
    /// setpoint.
    pub fn set_minimum_inside_temp(&mut self, temp: Option<Decimal>) {
        self.minimum_inside_temp = temp.unwrap_or(self.config.thermal.minimum_inside_temp);
        self.controller.reset_past_errors();
    }

    /// Forget the operating history, e.g. when returning from manual mode.
    /// The next cycle always transmits.
    pub fn clear(&mut self) {
        self.last_command = None;
        self.minimum_inside_temp = self.config.thermal.minimum_inside_temp;
        self.controller.reset();
        self.last_status_notified = None;
    }

    pub fn last_command(&self) -> Option<Command> {
        self.last_command
    }

    async fn fused(
        &mut self,
        sources: SourceKind,
        max_age_minutes: i64,
    ) -> Option<Reading> {
        let timeout = std::time::Duration::from_secs(self.config.sources.fetch_timeout_seconds);
        let adapters = match sources {
            SourceKind::Outside => &self.outside_sources,
            SourceKind::Inside => &self.inside_sources,
            SourceKind::DewPoint => &self.dew_point_sources,
        };
        fused_reading(
            &mut self.temp_cache,
            &self.config.cache,
            self.clock.as_ref(),
            adapters,
            max_age_minutes,
            timeout,
        )
        .await
    }

    async fn get_forecast(&mut self, audit: &mut Audit, valid_time: bool) -> (Option<Forecast>, Option<Decimal>) {
        let timeout = std::time::Duration::from_secs(self.config.sources.fetch_timeout_seconds);
        let fused = fused_forecast(
            &mut self.forecast_cache,
            &self.config.cache,
            self.clock.as_ref(),
            &self.forecast_sources,
            self.config.sources.forecast_max_age_minutes,
            timeout,
        )
        .await;
        let now = self.clock.now();
        let forecast = match fused {
            Some((points, retrieved_at)) => {
                let forecast = make_forecast(points, retrieved_at, now, valid_time);
                log_forecast("fused", &forecast.temps);
                Some(forecast)
            }
            None => {
                tracing::debug!("Forecast none");
                None
            }
        };
        let mean_forecast = forecast_mean(forecast.as_ref(), dec!(24));
        audit.add(format!("Forecast 24 h mean: {}", fmt_opt(mean_forecast, 1)));
        (forecast, mean_forecast)
    }

    async fn get_outside(
        &mut self,
        audit: &mut Audit,
        mean_forecast: Option<Decimal>,
    ) -> (TempTs, bool) {
        let fused = self
            .fused(SourceKind::Outside, self.config.sources.max_age_minutes)
            .await;
        let now = self.clock.now();
        audit.add(format!(
            "Outside temperature: {}",
            fmt_opt(fused.as_ref().map(|r| r.temp), 1)
        ));
        match fused {
            Some(reading) => (TempTs::new(reading.temp, reading.ts.unwrap_or(now)), true),
            None => {
                if let Some(mean) = mean_forecast {
                    audit.add(format!(
                        "Using mean forecast as outside temp: {}",
                        mean.round_dp(1)
                    ));
                    (TempTs::new(mean, now), false)
                } else {
                    let predefined = self.config.thermal.predefined_outside_temp;
                    audit.add(format!("Using predefined outside temperature: {}", predefined));
                    (TempTs::new(predefined, now), false)
                }
            }
        }
    }

    /// One full decision computation. Always yields a command; every
    /// missing input degrades through its fallback instead of failing.
    pub async fn process(&mut self, minimum_inside_temp: Decimal) -> (Command, Vec<String>) {
        let mut audit = Audit::default();
        let valid_time = self.clock.has_valid_time();
        let now = self.clock.now();

        let (forecast, mean_forecast) = self.get_forecast(&mut audit, valid_time).await;
        let (outside, valid_outside) = self.get_outside(&mut audit, mean_forecast).await;

        // The simulation sees the smoothed outdoor level when a forecast
        // exists, not the instantaneous reading.
        let outside_for_target = match mean_forecast {
            Some(mean) => TempTs::new(mean, now),
            None => outside.clone(),
        };

        let buffer_hours = cooling_time_buffer_resolved(
            &self.config.buffer,
            outside_for_target.temp,
            forecast.as_ref(),
        );
        audit.add(format!(
            "Buffer is {} h at {} C",
            buffer_hours.round_dp(1),
            outside_for_target.temp.round_dp(1)
        ));

        let mut target_inside_temp = target_inside_temperature(
            &outside_for_target,
            self.config.thermal.allowed_min_inside_temp,
            minimum_inside_temp,
            forecast.as_ref(),
            buffer_hours,
            self.config.thermal.cooling_rate_per_hour_per_degree,
            now,
        );

        let dew_point = self
            .fused(SourceKind::DewPoint, self.config.sources.dew_point_max_age_minutes)
            .await;
        audit.add(format!(
            "Dew point: {}",
            fmt_opt(dew_point.as_ref().map(|r| r.temp), 1)
        ));

        if let Some(dew) = &dew_point {
            let mould_floor = temperature_at_rh(dew.temp, dec!(0.8));
            audit.add(format!("Temp with 80% RH: {}", mould_floor.round_dp(1)));
            target_inside_temp = target_inside_temp.max(mould_floor);
        }

        audit.add(format!(
            "Target inside temperature: {}",
            target_inside_temp.round_dp(1)
        ));

        let hysteresis = self.config.thermal.hysteresis;
        audit.add(format!(
            "Hysteresis: {} ({})",
            hysteresis.round_dp(1),
            (target_inside_temp + hysteresis).round_dp(1)
        ));

        let inside = self
            .fused(SourceKind::Inside, self.config.sources.max_age_minutes)
            .await;
        let inside_temp = inside.map(|r| r.temp);
        audit.add(format!("Inside temperature: {}", fmt_opt(inside_temp, 1)));

        let error = control_error(target_inside_temp, inside_temp, hysteresis);
        let error_without_hysteresis =
            control_error(target_inside_temp, inside_temp, Decimal::ZERO);

        // Integral limits track the command table so the i term alone can
        // hold a heating level but not run away past its authority, with a
        // margin for the d term at a 0.1 degree/h trend.
        let slope_margin = dec!(0.1) / dec!(3600) * self.controller.kd();
        self.controller
            .set_i_low_limit(Command::lowest_heating_output() - dec!(0.01) - slope_margin);
        self.controller
            .set_i_high_limit(Command::integral_authority_output() + dec!(0.01) + slope_margin);

        let (controller_output, breakdown) =
            self.controller
                .update(error, error_without_hysteresis, now);
        audit.add(format!(
            "Controller: {} ({})",
            controller_output.round_dp(2),
            breakdown
        ));

        let mut command = next_command(
            valid_time,
            inside_temp,
            outside.temp,
            valid_outside,
            target_inside_temp,
            controller_output,
            now.month(),
        );

        // Freeze protection: keep the outside unit warm enough to run its
        // melting cycle when frost can form on it.
        if valid_outside
            && self.last_command.is_some()
            && outside.temp < FREEZE_RISK_OUTSIDE_TEMP
        {
            if let Some(dew) = &dew_point {
                let frost_threshold = temperature_at_rh(dew.temp, dec!(0.7));
                if outside.temp < frost_threshold && self.last_command != Some(Command::Off) {
                    audit.add("Forcing heating".to_string());
                    command = command.max(Command::lowest_heating());
                }
            }
        }

        let status = classify_status(
            valid_time,
            forecast.is_some(),
            valid_outside,
            inside_temp,
            target_inside_temp,
            self.controller.integral_at_high_limit(),
        );
        audit.add(format!("Status: {}", status));
        if self.last_status_notified.as_deref() != Some(status.as_str()) {
            if self.last_status_notified.is_some() {
                self.notifier.notify("Status", &status).await;
            }
            self.last_status_notified = Some(status);
        }

        (command, audit.lines)
    }

    /// One scheduled invocation: restore state if needed, compute, apply
    /// the command-change suppression, transmit, checkpoint.
    pub async fn run_cycle(&mut self) -> Command {
        if self.controller.is_reset() {
            match self.store.load().await {
                Ok(Some(integral)) => {
                    tracing::info!("Restored controller integral {}", integral.round_dp(4));
                    self.controller.set_integral(integral);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Failed to load controller state: {}", e),
            }
        }

        let minimum_inside_temp = self.minimum_inside_temp;
        let (command, mut extra_info) = self.process(minimum_inside_temp).await;

        let now = self.clock.now();
        let seconds_since_heating_start = (now - self.heating_started).num_seconds();
        if let Some(last) = self.last_command {
            if last != Command::Off {
                tracing::debug!(
                    "Heating started {} hours ago",
                    seconds_since_heating_start / 3600
                );
            }
        }

        let should_send = match self.last_command {
            None => true,
            Some(last) => {
                command != last
                    && (command != Command::Off
                        || seconds_since_heating_start > MIN_HEATING_SECONDS)
            }
        };

        if should_send {
            let was_heating = self
                .last_command
                .map(|c| c != Command::Off)
                .unwrap_or(false);
            if !was_heating && command != Command::Off {
                self.heating_started = now;
            }
            self.last_command = Some(command);
            if let Err(e) = self.transmitter.send(command, &extra_info).await {
                tracing::warn!("Failed to transmit {}: {}", command, e);
                self.notifier
                    .notify("Transmit failed", &format!("{}: {}", command, e))
                    .await;
            }
        }

        let actual = format!(
            "Actual last command: {}",
            self.last_command
                .map(|c| c.to_string())
                .unwrap_or_else(|| "none".to_string())
        );
        tracing::info!("{}", actual);
        extra_info.push(actual);

        if let Err(e) = self.store.save(self.controller.integral()).await {
            tracing::warn!("Failed to save controller state: {}", e);
        }

        command
    }
}

enum SourceKind {
    Outside,
    Inside,
    DewPoint,
}

fn file_sources(
    paths: &std::collections::HashMap<String, std::path::PathBuf>,
) -> Vec<Box<dyn SourceAdapter>> {
    paths
        .iter()
        .map(|(name, path)| {
            Box::new(FileSource::new(name.clone(), path.clone())) as Box<dyn SourceAdapter>
        })
        .collect()
}
