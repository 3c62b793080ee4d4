// src/controller.rs - PID control law with trend-gated integral and
// anti-windup clamping.
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Rolling window kept for the error trend regression, hours.
const PAST_ERROR_WINDOW_HOURS: i64 = 3;
/// Regression is meaningless below this sample span, minutes.
const MIN_SLOPE_SPAN_MINUTES: i64 = 30;
/// A positive error with the hourly slope below this is already correcting
/// itself; accumulating integral would overshoot.
const SELF_CORRECTING_SLOPE: Decimal = dec!(-0.05);

pub struct Controller {
    kp: Decimal,
    ki: Decimal,
    kd: Decimal,
    integral: Decimal,
    i_low_limit: Decimal,
    i_high_limit: Decimal,
    last_update_time: Option<DateTime<Utc>>,
    past_errors: Vec<(DateTime<Utc>, Decimal)>,
}

impl Controller {
    pub fn new(kp: Decimal, ki: Decimal, kd: Decimal) -> Self {
        Self {
            kp,
            ki,
            kd,
            integral: Decimal::ZERO,
            i_low_limit: Decimal::ZERO,
            i_high_limit: Decimal::ZERO,
            last_update_time: None,
            past_errors: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.integral = Decimal::ZERO;
        self.last_update_time = None;
        self.reset_past_errors();
    }

    /// Drop the trend samples, e.g. after a target change, so the
    /// derivative does not spike on the discontinuity.
    pub fn reset_past_errors(&mut self) {
        self.past_errors.clear();
    }

    /// No delta-time reference yet; the next update contributes no integral.
    pub fn is_reset(&self) -> bool {
        self.last_update_time.is_none()
    }

    pub fn kd(&self) -> Decimal {
        self.kd
    }

    pub fn integral(&self) -> Decimal {
        self.integral
    }

    /// Restore a checkpointed integral term.
    pub fn set_integral(&mut self, value: Decimal) {
        self.integral = value;
    }

    pub fn integral_at_high_limit(&self) -> bool {
        self.integral >= self.i_high_limit
    }

    pub fn set_i_low_limit(&mut self, value: Decimal) {
        tracing::debug!("controller set i low limit {}", value.round_dp(4));
        self.i_low_limit = value;
    }

    pub fn set_i_high_limit(&mut self, value: Decimal) {
        tracing::debug!("controller set i high limit {}", value.round_dp(4));
        self.i_high_limit = value;
    }

    fn record_past_error(&mut self, error: Decimal, now: DateTime<Utc>) {
        self.past_errors.push((now, error));
        let cutoff = now - Duration::hours(PAST_ERROR_WINDOW_HOURS);
        self.past_errors.retain(|(ts, _)| *ts >= cutoff);
    }

    /// Ordinary least squares over (time, error). Zero when the sample span
    /// is too short or the denominator degenerates.
    fn past_error_slope_per_second(&self) -> Decimal {
        let (first, last) = match (self.past_errors.first(), self.past_errors.last()) {
            (Some(first), Some(last)) => (first.0, last.0),
            _ => return Decimal::ZERO,
        };
        if last - first < Duration::minutes(MIN_SLOPE_SPAN_MINUTES) {
            return Decimal::ZERO;
        }

        // Times rebased to the first sample keep the sums small; the slope
        // is invariant under translation.
        let n = Decimal::from(self.past_errors.len() as u64);
        let mut sum_x = Decimal::ZERO;
        let mut sum_y = Decimal::ZERO;
        let mut sum_xy = Decimal::ZERO;
        let mut sum_x2 = Decimal::ZERO;
        for (ts, error) in &self.past_errors {
            let x = Decimal::from((*ts - first).num_milliseconds()) / dec!(1000);
            sum_x += x;
            sum_y += *error;
            sum_xy += x * *error;
            sum_x2 += x * x;
        }
        let divider = n * sum_x2 - sum_x * sum_x;
        if divider == Decimal::ZERO {
            return Decimal::ZERO;
        }
        (n * sum_xy - sum_x * sum_y) / divider
    }

    /// One control update. An absent error contributes zero to the
    /// proportional and derivative terms and records no trend sample.
    /// Returns the output and a term breakdown line for the audit trail.
    pub fn update(
        &mut self,
        error: Option<Decimal>,
        error_without_hysteresis: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> (Decimal, String) {
        let error = match error {
            Some(error) => {
                if let Some(raw) = error_without_hysteresis {
                    self.record_past_error(raw, now);
                }
                error
            }
            None => Decimal::ZERO,
        };

        tracing::debug!("controller error {}", error.round_dp(4));

        let p_term = self.kp * error;

        let error_slope_per_second = self.past_error_slope_per_second();
        let error_slope_per_hour = error_slope_per_second * dec!(3600);

        if let Some(last_update) = self.last_update_time {
            let delta_time = Decimal::from((now - last_update).num_milliseconds()) / dec!(1000);
            tracing::debug!("controller delta_time {}", delta_time.round_dp(4));

            let trend_allows = (error > Decimal::ZERO
                && error_slope_per_hour >= SELF_CORRECTING_SLOPE)
                || (error < Decimal::ZERO && error_slope_per_hour <= Decimal::ZERO);
            if trend_allows {
                let integral_update = self.ki * error * delta_time;
                tracing::info!("Updating integral with {}", integral_update.round_dp(4));
                self.integral += integral_update;
            } else {
                tracing::info!("Not updating integral");
            }
        }
        self.last_update_time = Some(now);

        if self.integral > self.i_high_limit {
            self.integral = self.i_high_limit;
            tracing::debug!("controller integral high limit {}", self.i_high_limit.round_dp(4));
        } else if self.integral < self.i_low_limit {
            // Distinguished: the controller just gave up heating reserve.
            self.integral = self.i_low_limit;
            tracing::debug!("controller integral low limit {}", self.i_low_limit.round_dp(4));
        }

        let i_term = self.integral;
        let d_term = self.kd * error_slope_per_second;
        let output = p_term + i_term + d_term;

        tracing::debug!("controller p_term {}", p_term.round_dp(4));
        tracing::debug!("controller i_term {}", i_term.round_dp(4));
        tracing::debug!("controller d_term {}", d_term.round_dp(4));
        tracing::debug!("controller output {}", output.round_dp(4));

        let breakdown = format!(
            "e {}, p {}, i {} ({}-{}), d {} slope {}, out {}",
            error.round_dp(2),
            p_term.round_dp(2),
            i_term.round_dp(2),
            self.i_low_limit.round_dp(2),
            self.i_high_limit.round_dp(2),
            d_term.round_dp(2),
            error_slope_per_hour.round_dp(2),
            output.round_dp(2)
        );
        (output, breakdown)
    }
}
