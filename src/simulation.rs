// src/simulation.rs - Backward cooling simulation from the buffer horizon.
//
// Walks the outdoor trajectory backward from `now + buffer` to find the
// inside temperature that would decay to the allowed minimum exactly at the
// buffer horizon. Linear cooling model: the hourly drop is proportional to
// the outside/inside difference.
use crate::config::BufferRule;
use crate::forecast::{Forecast, TempTs, forecast_mean};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;

/// Below this outside temperature the compressor derates and the dwelling
/// loses heat about twice as fast for the same difference.
const DERATING_OUTSIDE_TEMP: Decimal = dec!(-17);

fn hours_to_duration(hours: Decimal) -> Duration {
    Duration::milliseconds((hours * dec!(3_600_000)).round().to_i64().unwrap_or(0))
}

fn hours_between(later: DateTime<Utc>, earlier: DateTime<Utc>) -> Decimal {
    Decimal::from((later - earlier).num_milliseconds()) / dec!(3_600_000)
}

fn mean_temp(points: &[TempTs]) -> Decimal {
    let sum: Decimal = points.iter().map(|p| p.temp).sum();
    sum / Decimal::from(points.len() as u64)
}

fn drop_over(outside: Decimal, inside: Decimal, hours: Decimal, rate: Decimal) -> Decimal {
    let mut drop = rate * (outside - inside) * hours;
    if outside <= DERATING_OUTSIDE_TEMP {
        tracing::debug!("Forecast temp <= {}: {}", DERATING_OUTSIDE_TEMP, outside);
        drop *= dec!(2);
    }
    drop
}

/// Resolve the cooling buffer length. A fixed rule is returned as-is; an
/// outdoor-dependent rule is resolved with exactly three fixed-point passes
/// starting from 20 hours, feeding the forecast mean over the current guess
/// back into the rule each pass.
pub fn cooling_time_buffer_resolved(
    rule: &BufferRule,
    outside_temp: Decimal,
    forecast: Option<&Forecast>,
) -> Decimal {
    match rule {
        BufferRule::Fixed { hours } => *hours,
        BufferRule::OutsideLinear { .. } => {
            let mut buffer = dec!(20);
            for _ in 0..3 {
                let mean = forecast_mean(forecast, buffer).unwrap_or(outside_temp);
                buffer = rule.hours_for(mean);
            }
            buffer
        }
    }
}

/// Derive the inside temperature that, held now, would decay to
/// `allowed_min_inside_temp` at `now + buffer_hours` under the forecast
/// outdoor trajectory. The result never goes below `minimum_inside_temp`.
pub fn target_inside_temperature(
    outside: &TempTs,
    allowed_min_inside_temp: Decimal,
    minimum_inside_temp: Decimal,
    forecast: Option<&Forecast>,
    buffer_hours: Decimal,
    cooling_rate: Decimal,
    now: DateTime<Utc>,
) -> Decimal {
    let mut valid_forecast = vec![outside.clone()];
    if let Some(forecast) = forecast {
        for point in &forecast.temps {
            if point.ts > valid_forecast.last().unwrap().ts {
                valid_forecast.push(point.clone());
            }
        }
    }
    valid_forecast.reverse();
    let reversed_forecast = valid_forecast;

    let mut iteration_inside_temp = allowed_min_inside_temp;
    let mut iteration_ts = now + hours_to_duration(buffer_hours);

    // Beyond the forecast the outside temperature is approximated by the
    // mean of the whole trajectory.
    let outside_after_forecast = mean_temp(&reversed_forecast);
    while iteration_ts > reversed_forecast[0].ts {
        let hours_to_forecast_start = hours_between(iteration_ts, reversed_forecast[0].ts);
        let step_hours = hours_to_forecast_start.min(Decimal::ONE);
        iteration_inside_temp -= drop_over(
            outside_after_forecast,
            iteration_inside_temp,
            step_hours,
            cooling_rate,
        );
        iteration_ts -= hours_to_duration(step_hours);
        if iteration_inside_temp < allowed_min_inside_temp {
            iteration_inside_temp = allowed_min_inside_temp;
        }
    }

    // The bound is fixed at phase entry; the walk only ever steps down onto
    // point timestamps, so no later point can become admissible.
    let phase_start_ts = iteration_ts;
    for point in reversed_forecast.iter().filter(|p| p.ts <= phase_start_ts) {
        let step_hours = hours_between(iteration_ts, point.ts);
        iteration_inside_temp -= drop_over(
            point.temp,
            iteration_inside_temp,
            step_hours,
            cooling_rate,
        );
        iteration_ts = point.ts;
        if iteration_inside_temp < allowed_min_inside_temp {
            iteration_inside_temp = allowed_min_inside_temp;
        }
    }

    iteration_inside_temp.max(minimum_inside_temp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::make_forecast;
    use chrono::TimeZone;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap()
    }

    fn constant_forecast(temp: Decimal, hours: i64, now: DateTime<Utc>) -> Forecast {
        let points: Vec<TempTs> = (1..=hours)
            .map(|h| TempTs::new(temp, now + Duration::hours(h)))
            .collect();
        make_forecast(points, now, now, false)
    }

    #[test]
    fn test_target_never_below_hard_floor() {
        let now = base();
        let outside = TempTs::new(dec!(15), now);
        let target = target_inside_temperature(
            &outside,
            dec!(5),
            dec!(10),
            None,
            dec!(20),
            dec!(0.02),
            now,
        );
        assert!(target >= dec!(10));
    }

    #[test]
    fn test_cold_forecast_raises_target_above_allowed_min() {
        let now = base();
        let outside = TempTs::new(dec!(-5), now);
        let forecast = constant_forecast(dec!(-5), 48, now);
        let target = target_inside_temperature(
            &outside,
            dec!(5),
            Decimal::ZERO,
            Some(&forecast),
            dec!(20),
            dec!(0.02),
            now,
        );
        // 20 hours of decay toward -5 from an end state of 5 degrees.
        assert!(target > dec!(5), "target {}", target);
        assert!(target < dec!(12), "target {}", target);
    }

    #[test]
    fn test_deterministic_for_identical_inputs() {
        let now = base();
        let outside = TempTs::new(dec!(-5), now);
        let forecast = constant_forecast(dec!(-5), 48, now);
        let run = || {
            target_inside_temperature(
                &outside,
                dec!(5),
                dec!(10),
                Some(&forecast),
                dec!(20),
                dec!(0.02),
                now,
            )
        };
        let first = run();
        assert_eq!(first, run());
        assert!(first >= dec!(10));
    }

    #[test]
    fn test_extreme_cold_doubles_the_required_reserve() {
        let now = base();
        let mild = target_inside_temperature(
            &TempTs::new(dec!(-10), now),
            dec!(5),
            Decimal::ZERO,
            Some(&constant_forecast(dec!(-10), 48, now)),
            dec!(20),
            dec!(0.02),
            now,
        );
        let extreme = target_inside_temperature(
            &TempTs::new(dec!(-20), now),
            dec!(5),
            Decimal::ZERO,
            Some(&constant_forecast(dec!(-20), 48, now)),
            dec!(20),
            dec!(0.02),
            now,
        );
        assert!(extreme > mild, "extreme {} mild {}", extreme, mild);
    }

    #[test]
    fn test_points_past_the_buffer_horizon_are_ignored() {
        let now = base();
        let outside = TempTs::new(dec!(-5), now);
        let within: Vec<TempTs> = (1..=20)
            .map(|h| TempTs::new(dec!(-5), now + Duration::hours(h)))
            .collect();
        let mut with_tail = within.clone();
        with_tail.extend((21..=30).map(|h| TempTs::new(dec!(30), now + Duration::hours(h))));

        let target_for = |points: Vec<TempTs>| {
            let forecast = make_forecast(points, now, now, false);
            target_inside_temperature(
                &outside,
                dec!(5),
                Decimal::ZERO,
                Some(&forecast),
                dec!(20),
                dec!(0.02),
                now,
            )
        };
        assert_eq!(target_for(within), target_for(with_tail));
    }

    #[test]
    fn test_fixed_buffer_is_returned_verbatim() {
        let rule = BufferRule::Fixed { hours: dec!(14) };
        assert_eq!(cooling_time_buffer_resolved(&rule, dec!(-3), None), dec!(14));
    }

    #[test]
    fn test_linear_buffer_resolves_in_three_passes() {
        let now = base();
        let rule = BufferRule::OutsideLinear {
            base: dec!(10),
            per_degree: dec!(1),
            min_hours: dec!(2),
            max_hours: dec!(48),
        };
        let forecast = constant_forecast(dec!(-5), 48, now);
        // Constant forecast: the mean is -5 whatever the window, so every
        // pass lands on base + 5.
        assert_eq!(
            cooling_time_buffer_resolved(&rule, dec!(-5), Some(&forecast)),
            dec!(15)
        );
        // No forecast: falls back to the outside temperature.
        assert_eq!(cooling_time_buffer_resolved(&rule, dec!(-30), None), dec!(40));
    }
}
