// src/decision.rs - Error shaping and mapping controller output to a
// discrete command.
use crate::command::Command;
use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;

/// Control error with a one-sided hysteresis band: a measured temperature
/// within `hysteresis` degrees above target reads as zero error, while
/// temperatures below target are not softened.
pub fn control_error(
    target_inside_temp: Decimal,
    inside_temp: Option<Decimal>,
    hysteresis: Decimal,
) -> Option<Decimal> {
    inside_temp.map(|inside| {
        let mut error = target_inside_temp - inside;
        error -= error.min(Decimal::ZERO).max(-hysteresis);
        error
    })
}

/// Temperature-only heating law for when no inside reading exists:
/// quadratic in the outside/target difference, bounded to the command
/// table's heating range.
pub fn control_without_inside_temp(outside_temp: Decimal, target_inside_temp: Decimal) -> Decimal {
    let diff = (outside_temp - target_inside_temp).abs();
    let control = dec!(3) + diff * diff * dec!(0.03) + diff * dec!(0.2);
    control
        .min(Command::highest_heating_output())
        .max(Command::lowest_heating_output())
}

/// Inverse Magnus formula: the temperature at which air with the given dew
/// point reaches `relative_humidity` (as a fraction).
pub fn temperature_at_rh(dew_point: Decimal, relative_humidity: Decimal) -> Decimal {
    let a = dec!(243.04);
    let b = dec!(17.625);
    let rh_log = relative_humidity.ln();
    let gamma = (b * dew_point) / (a + dew_point);
    a * (gamma - rh_log) / (b + rh_log - gamma)
}

/// Choose the next command. With an inside reading the controller output
/// decides; otherwise fall back to the temperature-only law, except that an
/// unreliable outside estimate in summer means off.
pub fn next_command(
    valid_time: bool,
    inside_temp: Option<Decimal>,
    outside_temp: Decimal,
    valid_outside: bool,
    target_inside_temp: Decimal,
    controller_output: Decimal,
    month: u32,
) -> Command {
    if inside_temp.is_some() {
        return Command::from_controller(controller_output);
    }

    let is_summer = valid_time && (5..=9).contains(&month);

    if (valid_outside && outside_temp < target_inside_temp) || (!valid_outside && !is_summer) {
        Command::from_controller(control_without_inside_temp(
            outside_temp,
            target_inside_temp,
        ))
    } else {
        Command::Off
    }
}

/// Ordered status classification for the audit trail.
pub fn classify_status(
    valid_time: bool,
    has_forecast: bool,
    valid_outside: bool,
    inside_temp: Option<Decimal>,
    target_inside_temp: Decimal,
    controller_i_at_max: bool,
) -> String {
    let mut status: Vec<&str> = Vec::new();

    if !valid_time {
        status.push("no valid time");
    }
    if !has_forecast {
        status.push("no forecast");
    }
    if !valid_outside {
        status.push("no outside temp");
    }
    match inside_temp {
        None => status.push("no inside temp"),
        Some(inside) if inside <= target_inside_temp - Decimal::ONE => {
            status.push("inside is 1 degree or more below target");
        }
        Some(_) => {}
    }
    if controller_i_at_max {
        status.push("controller i term at max");
    }
    if status.is_empty() {
        status.push("ok");
    }

    status.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hysteresis_absorbs_small_overshoot() {
        // 0.4 above target inside a 0.5 band reads as zero error.
        assert_eq!(
            control_error(dec!(20), Some(dec!(20.4)), dec!(0.5)),
            Some(Decimal::ZERO)
        );
        // 0.6 above target leaks only the part past the band.
        assert_eq!(
            control_error(dec!(20), Some(dec!(20.6)), dec!(0.5)),
            Some(dec!(-0.1))
        );
    }

    #[test]
    fn test_hysteresis_never_softens_cold_side() {
        assert_eq!(
            control_error(dec!(20), Some(dec!(18)), dec!(0.5)),
            Some(dec!(2))
        );
    }

    #[test]
    fn test_error_absent_without_inside_reading() {
        assert_eq!(control_error(dec!(20), None, dec!(0.5)), None);
    }

    #[test]
    fn test_fallback_law_is_bounded() {
        assert_eq!(control_without_inside_temp(dec!(19), dec!(20)), dec!(8));
        assert_eq!(control_without_inside_temp(dec!(-40), dec!(20)), dec!(24));
        // diff 20: 3 + 0.03*400 + 0.2*20 = 19.
        assert_eq!(control_without_inside_temp(Decimal::ZERO, dec!(20)), dec!(19));
    }

    #[test]
    fn test_next_command_prefers_controller_when_inside_known() {
        let command = next_command(true, Some(dec!(19)), dec!(-5), true, dec!(20), dec!(9), 1);
        assert_eq!(command, Command::Heat10);
    }

    #[test]
    fn test_next_command_blind_summer_is_off() {
        let command = next_command(true, None, dec!(15), false, dec!(20), Decimal::ZERO, 7);
        assert_eq!(command, Command::Off);
    }

    #[test]
    fn test_next_command_blind_winter_uses_fallback_law() {
        let command = next_command(true, None, dec!(15), false, dec!(20), Decimal::ZERO, 12);
        assert_ne!(command, Command::Off);
    }

    #[test]
    fn test_next_command_warm_outside_is_off() {
        let command = next_command(true, None, dec!(25), true, dec!(20), Decimal::ZERO, 12);
        assert_eq!(command, Command::Off);
    }

    #[test]
    fn test_temperature_at_rh_is_above_dew_point() {
        let frost = temperature_at_rh(dec!(-5), dec!(0.7));
        // Air at 70 % RH is warmer than its dew point.
        assert!(frost > dec!(-5), "frost {}", frost);
        assert!(frost < dec!(5), "frost {}", frost);
    }

    #[test]
    fn test_status_classification_order() {
        let status = classify_status(false, false, true, None, dec!(20), true);
        assert_eq!(
            status,
            "no valid time, no forecast, no inside temp, controller i term at max"
        );
        assert_eq!(
            classify_status(true, true, true, Some(dec!(20)), dec!(20), false),
            "ok"
        );
        assert_eq!(
            classify_status(true, true, true, Some(dec!(18.5)), dec!(20), false),
            "inside is 1 degree or more below target"
        );
    }
}
