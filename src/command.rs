// src/command.rs - Discrete heat pump command levels.
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One IR command the pump understands, ordered by heating intensity.
/// `Off` is the minimum of the ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Command {
    Off,
    Heat8,
    Heat10,
    Heat16,
    Heat18,
    Heat20,
    Heat22,
    Heat24,
}

impl Command {
    pub const ALL: [Command; 8] = [
        Command::Off,
        Command::Heat8,
        Command::Heat10,
        Command::Heat16,
        Command::Heat18,
        Command::Heat20,
        Command::Heat22,
        Command::Heat24,
    ];

    /// Rated heating output of the level, in the controller's power scale.
    pub fn rated_output(self) -> Decimal {
        match self {
            Command::Off => Decimal::ZERO,
            Command::Heat8 => dec!(8),
            Command::Heat10 => dec!(10),
            Command::Heat16 => dec!(16),
            Command::Heat18 => dec!(18),
            Command::Heat20 => dec!(20),
            Command::Heat22 => dec!(22),
            Command::Heat24 => dec!(24),
        }
    }

    /// Smallest level whose rated output covers `power`, clamped to the
    /// top of the table.
    pub fn from_controller(power: Decimal) -> Command {
        for command in Command::ALL {
            if command.rated_output() >= power {
                return command;
            }
        }
        Command::Heat24
    }

    /// Lowest level that actually heats.
    pub fn lowest_heating() -> Command {
        Command::Heat8
    }

    /// Rated output of the weakest heating level.
    pub fn lowest_heating_output() -> Decimal {
        Command::Heat8.rated_output()
    }

    /// Rated output of the strongest heating level.
    pub fn highest_heating_output() -> Decimal {
        Command::Heat24.rated_output()
    }

    /// Strongest rating the controller's integral term may hold on its own;
    /// the top levels are reserved for proportional and derivative drive.
    pub fn integral_authority_output() -> Decimal {
        Command::Heat18.rated_output()
    }

    /// Token written to the IR transmitter.
    pub fn token(self) -> &'static str {
        match self {
            Command::Off => "off",
            Command::Heat8 => "heat_8",
            Command::Heat10 => "heat_10",
            Command::Heat16 => "heat_16",
            Command::Heat18 => "heat_18",
            Command::Heat20 => "heat_20",
            Command::Heat22 => "heat_22",
            Command::Heat24 => "heat_24",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}
