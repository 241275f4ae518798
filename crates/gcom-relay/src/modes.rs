//! Vehicle classes, flight modes and their ArduPilot custom-mode numbers.

use std::ops::RangeInclusive;

use gcom_mavlink::dialect::MavType;
use serde::{Deserialize, Serialize};

/// How the relay treats the vehicle. Anything that is not fixed-wing is
/// handled as a multirotor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    #[default]
    Multirotor,
    FixedWing,
}

impl VehicleClass {
    pub fn from_mav_type(mav_type: MavType) -> Self {
        match mav_type {
            MavType::MAV_TYPE_FIXED_WING => VehicleClass::FixedWing,
            _ => VehicleClass::Multirotor,
        }
    }

    /// Accepted target speeds in m/s.
    pub fn speed_range(self) -> RangeInclusive<f64> {
        match self {
            VehicleClass::Multirotor => 0.0..=20.0,
            VehicleClass::FixedWing => 5.0..=100.0,
        }
    }

    /// Only multirotors accept direct takeoff and land commands.
    pub fn supports_vertical_commands(self) -> bool {
        self == VehicleClass::Multirotor
    }
}

/// Logical flight modes offered to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlightMode {
    Stabilize,
    Auto,
    Guided,
    Loiter,
    Rtl,
    AltHold,
    Manual,
}

impl FlightMode {
    /// All modes in operator-facing order.
    pub const ALL: [FlightMode; 7] = [
        FlightMode::Stabilize,
        FlightMode::Auto,
        FlightMode::Guided,
        FlightMode::Loiter,
        FlightMode::Rtl,
        FlightMode::AltHold,
        FlightMode::Manual,
    ];

    /// Mode at position `index` of [`FlightMode::ALL`].
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// ArduPilot custom mode number for this mode on `class`, if it exists there.
    pub fn custom_mode(self, class: VehicleClass) -> Option<u32> {
        match class {
            VehicleClass::Multirotor => copter_mode(self),
            VehicleClass::FixedWing => plane_mode(self),
        }
    }
}

impl std::fmt::Display for FlightMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FlightMode::Stabilize => "STABILIZE",
            FlightMode::Auto => "AUTO",
            FlightMode::Guided => "GUIDED",
            FlightMode::Loiter => "LOITER",
            FlightMode::Rtl => "RTL",
            FlightMode::AltHold => "ALT_HOLD",
            FlightMode::Manual => "MANUAL",
        };
        f.write_str(name)
    }
}

fn copter_mode(mode: FlightMode) -> Option<u32> {
    match mode {
        FlightMode::Stabilize => Some(0),
        FlightMode::AltHold => Some(2),
        FlightMode::Auto => Some(3),
        FlightMode::Guided => Some(4),
        FlightMode::Loiter => Some(5),
        FlightMode::Rtl => Some(6),
        FlightMode::Manual => None,
    }
}

fn plane_mode(mode: FlightMode) -> Option<u32> {
    match mode {
        FlightMode::Manual => Some(0),
        FlightMode::Stabilize => Some(2),
        FlightMode::Auto => Some(10),
        FlightMode::Rtl => Some(11),
        FlightMode::Loiter => Some(12),
        FlightMode::Guided => Some(15),
        FlightMode::AltHold => None,
    }
}
