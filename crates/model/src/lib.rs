//! Value types for one flight-controller telemetry reading.

use serde::{Deserialize, Serialize};
use std::fmt;

mod wire;

pub use wire::decode_snapshot;

/// How far |q| may drift from 1 before a decoded attitude is rejected.
pub const UNIT_NORM_TOLERANCE: f32 = 0.02;

/// Orientation, body-to-world, scalar first.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion { w: 1.0, x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    pub fn norm(&self) -> f32 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Scaled to unit length. `None` for zero or non-finite input.
    pub fn normalized(&self) -> Option<Self> {
        let n = self.norm();
        if !n.is_finite() || n <= f32::EPSILON {
            return None;
        }
        Some(Self { w: self.w / n, x: self.x / n, y: self.y / n, z: self.z / n })
    }

    /// Aerospace ZYX (yaw, pitch, roll) decomposition, radians.
    pub fn to_euler(&self) -> EulerAngles {
        let Quaternion { w, x, y, z } = *self;
        let roll = (2.0 * (w * x + y * z)).atan2(1.0 - 2.0 * (x * x + y * y));
        // clamp: asin is undefined just past the poles
        let pitch = (2.0 * (w * y - z * x)).clamp(-1.0, 1.0).asin();
        let yaw = (2.0 * (w * z + x * y)).atan2(1.0 - 2.0 * (y * y + z * z));
        EulerAngles { roll, pitch, yaw }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct EulerAngles {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

/// A scalar sensor value the flight controller may be unable to supply.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub enum Reading {
    Available(f32),
    Unavailable { reason: Option<String> },
}

impl Reading {
    pub fn value(&self) -> Option<f32> {
        match self {
            Reading::Available(v) => Some(*v),
            Reading::Unavailable { .. } => None,
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct Battery {
    /// Volts.
    pub voltage: f32,
    /// Amps.
    pub current: f32,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub enum ArmStatus {
    #[default]
    Disarmed,
    Armed,
    Fault,
}

impl fmt::Display for ArmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArmStatus::Disarmed => "Disarmed",
            ArmStatus::Armed => "Armed",
            ArmStatus::Fault => "Fault",
        })
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub enum InputMode {
    /// Rate mode.
    #[default]
    Acro,
    /// Command if GPS is present, attitude if not.
    AttitudeCommand,
}

impl fmt::Display for InputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InputMode::Acro => "Acro",
            InputMode::AttitudeCommand => "AttitudeCommand",
        })
    }
}

/// Pilot inputs as seen by the flight controller.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct Controls {
    pub roll: f32,     // -1..1
    pub pitch: f32,    // -1..1
    pub yaw: f32,      // -1..1
    pub throttle: f32, // 0..1, or -1..1 on a self-centering stick
    pub arm_status: ArmStatus,
    pub input_mode: InputMode,
}

/// Uplink transmit power as reported by the receiver.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum TxPower {
    Mw10,
    Mw25,
    Mw50,
    Mw100,
    Mw250,
    Unknown(u8),
}

impl TxPower {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => TxPower::Mw10,
            2 => TxPower::Mw25,
            8 => TxPower::Mw50,
            3 => TxPower::Mw100,
            7 => TxPower::Mw250,
            other => TxPower::Unknown(other),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TxPower::Mw10 => "10mW",
            TxPower::Mw25 => "25mW",
            TxPower::Mw50 => "50mW",
            TxPower::Mw100 => "100mW",
            TxPower::Mw250 => "250mW",
            TxPower::Unknown(_) => "(unknown)",
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct LinkStats {
    /// Antenna 1 RSSI magnitude; the receiver reports -dBm as a positive number.
    pub rssi_1: u8,
    pub rssi_2: u8,
    /// Valid packets out of the last 100.
    pub link_quality_pct: u8,
    pub snr: i8,
    pub tx_power: TxPower,
}

/// One complete, validated telemetry reading.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct TelemetrySnapshot {
    /// Always unit norm.
    pub attitude: Quaternion,
    pub altimeter: Reading,
    pub altimeter_agl: Reading,
    pub battery: Battery,
    pub controls: Controls,
    pub link: LinkStats,
}

/// Motor positions as numbered by the firmware.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Rotor {
    R1,
    R2,
    R3,
    R4,
}

impl Rotor {
    pub const ALL: [Rotor; 4] = [Rotor::R1, Rotor::R2, Rotor::R3, Rotor::R4];

    /// Identifier sent to the server.
    pub fn wire_id(&self) -> u8 {
        match self {
            Rotor::R1 => 0,
            Rotor::R2 => 1,
            Rotor::R3 => 2,
            Rotor::R4 => 3,
        }
    }

    /// Accepts "1".."4" or "R1".."R4".
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let digits = s.strip_prefix(|c: char| c == 'R' || c == 'r').unwrap_or(s);
        match digits {
            "1" => Some(Rotor::R1),
            "2" => Some(Rotor::R2),
            "3" => Some(Rotor::R3),
            "4" => Some(Rotor::R4),
            _ => None,
        }
    }
}

impl fmt::Display for Rotor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.wire_id() + 1)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("malformed JSON: {0}")]
    Malformed(String),
    #[error("response does not match schema: {0}")]
    Mismatch(String),
    #[error("attitude quaternion is not unit norm (|q| = {norm})")]
    NonUnitQuaternion { norm: f32 },
    #[error("{field} = {value} is outside [{min}, {max}]")]
    OutOfRange { field: &'static str, value: f32, min: f32, max: f32 },
    #[error("{field} is not a finite number")]
    NonFinite { field: &'static str },
}
