//! Decoder for the `/api/data` response body.
//!
//! A snapshot comes out of here whole or not at all: every field is parsed
//! and validated before the `TelemetrySnapshot` is built.

use serde::Deserialize;
use serde_json::error::Category;

use crate::*;

#[derive(Deserialize)]
struct WireSnapshot {
    #[serde(alias = "attitude")]
    attitude_quat: WireQuat,
    // required key; only an explicit null or tag marks it unavailable
    #[serde(deserialize_with = "nullable")]
    altimeter: Option<WireReading>,
    #[serde(default)]
    altimeter_agl: Option<WireReading>,
    batt_v: f32,
    current: f32,
    controls: WireControls,
    link_stats: WireLinkStats,
}

#[derive(Deserialize)]
struct WireQuat {
    w: f32,
    x: f32,
    y: f32,
    z: f32,
}

/// Sensor values arrive either bare or tagged `{"Ok": v}` / `"Unavailable"` / `{"Error": msg}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireReading {
    Plain(f32),
    Tagged(TaggedReading),
}

#[derive(Deserialize)]
enum TaggedReading {
    Ok(f32),
    Unavailable,
    Error(String),
}

#[derive(Deserialize)]
struct WireControls {
    roll: f32,
    pitch: f32,
    yaw: f32,
    throttle: f32,
    arm_status: ArmStatus,
    input_mode: InputMode,
}

#[derive(Deserialize)]
struct WireLinkStats {
    uplink_rssi_1: u8,
    uplink_rssi_2: u8,
    uplink_link_quality: u8,
    uplink_snr: i8,
    uplink_tx_power: u8,
}

/// `Option` without serde's implicit "missing means `None`".
fn nullable<'de, D>(d: D) -> Result<Option<WireReading>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::deserialize(d)
}

pub fn decode_snapshot(body: &[u8]) -> Result<TelemetrySnapshot, SchemaError> {
    let wire: WireSnapshot = serde_json::from_slice(body).map_err(classify)?;
    wire.validate()
}

fn classify(e: serde_json::Error) -> SchemaError {
    match e.classify() {
        Category::Data => SchemaError::Mismatch(e.to_string()),
        Category::Syntax | Category::Eof | Category::Io => SchemaError::Malformed(e.to_string()),
    }
}

impl WireSnapshot {
    fn validate(self) -> Result<TelemetrySnapshot, SchemaError> {
        let c = self.controls;
        let l = self.link_stats;
        if l.uplink_link_quality > 100 {
            return Err(SchemaError::OutOfRange {
                field: "link_stats.uplink_link_quality",
                value: l.uplink_link_quality as f32,
                min: 0.0,
                max: 100.0,
            });
        }
        Ok(TelemetrySnapshot {
            attitude: unit_attitude(self.attitude_quat)?,
            altimeter: reading("altimeter", self.altimeter)?,
            altimeter_agl: reading("altimeter_agl", self.altimeter_agl)?,
            battery: Battery {
                voltage: finite("batt_v", self.batt_v)?,
                current: finite("current", self.current)?,
            },
            controls: Controls {
                roll: bounded("controls.roll", c.roll, -1.0, 1.0)?,
                pitch: bounded("controls.pitch", c.pitch, -1.0, 1.0)?,
                yaw: bounded("controls.yaw", c.yaw, -1.0, 1.0)?,
                throttle: bounded("controls.throttle", c.throttle, -1.0, 1.0)?,
                arm_status: c.arm_status,
                input_mode: c.input_mode,
            },
            link: LinkStats {
                rssi_1: l.uplink_rssi_1,
                rssi_2: l.uplink_rssi_2,
                link_quality_pct: l.uplink_link_quality,
                snr: l.uplink_snr,
                tx_power: TxPower::from_code(l.uplink_tx_power),
            },
        })
    }
}

/// Near-unit attitudes are renormalized; anything further off is refused.
fn unit_attitude(q: WireQuat) -> Result<Quaternion, SchemaError> {
    let raw = Quaternion::new(q.w, q.x, q.y, q.z);
    let norm = raw.norm();
    if !norm.is_finite() || (norm - 1.0).abs() > UNIT_NORM_TOLERANCE {
        return Err(SchemaError::NonUnitQuaternion { norm });
    }
    raw.normalized().ok_or(SchemaError::NonUnitQuaternion { norm })
}

fn reading(field: &'static str, r: Option<WireReading>) -> Result<Reading, SchemaError> {
    Ok(match r {
        None | Some(WireReading::Tagged(TaggedReading::Unavailable)) => Reading::Unavailable { reason: None },
        Some(WireReading::Tagged(TaggedReading::Error(msg))) => Reading::Unavailable { reason: Some(msg) },
        Some(WireReading::Plain(v)) | Some(WireReading::Tagged(TaggedReading::Ok(v))) => {
            Reading::Available(finite(field, v)?)
        }
    })
}

fn finite(field: &'static str, v: f32) -> Result<f32, SchemaError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(SchemaError::NonFinite { field })
    }
}

fn bounded(field: &'static str, v: f32, min: f32, max: f32) -> Result<f32, SchemaError> {
    let v = finite(field, v)?;
    if v < min || v > max {
        return Err(SchemaError::OutOfRange { field, value: v, min, max });
    }
    Ok(v)
}
