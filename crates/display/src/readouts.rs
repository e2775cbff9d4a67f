use log::trace;
use std::ops::Index;
use std::time::Duration;

use model::{Reading, TelemetrySnapshot};
use preflight_core::AttitudeState;

use crate::{format, PLACEHOLDER};

/// Stable logical names of the text readouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Altimeter,
    AltimeterAgl,
    Voltage,
    Current,
    AttitudeRoll,
    AttitudePitch,
    AttitudeYaw,
    ControlRoll,
    ControlPitch,
    ControlYaw,
    ControlThrottle,
    ControlArm,
    ControlMode,
    Rssi1,
    Rssi2,
    LinkQuality,
    Snr,
    TxPower,
    LinkStatus,
}

impl Field {
    pub const COUNT: usize = 19;

    pub const ALL: [Field; Field::COUNT] = [
        Field::Altimeter,
        Field::AltimeterAgl,
        Field::Voltage,
        Field::Current,
        Field::AttitudeRoll,
        Field::AttitudePitch,
        Field::AttitudeYaw,
        Field::ControlRoll,
        Field::ControlPitch,
        Field::ControlYaw,
        Field::ControlThrottle,
        Field::ControlArm,
        Field::ControlMode,
        Field::Rssi1,
        Field::Rssi2,
        Field::LinkQuality,
        Field::Snr,
        Field::TxPower,
        Field::LinkStatus,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Field::Altimeter => "altimeter",
            Field::AltimeterAgl => "altimeter-agl",
            Field::Voltage => "voltage",
            Field::Current => "current",
            Field::AttitudeRoll => "attitude-roll",
            Field::AttitudePitch => "attitude-pitch",
            Field::AttitudeYaw => "attitude-yaw",
            Field::ControlRoll => "control-roll",
            Field::ControlPitch => "control-pitch",
            Field::ControlYaw => "control-yaw",
            Field::ControlThrottle => "control-throttle",
            Field::ControlArm => "control-arm",
            Field::ControlMode => "control-mode",
            Field::Rssi1 => "rssi-1",
            Field::Rssi2 => "rssi-2",
            Field::LinkQuality => "link-quality",
            Field::Snr => "snr",
            Field::TxPower => "tx-power",
            Field::LinkStatus => "link-status",
        }
    }

    pub fn from_name(name: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|f| f.name() == name)
    }
}

/// Display text for every [`Field`], in `Field::ALL` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readouts {
    values: [String; Field::COUNT],
}

impl Readouts {
    fn filled(text: &str) -> Self {
        Self { values: std::array::from_fn(|_| text.to_owned()) }
    }

    fn set(&mut self, field: Field, text: String) {
        self.values[field as usize] = text;
    }

    pub fn get(&self, field: Field) -> &str {
        &self.values[field as usize]
    }

    pub fn entries(&self) -> impl Iterator<Item = (Field, &str)> + '_ {
        Field::ALL.into_iter().map(move |f| (f, self.get(f)))
    }

    /// Fields whose text differs from `prev`.
    pub fn changed_since<'a>(&'a self, prev: &'a Readouts) -> impl Iterator<Item = (Field, &'a str)> + 'a {
        self.entries().filter(move |(f, text)| prev.get(*f) != *text)
    }
}

impl Index<Field> for Readouts {
    type Output = str;

    fn index(&self, field: Field) -> &str {
        self.get(field)
    }
}

const UNAVAILABLE: &str = "unavailable";

fn reading(r: &Reading, precision: u32) -> String {
    match r {
        Reading::Available(v) => format(f64::from(*v), precision),
        Reading::Unavailable { .. } => UNAVAILABLE.to_owned(),
    }
}

fn age(d: Duration) -> String {
    format(d.as_secs_f64(), 1)
}

/// Text readouts for `state`. Pure: equal states give equal readouts.
pub fn project(state: &AttitudeState) -> Readouts {
    let mut out = match state.snapshot() {
        Some(snap) => from_snapshot(snap),
        None => Readouts::filled(PLACEHOLDER),
    };
    let status = match state {
        AttitudeState::NeverReceived => "waiting".to_owned(),
        AttitudeState::Latest(_) => "ok".to_owned(),
        AttitudeState::Stale { last_good: Some(_), failures, age: a } => {
            format!("stale {}s ({failures} failed)", age(*a))
        }
        AttitudeState::Stale { last_good: None, failures, .. } => format!("no data ({failures} failed)"),
    };
    out.set(Field::LinkStatus, status);
    out
}

fn from_snapshot(s: &TelemetrySnapshot) -> Readouts {
    let mut out = Readouts::filled(PLACEHOLDER);
    let euler = s.attitude.to_euler();
    let ctl = &s.controls;
    let link = &s.link;

    out.set(Field::Altimeter, reading(&s.altimeter, 2));
    out.set(Field::AltimeterAgl, reading(&s.altimeter_agl, 2));
    out.set(Field::Voltage, format(f64::from(s.battery.voltage), 2));
    out.set(Field::Current, format(f64::from(s.battery.current), 2));
    out.set(Field::AttitudeRoll, format(f64::from(euler.roll.to_degrees()), 1));
    out.set(Field::AttitudePitch, format(f64::from(euler.pitch.to_degrees()), 1));
    out.set(Field::AttitudeYaw, format(f64::from(euler.yaw.to_degrees()), 1));
    out.set(Field::ControlRoll, format(f64::from(ctl.roll), 2));
    out.set(Field::ControlPitch, format(f64::from(ctl.pitch), 2));
    out.set(Field::ControlYaw, format(f64::from(ctl.yaw), 2));
    out.set(Field::ControlThrottle, format(f64::from(ctl.throttle), 2));
    out.set(Field::ControlArm, ctl.arm_status.to_string());
    out.set(Field::ControlMode, ctl.input_mode.to_string());
    out.set(Field::Rssi1, dbm(link.rssi_1));
    out.set(Field::Rssi2, dbm(link.rssi_2));
    out.set(Field::LinkQuality, link.link_quality_pct.to_string());
    out.set(Field::Snr, link.snr.to_string());
    out.set(Field::TxPower, link.tx_power.label().to_owned());
    out
}

/// The receiver reports the magnitude of a negative dBm value.
fn dbm(magnitude: u8) -> String {
    if magnitude == 0 {
        "0".to_owned()
    } else {
        format!("-{magnitude}")
    }
}

/// Display surface for text readouts.
pub trait ReadoutSink: Send {
    /// `changed` lists, in field order, every field whose text differs from
    /// the previous update. The first update lists all fields.
    fn update(&mut self, changed: &[(Field, &str)]);
}

/// Projects states and pushes only the differences to a sink.
pub struct ReadoutPump<S> {
    sink: S,
    last: Option<Readouts>,
}

impl<S: ReadoutSink> ReadoutPump<S> {
    pub fn new(sink: S) -> Self {
        Self { sink, last: None }
    }

    /// Returns how many fields changed.
    pub fn refresh(&mut self, state: &AttitudeState) -> usize {
        let next = project(state);
        let changed: Vec<(Field, &str)> = match &self.last {
            Some(prev) => next.changed_since(prev).collect(),
            None => next.entries().collect(),
        };
        let n = changed.len();
        if n > 0 {
            trace!("{n} readouts changed");
            self.sink.update(&changed);
        }
        drop(changed);
        self.last = Some(next);
        n
    }

    pub fn current(&self) -> Option<&Readouts> {
        self.last.as_ref()
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{ArmStatus, Battery, Controls, InputMode, LinkStats, Quaternion, TxPower};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn snapshot(alt: f32) -> TelemetrySnapshot {
        TelemetrySnapshot {
            attitude: Quaternion::IDENTITY,
            altimeter: Reading::Available(alt),
            altimeter_agl: Reading::Unavailable { reason: Some("no rangefinder".into()) },
            battery: Battery { voltage: 11.9, current: 0.4 },
            controls: Controls {
                roll: 0.0,
                pitch: 0.25,
                yaw: -0.5,
                throttle: -1.0,
                arm_status: ArmStatus::Disarmed,
                input_mode: InputMode::Acro,
            },
            link: LinkStats { rssi_1: 48, rssi_2: 51, link_quality_pct: 100, snr: 9, tx_power: TxPower::from_code(2) },
        }
    }

    #[derive(Default)]
    struct Log(Vec<Vec<(Field, String)>>);

    impl ReadoutSink for Log {
        fn update(&mut self, changed: &[(Field, &str)]) {
            self.0.push(changed.iter().map(|(f, t)| (*f, t.to_string())).collect());
        }
    }

    #[test]
    fn names_are_unique_and_round_trip() {
        for f in Field::ALL {
            assert_eq!(Field::from_name(f.name()), Some(f));
        }
        assert_eq!(Field::from_name("airspeed"), None);
    }

    #[test]
    fn placeholders_before_any_data() {
        let r = project(&AttitudeState::NeverReceived);
        assert_eq!(&r[Field::Altimeter], PLACEHOLDER);
        assert_eq!(&r[Field::ControlArm], PLACEHOLDER);
        assert_eq!(&r[Field::LinkStatus], "waiting");
    }

    #[test]
    fn projects_a_fresh_snapshot() {
        let r = project(&AttitudeState::Latest(Arc::new(snapshot(12.345))));
        assert_eq!(&r[Field::Altimeter], "12.35");
        assert_eq!(&r[Field::AltimeterAgl], "unavailable");
        assert_eq!(&r[Field::Voltage], "11.90");
        assert_eq!(&r[Field::ControlThrottle], "-1.00");
        assert_eq!(&r[Field::ControlArm], "Disarmed");
        assert_eq!(&r[Field::ControlMode], "Acro");
        assert_eq!(&r[Field::Rssi1], "-48");
        assert_eq!(&r[Field::LinkQuality], "100");
        assert_eq!(&r[Field::TxPower], "25mW");
        assert_eq!(&r[Field::AttitudeRoll], "0.0");
        assert_eq!(&r[Field::LinkStatus], "ok");
    }

    #[test]
    fn zero_rssi_has_no_sign() {
        let mut s = snapshot(1.0);
        s.link.rssi_1 = 0;
        let r = project(&AttitudeState::Latest(Arc::new(s)));
        assert_eq!(&r[Field::Rssi1], "0");
        assert_eq!(&r[Field::Rssi2], "-51");
    }

    #[test]
    fn stale_keeps_last_values() {
        let fresh = project(&AttitudeState::Latest(Arc::new(snapshot(3.0))));
        let stale = project(&AttitudeState::Stale {
            last_good: Some(Arc::new(snapshot(3.0))),
            failures: 3,
            age: Duration::from_millis(300),
        });
        let changed: Vec<_> = stale.changed_since(&fresh).collect();
        assert_eq!(changed, vec![(Field::LinkStatus, "stale 0.3s (3 failed)")]);

        let empty = project(&AttitudeState::Stale { last_good: None, failures: 2, age: Duration::from_millis(200) });
        assert_eq!(&empty[Field::Altimeter], PLACEHOLDER);
        assert_eq!(&empty[Field::LinkStatus], "no data (2 failed)");
    }

    #[test]
    fn pump_sends_only_differences() {
        let mut pump = ReadoutPump::new(Log::default());
        assert_eq!(pump.refresh(&AttitudeState::Latest(Arc::new(snapshot(1.0)))), Field::ALL.len());
        // identical snapshot: nothing to redraw
        assert_eq!(pump.refresh(&AttitudeState::Latest(Arc::new(snapshot(1.0)))), 0);
        assert_eq!(pump.refresh(&AttitudeState::Latest(Arc::new(snapshot(2.0)))), 1);

        let log = pump.into_sink();
        assert_eq!(log.0.len(), 2);
        assert_eq!(log.0[1], vec![(Field::Altimeter, "2.00".to_string())]);
    }

    proptest! {
        #[test]
        fn unknown_tx_codes_label_quietly(code in any::<u8>()) {
            let label = TxPower::from_code(code).label();
            match code {
                1 | 2 | 3 | 7 | 8 => prop_assert!(label.ends_with("mW")),
                _ => prop_assert_eq!(label, "(unknown)"),
            }
        }

        #[test]
        fn projection_is_deterministic(alt in -500f32..10_000.0, v in 0f32..30.0) {
            let mut s = snapshot(alt);
            s.battery.voltage = v;
            let a = project(&AttitudeState::Latest(Arc::new(s.clone())));
            let b = project(&AttitudeState::Latest(Arc::new(s)));
            prop_assert_eq!(a, b);
        }
    }
}
