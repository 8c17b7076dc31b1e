//! A small stand-in for a controller graph, so the bridge has something to
//! export out of the box.

use std::f64::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use dgbridge_types::{
    BridgeError, InternalType, MatrixHomogeneous, Signal, SignalTable, Vector3,
};

/// Oscillator frequency, in Hz.
const OSCILLATOR_HZ: f64 = 0.5;

/// Nominal waist height above the world frame, in metres.
const WAIST_HEIGHT: f64 = 0.8;

/// Signals of the demo graph, computed from the tick and the scheduler
/// period:
///
/// | Name | Type |
/// |---|---|
/// | `time` | scalar, seconds since start |
/// | `tick` | count |
/// | `oscillator` | vector `[sin, cos]` |
/// | `waist` | homogeneous transform swaying along y |
/// | `velocity` | twist, the waist's linear velocity |
pub fn signal_table(period: Duration) -> Result<SignalTable, BridgeError> {
    let dt = period.as_secs_f64();
    let seconds = move |t: i64| t as f64 * dt;
    let phase = move |t: i64| TAU * OSCILLATOR_HZ * seconds(t);

    let mut table = SignalTable::new();
    table.insert(Arc::new(Signal::new("time", seconds)));
    table.insert(Arc::new(Signal::new("tick", |t: i64| {
        u32::try_from(t).unwrap_or(u32::MAX)
    })));
    table.insert(Arc::new(Signal::new("oscillator", move |t: i64| {
        vec![phase(t).sin(), phase(t).cos()]
    })));
    table.insert(Arc::new(Signal::new("waist", move |t: i64| {
        let mut m = MatrixHomogeneous::identity();
        m.set_translation(Vector3::new(0.0, 0.05 * phase(t).sin(), WAIST_HEIGHT));
        m
    })));
    let velocity = Signal::new("velocity", move |t: i64| {
        let vy = 0.05 * TAU * OSCILLATOR_HZ * phase(t).cos();
        vec![0.0, vy, 0.0, 0.0, 0.0, 0.0]
    })
    .declared_as(InternalType::Twist)?;
    table.insert(Arc::new(velocity));
    Ok(table)
}
