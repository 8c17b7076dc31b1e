//! `dgbridge-types` – shared vocabulary of the dataflow bridge.
//!
//! # Modules
//!
//! - [`value`] – internal value shapes ([`Value`], [`Matrix`],
//!   [`MatrixHomogeneous`]) and their [`InternalType`] tags.
//! - [`wire`] – transport message schemas ([`WireMessage`] and friends) and
//!   their [`WireType`] tags.
//! - [`geometry`] – [`Vector3`], [`Quaternion`], [`Transform`] and the
//!   rotation algebra behind them.
//! - [`signal`] – the [`SignalSource`] seam to the dataflow engine plus simple
//!   [`Signal`] / [`InputSignal`] implementations.
//! - [`error`] – [`BridgeError`], [`ConversionError`], [`LookupError`].

pub mod error;
pub mod geometry;
pub mod signal;
pub mod value;
pub mod wire;

pub use error::{BridgeError, ConversionError, LookupError};
pub use geometry::{Quaternion, Rotation, Transform, Vector3};
pub use signal::{InputSignal, Signal, SignalRef, SignalSource, SignalTable, Tick};
pub use value::{InternalRepr, InternalType, Matrix, MatrixHomogeneous, Value};
pub use wire::{
    Float64Msg, Header, MatrixMsg, Stamp, TransformStamped, TwistMsg, TwistStamped, UInt32Msg,
    Vector3Stamped, VectorMsg, WireMessage, WireRepr, WireType, WORLD_FRAME,
};
