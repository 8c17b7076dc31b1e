//! `dgbridge-perception` – spatial transforms for the bridge.
//!
//! # Modules
//!
//! - [`transform`] – [`TfBuffer`][transform::TfBuffer]: time-aware frame
//!   graph implementing the [`TransformLookup`][transform::TransformLookup]
//!   service.
//! - [`tf_listener`] – [`FallbackResolver`][tf_listener::FallbackResolver]
//!   and [`TransformListener`][tf_listener::TransformListener]: resolve a
//!   transform at a tick, substituting a fallback signal when the latest one
//!   is missing or too old.

pub mod tf_listener;
pub mod transform;

pub use tf_listener::{
    DEFAULT_MAX_STALENESS, FallbackPolicy, FallbackResolver, Freshness, LookupRef, StaleReason,
    TransformListener,
};
pub use transform::{LookupTime, TfBuffer, TransformLookup};
