//! `dgbridge-runtime` – the scheduler-facing side of the bridge.
//!
//! # Modules
//!
//! - [`bridge`] – [`Bridge`]: export and import registries plus a transform
//!   listener, advanced together by [`Bridge::tick`].
//! - [`command`] – [`Command`] objects and the [`CommandTable`] that
//!   dispatches `"<entity>.<command> args..."` lines to them.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: the global
//!   `tracing` subscriber, with optional OTLP span export when
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

pub mod bridge;
pub mod command;
pub mod telemetry;

pub use bridge::{Bridge, TickReport};
pub use command::{
    Command, CommandTable, CommandValue, SharedExport, SharedImport, SharedListener,
};
pub use telemetry::{TelemetryConfig, TracerProviderGuard, init_tracing};
