//! `dgbridge-middleware` – conversion and binding between signals and topics.
//!
//! Moves values between the dataflow graph and the publish/subscribe
//! transport without caring about their meaning.
//!
//! # Modules
//!
//! - [`converter`] – typed, compile-time closed set of internal/wire
//!   conversion pairs.
//! - [`registry`] – runtime index of those pairs, resolved once per binding.
//! - [`transport`] – the [`Transport`] seam and the in-process
//!   [`BusTransport`] built on Tokio watch channels.
//! - [`export`] – signal-to-topic bindings with rate-limited publication.
//! - [`import`] – topic-to-signal bindings.
//! - [`rosbridge`] – WebSocket server speaking the rosbridge JSON protocol.

pub mod context;
pub mod converter;
pub mod export;
pub mod import;
pub mod registry;
pub mod rosbridge;
pub mod transport;

pub use context::BridgeContext;
pub use converter::{Conversion, Stamped};
pub use export::{BindingFailure, BindingRegistry, ExportOptions, TriggerReport};
pub use import::{ImportRegistry, ImportReport};
pub use registry::{ConversionEntry, ConversionRegistry, ConversionRegistryBuilder, TypePair};
pub use rosbridge::RosbridgeServer;
pub use transport::{
    BusTransport, Envelope, PublisherHandle, Subscription, Transport, TransportError,
};
