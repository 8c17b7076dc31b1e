//! Signal-to-topic bindings and their periodic, rate-limited publication.
//!
//! A [`BindingRegistry`] owns one [`Binding`] per bound signal.  On every
//! [`BindingRegistry::trigger`] each binding, in name order, reads its signal
//! at the given tick, converts the value to its wire form and hands it to the
//! transport, unless the binding already published less than
//! [`ExportOptions::publish_rate`] ago.
//!
//! Wall-clock time for the rate limit comes from a [`governor::clock::Clock`]
//! so tests can drive it with a [`governor::clock::FakeRelativeClock`].

use std::collections::BTreeMap;
use std::time::Duration;

use dgbridge_types::{BridgeError, SignalRef, SignalTable, Tick, WireType};
use governor::clock::{Clock, DefaultClock, Reference};
use tracing::{debug, info, warn};

use crate::context::BridgeContext;
use crate::registry::ConversionEntry;
use crate::transport::PublisherHandle;

/// Minimum spacing between two publications of the same binding.
pub const DEFAULT_PUBLISH_RATE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    pub publish_rate: Duration,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            publish_rate: DEFAULT_PUBLISH_RATE,
        }
    }
}

/// One signal bound to one topic.
struct Binding<I> {
    topic: String,
    entry: ConversionEntry,
    signal: SignalRef,
    publisher: PublisherHandle,
    last_publish: Option<I>,
}

/// A binding that could not publish during a trigger.
#[derive(Debug)]
pub struct BindingFailure {
    pub name: String,
    pub error: BridgeError,
}

/// What happened during one [`BindingRegistry::trigger`].
#[derive(Debug, Default)]
pub struct TriggerReport {
    pub time: Tick,
    /// Bindings whose message reached the transport.
    pub published: Vec<String>,
    /// Bindings skipped because they published too recently.
    pub rate_limited: Vec<String>,
    /// Conversion and transport failures, in binding order.
    pub failures: Vec<BindingFailure>,
}

impl TriggerReport {
    fn new(time: Tick) -> Self {
        Self {
            time,
            ..Self::default()
        }
    }

    /// `true` when no binding failed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Named signal-to-topic bindings.
pub struct BindingRegistry<C: Clock = DefaultClock> {
    name: String,
    context: BridgeContext,
    signals: SignalTable,
    options: ExportOptions,
    clock: C,
    bindings: BTreeMap<String, Binding<C::Instant>>,
}

impl BindingRegistry<DefaultClock> {
    pub fn new(
        name: impl Into<String>,
        context: BridgeContext,
        signals: SignalTable,
        options: ExportOptions,
    ) -> Self {
        Self::with_clock(name, context, signals, options, DefaultClock::default())
    }
}

impl<C: Clock> BindingRegistry<C> {
    pub fn with_clock(
        name: impl Into<String>,
        context: BridgeContext,
        signals: SignalTable,
        options: ExportOptions,
        clock: C,
    ) -> Self {
        Self {
            name: name.into(),
            context,
            signals,
            options,
            clock,
            bindings: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> ExportOptions {
        self.options
    }

    /// Signals that [`Self::add`] can bind by name.
    pub fn signals(&self) -> &SignalTable {
        &self.signals
    }

    pub fn signals_mut(&mut self) -> &mut SignalTable {
        &mut self.signals
    }

    /// Bind the signal called `name` to `topic`.
    ///
    /// # Errors
    ///
    /// * [`BridgeError::DuplicateBinding`] if `name` is already bound.
    /// * [`BridgeError::UnknownSignal`] if no signal has that name.
    /// * [`BridgeError::UnsupportedConversion`] if the signal's declared type
    ///   has no wire counterpart.
    /// * [`BridgeError::TransportUnavailable`] if the topic cannot be
    ///   advertised.
    pub fn add(&mut self, name: &str, topic: &str) -> Result<WireType, BridgeError> {
        if self.bindings.contains_key(name) {
            return Err(BridgeError::DuplicateBinding(name.to_string()));
        }
        let signal = self.signals.require(name)?;
        self.bind(name.to_string(), signal, topic)
    }

    /// Bind an explicit signal handle to `topic`, under the signal's name.
    pub fn add_signal(&mut self, signal: SignalRef, topic: &str) -> Result<WireType, BridgeError> {
        let name = signal.name().to_string();
        if self.bindings.contains_key(&name) {
            return Err(BridgeError::DuplicateBinding(name));
        }
        self.bind(name, signal, topic)
    }

    fn bind(&mut self, name: String, signal: SignalRef, topic: &str) -> Result<WireType, BridgeError> {
        let entry = *self.context.registry.resolve(signal.declared_type())?;
        let publisher = self.context.transport.advertise(topic, entry.wire_type())?;
        let wire_type = entry.wire_type();
        info!(
            registry = %self.name,
            binding = %name,
            topic,
            internal = %signal.declared_type(),
            wire = %wire_type,
            "export binding added"
        );
        self.bindings.insert(
            name,
            Binding {
                topic: topic.to_string(),
                entry,
                signal,
                publisher,
                last_publish: None,
            },
        );
        Ok(wire_type)
    }

    /// Remove the binding `name` and release its publisher.
    ///
    /// # Errors
    ///
    /// [`BridgeError::UnknownBinding`] if nothing is bound under `name`.
    pub fn rm(&mut self, name: &str) -> Result<(), BridgeError> {
        let binding = self
            .bindings
            .remove(name)
            .ok_or_else(|| BridgeError::UnknownBinding(name.to_string()))?;
        self.release(name, &binding);
        Ok(())
    }

    /// Binding names in lexicographic order.
    pub fn list(&self) -> Vec<String> {
        self.bindings.keys().cloned().collect()
    }

    /// Remove every binding.  Idempotent.
    pub fn clear(&mut self) {
        for (name, binding) in std::mem::take(&mut self.bindings) {
            self.release(&name, &binding);
        }
    }

    /// The signal published by the binding `name`.
    pub fn signal_of(&self, name: &str) -> Option<&SignalRef> {
        self.bindings.get(name).map(|b| &b.signal)
    }

    pub fn topic_of(&self, name: &str) -> Option<&str> {
        self.bindings.get(name).map(|b| b.topic.as_str())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    fn release(&self, name: &str, binding: &Binding<C::Instant>) {
        if let Err(e) = self.context.transport.unadvertise(&binding.publisher) {
            warn!(registry = %self.name, binding = %name, error = %e, "failed to unadvertise");
        }
        info!(registry = %self.name, binding = %name, topic = %binding.topic, "export binding removed");
    }

    /// Publish every binding's value at `time`, subject to the rate limit.
    ///
    /// Never stops early: a failing binding is recorded in the report and the
    /// remaining bindings are still processed.  A binding whose publish
    /// failed keeps its previous publish instant, so it is retried on the
    /// next trigger.
    pub fn trigger(&mut self, time: Tick) -> TriggerReport {
        let mut report = TriggerReport::new(time);
        for (name, binding) in &mut self.bindings {
            let value = binding.signal.value_at(time);
            let msg = match binding.entry.to_wire(&value) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(registry = %self.name, binding = %name, time, error = %e, "conversion failed");
                    report.failures.push(BindingFailure {
                        name: name.clone(),
                        error: e.into(),
                    });
                    continue;
                }
            };

            let now = self.clock.now();
            if let Some(last) = binding.last_publish
                && Duration::from(now.duration_since(last)) < self.options.publish_rate
            {
                report.rate_limited.push(name.clone());
                continue;
            }

            match self.context.transport.publish(&binding.publisher, msg) {
                Ok(()) => {
                    binding.last_publish = Some(now);
                    debug!(registry = %self.name, binding = %name, topic = %binding.topic, time, "published");
                    report.published.push(name.clone());
                }
                Err(e) => {
                    warn!(registry = %self.name, binding = %name, topic = %binding.topic, error = %e, "publish failed");
                    report.failures.push(BindingFailure {
                        name: name.clone(),
                        error: e.into(),
                    });
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use dgbridge_types::{
        Float64Msg, InputSignal, InternalType, Signal, Value, WireMessage,
    };
    use governor::clock::FakeRelativeClock;

    use crate::converter::ScalarConv;
    use crate::registry::ConversionRegistry;
    use crate::transport::{BusTransport, Transport};

    struct Fixture {
        bus: BusTransport,
        clock: FakeRelativeClock,
        registry: BindingRegistry<FakeRelativeClock>,
    }

    fn signals() -> SignalTable {
        let mut table = SignalTable::new();
        table.insert(Arc::new(Signal::new("time", |t| t as f64)));
        table.insert(Arc::new(Signal::new("count", |t| t as u32)));
        table.insert(Arc::new(
            Signal::new("velocity", |_| vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.5])
                .declared_as(InternalType::Twist)
                .unwrap(),
        ));
        table
    }

    fn fixture(publish_rate: Duration) -> Fixture {
        let bus = BusTransport::new();
        let clock = FakeRelativeClock::default();
        let context = BridgeContext::with_transport(Arc::new(bus.clone()));
        let registry = BindingRegistry::with_clock(
            "rosExport",
            context,
            signals(),
            ExportOptions { publish_rate },
            clock.clone(),
        );
        Fixture {
            bus,
            clock,
            registry,
        }
    }

    #[test]
    fn add_list_rm_clear() {
        let mut f = fixture(DEFAULT_PUBLISH_RATE);
        assert_eq!(f.registry.add("time", "/t").unwrap(), WireType::Float64);
        assert_eq!(f.registry.add("count", "/c").unwrap(), WireType::UInt32);
        assert_eq!(f.registry.list(), vec!["count", "time"]);

        f.registry.rm("time").unwrap();
        assert_eq!(f.registry.list(), vec!["count"]);

        f.registry.clear();
        assert!(f.registry.list().is_empty());
        f.registry.clear();
        assert!(f.registry.is_empty());
    }

    #[test]
    fn removed_binding_frees_its_topic_for_another_type() {
        let mut f = fixture(DEFAULT_PUBLISH_RATE);
        f.registry.add("time", "/x").unwrap();
        f.registry.rm("time").unwrap();
        assert!(f.bus.topics().is_empty());

        assert_eq!(f.registry.add("count", "/x").unwrap(), WireType::UInt32);
        f.registry.clear();
        assert!(f.bus.topics().is_empty());
        assert_eq!(f.registry.add("time", "/x").unwrap(), WireType::Float64);
    }

    #[test]
    fn adding_twice_is_a_duplicate() {
        let mut f = fixture(DEFAULT_PUBLISH_RATE);
        f.registry.add("time", "/t").unwrap();
        assert!(matches!(
            f.registry.add("time", "/other"),
            Err(BridgeError::DuplicateBinding(name)) if name == "time"
        ));
        assert_eq!(f.registry.topic_of("time"), Some("/t"));
    }

    #[test]
    fn removing_an_unknown_binding_fails() {
        let mut f = fixture(DEFAULT_PUBLISH_RATE);
        assert!(matches!(
            f.registry.rm("com"),
            Err(BridgeError::UnknownBinding(_))
        ));
    }

    #[test]
    fn unknown_signal_is_rejected() {
        let mut f = fixture(DEFAULT_PUBLISH_RATE);
        assert!(matches!(
            f.registry.add("nope", "/n"),
            Err(BridgeError::UnknownSignal(_))
        ));
        assert!(f.registry.is_empty());
    }

    #[test]
    fn unsupported_conversion_is_rejected_at_add() {
        let bus = BusTransport::new();
        let registry = ConversionRegistry::builder()
            .register::<ScalarConv>()
            .unwrap()
            .build();
        let context = BridgeContext::new(Arc::new(bus.clone()), Arc::new(registry));
        let mut export = BindingRegistry::new("rosExport", context, signals(), ExportOptions::default());

        assert!(matches!(
            export.add("count", "/c"),
            Err(BridgeError::UnsupportedConversion(InternalType::Count))
        ));
        assert!(export.list().is_empty());
        assert!(bus.topics().is_empty());
        export.add("time", "/t").unwrap();
    }

    #[test]
    fn add_signal_uses_the_signal_name() {
        let mut f = fixture(DEFAULT_PUBLISH_RATE);
        let input = Arc::new(InputSignal::new("cmd", InternalType::Vector3));
        assert_eq!(f.registry.add_signal(input.clone(), "/cmd").unwrap(), WireType::Vector3);
        assert_eq!(f.registry.list(), vec!["cmd"]);
        assert!(matches!(
            f.registry.add_signal(input, "/cmd2"),
            Err(BridgeError::DuplicateBinding(_))
        ));
    }

    #[test]
    fn trigger_publishes_converted_value() {
        let mut f = fixture(DEFAULT_PUBLISH_RATE);
        let mut sub = f.bus.subscribe("/t", WireType::Float64).unwrap();
        f.registry.add("time", "/t").unwrap();

        let report = f.registry.trigger(42);
        assert_eq!(report.time, 42);
        assert_eq!(report.published, vec!["time"]);
        assert!(report.is_clean());
        assert_eq!(
            sub.take_latest().unwrap().msg,
            WireMessage::Float64(Float64Msg { data: 42.0 })
        );
    }

    #[test]
    fn trigger_visits_bindings_in_name_order() {
        let mut f = fixture(DEFAULT_PUBLISH_RATE);
        f.registry.add("velocity", "/v").unwrap();
        f.registry.add("time", "/t").unwrap();
        f.registry.add("count", "/c").unwrap();

        let report = f.registry.trigger(1);
        assert_eq!(report.published, vec!["count", "time", "velocity"]);
    }

    #[test]
    fn publications_closer_than_the_rate_are_dropped() {
        let mut f = fixture(Duration::from_millis(100));
        f.registry.add("time", "/t").unwrap();

        let first = f.registry.trigger(0);
        f.clock.advance(Duration::from_millis(50));
        let second = f.registry.trigger(1);

        assert_eq!(first.published.len() + second.published.len(), 1);
        assert_eq!(second.rate_limited, vec!["time"]);
    }

    #[test]
    fn publications_further_apart_than_the_rate_both_go_out() {
        let mut f = fixture(Duration::from_millis(100));
        f.registry.add("time", "/t").unwrap();

        let first = f.registry.trigger(0);
        f.clock.advance(Duration::from_millis(150));
        let second = f.registry.trigger(1);

        assert_eq!(first.published.len() + second.published.len(), 2);
    }

    #[test]
    fn rate_limit_is_measured_from_last_successful_publish() {
        let mut f = fixture(Duration::from_millis(100));
        f.registry.add("time", "/t").unwrap();

        f.registry.trigger(0);
        for tick in 1..=3 {
            f.clock.advance(Duration::from_millis(40));
            let report = f.registry.trigger(tick);
            if tick < 3 {
                assert_eq!(report.rate_limited, vec!["time"]);
            } else {
                // 120ms since the publish at tick 0.
                assert_eq!(report.published, vec!["time"]);
            }
        }
    }

    #[test]
    fn conversion_failure_is_reported_and_binding_stays() {
        let mut f = fixture(DEFAULT_PUBLISH_RATE);
        let bad = Signal::new("short_twist", |_| vec![0.0; 5])
            .declared_as(InternalType::Twist)
            .unwrap();
        f.registry.add_signal(Arc::new(bad), "/bad").unwrap();
        f.registry.add("time", "/t").unwrap();

        let report = f.registry.trigger(0);
        assert_eq!(report.published, vec!["time"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].name, "short_twist");
        assert!(matches!(report.failures[0].error, BridgeError::Conversion(_)));
        assert_eq!(f.registry.list(), vec!["short_twist", "time"]);
    }

    #[test]
    fn transport_failure_is_retried_on_next_trigger() {
        let mut f = fixture(Duration::from_millis(100));
        f.registry.add("time", "/t").unwrap();

        f.bus.close();
        let failed = f.registry.trigger(0);
        assert!(matches!(
            failed.failures[0].error,
            BridgeError::TransportUnavailable(_)
        ));

        // No successful publish yet, so the rate limit does not apply.
        f.bus.reopen();
        f.clock.advance(Duration::from_millis(1));
        let retried = f.registry.trigger(1);
        assert_eq!(retried.published, vec!["time"]);
    }

    #[test]
    fn input_signal_value_is_exported() {
        let mut f = fixture(DEFAULT_PUBLISH_RATE);
        let input = Arc::new(InputSignal::new("gain", InternalType::Scalar));
        input.set(Value::Scalar(2.5), 0);
        f.registry.add_signal(input, "/gain").unwrap();
        let mut sub = f.bus.subscribe("/gain", WireType::Float64).unwrap();

        f.registry.trigger(3);
        assert_eq!(
            sub.take_latest().unwrap().msg,
            WireMessage::Float64(Float64Msg { data: 2.5 })
        );
    }
}
