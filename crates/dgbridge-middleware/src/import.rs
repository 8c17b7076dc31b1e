//! Topic-to-signal bindings: the wire-to-internal direction.
//!
//! Each import owns an [`InputSignal`] that the host plugs into its graph
//! and a [`Subscription`] on the bound topic.  [`ImportRegistry::trigger`]
//! takes the newest message of every subscription, converts it to internal
//! form without copying the shared envelope, and stores it in the signal.

use std::collections::BTreeMap;
use std::sync::Arc;

use dgbridge_types::{BridgeError, InputSignal, InternalType, Tick, WireType};
use tracing::{debug, info, warn};

use crate::context::BridgeContext;
use crate::export::BindingFailure;
use crate::registry::ConversionEntry;
use crate::transport::Subscription;

struct ImportBinding {
    entry: ConversionEntry,
    signal: Arc<InputSignal>,
    subscription: Subscription,
}

/// What happened during one [`ImportRegistry::trigger`].
#[derive(Debug, Default)]
pub struct ImportReport {
    pub time: Tick,
    /// Imports whose signal received a new value.
    pub updated: Vec<String>,
    pub failures: Vec<BindingFailure>,
}

/// Named topic-to-signal bindings.
pub struct ImportRegistry {
    name: String,
    context: BridgeContext,
    bindings: BTreeMap<String, ImportBinding>,
}

impl ImportRegistry {
    pub fn new(name: impl Into<String>, context: BridgeContext) -> Self {
        Self {
            name: name.into(),
            context,
            bindings: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribe to `topic` and expose its messages as a signal of type
    /// `internal` named `name`.
    ///
    /// # Errors
    ///
    /// * [`BridgeError::DuplicateBinding`] if `name` is already imported.
    /// * [`BridgeError::UnsupportedConversion`] if `internal` has no wire
    ///   counterpart.
    /// * [`BridgeError::TransportUnavailable`] if the subscription fails.
    pub fn add(
        &mut self,
        name: &str,
        topic: &str,
        internal: InternalType,
    ) -> Result<Arc<InputSignal>, BridgeError> {
        if self.bindings.contains_key(name) {
            return Err(BridgeError::DuplicateBinding(name.to_string()));
        }
        let entry = *self.context.registry.resolve(internal)?;
        let subscription = self.context.transport.subscribe(topic, entry.wire_type())?;
        let signal = Arc::new(InputSignal::new(name, internal));
        info!(
            registry = %self.name,
            binding = %name,
            topic,
            internal = %internal,
            wire = %entry.wire_type(),
            "import binding added"
        );
        self.bindings.insert(
            name.to_string(),
            ImportBinding {
                entry,
                signal: Arc::clone(&signal),
                subscription,
            },
        );
        Ok(signal)
    }

    /// Drop the import `name`.
    pub fn rm(&mut self, name: &str) -> Result<(), BridgeError> {
        let binding = self
            .bindings
            .remove(name)
            .ok_or_else(|| BridgeError::UnknownBinding(name.to_string()))?;
        info!(registry = %self.name, binding = %name, topic = %binding.subscription.topic(), "import binding removed");
        Ok(())
    }

    /// Import names in lexicographic order.
    pub fn list(&self) -> Vec<String> {
        self.bindings.keys().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    /// The signal fed by the import `name`.
    pub fn signal(&self, name: &str) -> Option<Arc<InputSignal>> {
        self.bindings.get(name).map(|b| Arc::clone(&b.signal))
    }

    pub fn wire_type_of(&self, name: &str) -> Option<WireType> {
        self.bindings.get(name).map(|b| b.entry.wire_type())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Store the newest message of every import into its signal.
    ///
    /// An import with no new message keeps its previous value.  A message
    /// that fails to convert is reported and the signal is left untouched.
    pub fn trigger(&mut self, time: Tick) -> ImportReport {
        let mut report = ImportReport {
            time,
            ..ImportReport::default()
        };
        for (name, binding) in &mut self.bindings {
            let Some(envelope) = binding.subscription.take_latest() else {
                continue;
            };
            match binding.entry.to_internal_shared(&*envelope) {
                Ok(value) => {
                    binding.signal.set(value, time);
                    debug!(registry = %self.name, binding = %name, time, "imported");
                    report.updated.push(name.clone());
                }
                Err(e) => {
                    warn!(registry = %self.name, binding = %name, time, error = %e, "conversion failed");
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
