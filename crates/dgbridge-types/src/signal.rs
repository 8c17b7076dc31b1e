//! Minimal pull-based signal abstraction.
//!
//! The host dataflow engine is an external collaborator; the bridge only
//! needs to ask a signal for its declared type and for its value at a given
//! logical tick.  [`Signal`] is a time-dependent signal that recomputes at
//! most once per tick, [`InputSignal`] holds the last value written into it
//! (used by imports), and [`SignalTable`] is the by-name lookup the bridge
//! uses when a binding names a signal.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::BridgeError;
use crate::value::{InternalRepr, InternalType, Value};

/// Logical time: an opaque, monotonically advancing tick supplied by the
/// scheduler.
pub type Tick = i64;

/// A node of the dataflow graph, as seen by the bridge.
pub trait SignalSource: Send + Sync {
    fn name(&self) -> &str;

    /// The internal type this signal was declared with.
    fn declared_type(&self) -> InternalType;

    /// The value at `time`, recomputing upstream if needed.
    fn value_at(&self, time: Tick) -> Value;
}

/// Shared handle on a signal.
pub type SignalRef = Arc<dyn SignalSource>;

// ────────────────────────────────────────────────────────────────────────────
// Signal
// ────────────────────────────────────────────────────────────────────────────

type Compute<T> = Box<dyn Fn(Tick) -> T + Send + Sync>;

/// A time-dependent signal backed by a compute function.
///
/// The last computed `(tick, value)` pair is cached; asking twice for the
/// same tick runs the function once.
pub struct Signal<T: InternalRepr> {
    name: String,
    declared: InternalType,
    compute: Compute<T>,
    cache: Mutex<Option<(Tick, T)>>,
}

impl<T: InternalRepr> Signal<T> {
    /// Create a signal declared with `T`'s canonical internal type.
    pub fn new<F>(name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(Tick) -> T + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            declared: T::CANONICAL,
            compute: Box::new(compute),
            cache: Mutex::new(None),
        }
    }

    /// Re-declare the signal, e.g. a `Vec<f64>` signal as a Twist.
    ///
    /// # Errors
    ///
    /// [`BridgeError::SignalTypeMismatch`] when `declared` is carried by a
    /// different representation than `T`.
    pub fn declared_as(mut self, declared: InternalType) -> Result<Self, BridgeError> {
        if declared.repr_kind() != T::KIND {
            return Err(BridgeError::SignalTypeMismatch {
                name: self.name,
                declared,
                kind: T::KIND,
            });
        }
        self.declared = declared;
        Ok(self)
    }

    /// Value at `time`, computed at most once per tick.
    pub fn access(&self, time: Tick) -> T {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((tick, value)) = cache.as_ref()
            && *tick == time
        {
            return value.clone();
        }
        let value = (self.compute)(time);
        *cache = Some((time, value.clone()));
        value
    }

    /// Force a recomputation at `time`, ignoring the cache.
    pub fn recompute(&self, time: Tick) -> T {
        let value = (self.compute)(time);
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = Some((time, value.clone()));
        value
    }
}

impl<T: InternalRepr> SignalSource for Signal<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn declared_type(&self) -> InternalType {
        self.declared
    }

    fn value_at(&self, time: Tick) -> Value {
        self.access(time).into_value()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// InputSignal
// ────────────────────────────────────────────────────────────────────────────

/// A signal whose value is written from outside the graph.
///
/// Reads return the last written value regardless of the requested tick; the
/// type's default value is returned before the first write.
pub struct InputSignal {
    name: String,
    declared: InternalType,
    value: Mutex<Value>,
    last_update: Mutex<Option<Tick>>,
}

impl InputSignal {
    pub fn new(name: impl Into<String>, declared: InternalType) -> Self {
        Self {
            name: name.into(),
            declared,
            value: Mutex::new(Value::default_for(declared)),
            last_update: Mutex::new(None),
        }
    }

    /// Store `value`, received at logical time `time`.
    pub fn set(&self, value: Value, time: Tick) {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = value;
        *self.last_update.lock().unwrap_or_else(PoisonError::into_inner) = Some(time);
    }

    /// Tick of the last write, if any.
    pub fn last_update(&self) -> Option<Tick> {
        *self.last_update.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SignalSource for InputSignal {
    fn name(&self) -> &str {
        &self.name
    }

    fn declared_type(&self) -> InternalType {
        self.declared
    }

    fn value_at(&self, _time: Tick) -> Value {
        self.value.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SignalTable
// ────────────────────────────────────────────────────────────────────────────

/// Signals reachable by name.
#[derive(Default, Clone)]
pub struct SignalTable {
    signals: BTreeMap<String, SignalRef>,
}

impl SignalTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `signal` under its own name.  Any previous signal with the
    /// same name is replaced.
    pub fn insert(&mut self, signal: SignalRef) {
        self.signals.insert(signal.name().to_string(), signal);
    }

    pub fn get(&self, name: &str) -> Option<SignalRef> {
        self.signals.get(name).cloned()
    }

    /// Look up `name`, failing with [`BridgeError::UnknownSignal`].
    pub fn require(&self, name: &str) -> Result<SignalRef, BridgeError> {
        self.get(name)
            .ok_or_else(|| BridgeError::UnknownSignal(name.to_string()))
    }

    pub fn remove(&mut self, name: &str) -> Option<SignalRef> {
        self.signals.remove(name)
    }

    /// Signal names in lexicographic order.
    pub fn names(&self) -> Vec<String> {
        self.signals.keys().cloned().collect()
    }
}
