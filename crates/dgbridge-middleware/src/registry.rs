//! [`ConversionRegistry`] – the runtime index of conversion pairs.
//!
//! Bindings only know their signal's declared [`InternalType`] at runtime,
//! so the typed [`Conversion`] impls are erased into plain function pointers
//! and indexed by [`TypePair`].  The registry is assembled once through
//! [`ConversionRegistryBuilder`] and is immutable afterwards.  Resolving an
//! internal type with no registered pair fails with
//! [`BridgeError::UnsupportedConversion`] when the binding is created, never
//! in the middle of a tick.

use std::collections::BTreeMap;
use std::fmt;

use dgbridge_types::{
    BridgeError, ConversionError, InternalRepr, InternalType, Value, WireMessage, WireRepr,
    WireType,
};

use crate::converter::{
    Conversion, CountConv, HomogeneousConv, MatrixConv, ScalarConv, Stamped, TwistConv,
    Vector3Conv, VectorConv,
};

/// Index key of a conversion pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypePair {
    pub internal: InternalType,
    pub wire: WireType,
}

impl fmt::Display for TypePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.internal, self.wire)
    }
}

type ToWireFn = fn(&Value) -> Result<WireMessage, ConversionError>;
type ToInternalFn = fn(&WireMessage) -> Result<Value, ConversionError>;

/// Type-erased conversion pair.
#[derive(Clone, Copy)]
pub struct ConversionEntry {
    pair: TypePair,
    to_wire: ToWireFn,
    to_internal: ToInternalFn,
}

impl ConversionEntry {
    fn of<C: Conversion>() -> Self {
        Self {
            pair: TypePair {
                internal: C::INTERNAL,
                wire: <C::Wire as WireRepr>::TYPE,
            },
            to_wire: erased_to_wire::<C>,
            to_internal: erased_to_internal::<C>,
        }
    }

    pub fn pair(&self) -> TypePair {
        self.pair
    }

    pub fn wire_type(&self) -> WireType {
        self.pair.wire
    }

    /// Convert a signal value into its wire message.
    ///
    /// # Errors
    ///
    /// [`ConversionError::ValueMismatch`] when the value does not have the
    /// representation of the pair's internal type, or any per-type error.
    pub fn to_wire(&self, value: &Value) -> Result<WireMessage, ConversionError> {
        (self.to_wire)(value)
    }

    /// Convert a wire message into a signal value.
    pub fn to_internal(&self, message: &WireMessage) -> Result<Value, ConversionError> {
        (self.to_internal)(message)
    }

    /// Convert from a shared message without taking ownership of it.
    pub fn to_internal_shared<R>(&self, message: &R) -> Result<Value, ConversionError>
    where
        R: AsRef<WireMessage> + ?Sized,
    {
        self.to_internal(message.as_ref())
    }
}

impl fmt::Debug for ConversionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionEntry")
            .field("pair", &self.pair)
            .finish_non_exhaustive()
    }
}

fn erased_to_wire<C: Conversion>(value: &Value) -> Result<WireMessage, ConversionError> {
    let src = C::Internal::from_value(value).ok_or(ConversionError::ValueMismatch {
        declared: C::INTERNAL,
        found: value.kind(),
    })?;
    Ok(C::wire_of(src)?.into_message())
}

fn erased_to_internal<C: Conversion>(message: &WireMessage) -> Result<Value, ConversionError> {
    let src = C::Wire::from_message(message).ok_or(ConversionError::WireMismatch {
        expected: <C::Wire as WireRepr>::TYPE,
        found: message.wire_type(),
    })?;
    Ok(C::internal_of(src)?.into_value())
}

// ────────────────────────────────────────────────────────────────────────────
// Builder
// ────────────────────────────────────────────────────────────────────────────

/// Collects conversion pairs before the registry is frozen.
#[derive(Debug, Default)]
pub struct ConversionRegistryBuilder {
    entries: BTreeMap<InternalType, ConversionEntry>,
}

impl ConversionRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the pair `C`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::DuplicateConversion`] if `C`'s internal type already has
    /// a pair; each internal type maps to exactly one wire type.
    pub fn register<C: Conversion>(mut self) -> Result<Self, BridgeError> {
        if let Some(existing) = self.entries.get(&C::INTERNAL) {
            return Err(BridgeError::DuplicateConversion {
                internal: C::INTERNAL,
                wire: existing.wire_type(),
            });
        }
        self.insert::<C>();
        Ok(self)
    }

    fn insert<C: Conversion>(&mut self) {
        self.entries.insert(C::INTERNAL, ConversionEntry::of::<C>());
    }

    pub fn build(self) -> ConversionRegistry {
        ConversionRegistry {
            entries: self.entries,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Registry
// ────────────────────────────────────────────────────────────────────────────

/// Frozen set of conversion pairs.
#[derive(Debug, Clone)]
pub struct ConversionRegistry {
    entries: BTreeMap<InternalType, ConversionEntry>,
}

impl Default for ConversionRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl ConversionRegistry {
    /// Every pair defined in [`crate::converter`].
    pub fn standard() -> Self {
        let mut builder = ConversionRegistryBuilder::new();
        builder.insert::<ScalarConv>();
        builder.insert::<CountConv>();
        builder.insert::<VectorConv>();
        builder.insert::<Vector3Conv>();
        builder.insert::<MatrixConv>();
        builder.insert::<HomogeneousConv>();
        builder.insert::<TwistConv>();
        builder.insert::<Stamped<Vector3Conv>>();
        builder.insert::<Stamped<HomogeneousConv>>();
        builder.insert::<Stamped<TwistConv>>();
        builder.build()
    }

    pub fn builder() -> ConversionRegistryBuilder {
        ConversionRegistryBuilder::new()
    }

    /// The pair serving `internal`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::UnsupportedConversion`] when no pair was registered.
    pub fn resolve(&self, internal: InternalType) -> Result<&ConversionEntry, BridgeError> {
        self.entries
            .get(&internal)
            .ok_or(BridgeError::UnsupportedConversion(internal))
    }

    /// Look up an exact pair.
    pub fn get(&self, pair: TypePair) -> Option<&ConversionEntry> {
        self.entries
            .get(&pair.internal)
            .filter(|entry| entry.pair == pair)
    }

    /// All registered pairs, ordered by internal type.
    pub fn pairs(&self) -> Vec<TypePair> {
        self.entries.values().map(ConversionEntry::pair).collect()
    }
}
