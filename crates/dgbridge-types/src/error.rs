//! Error taxonomy shared by every dgbridge crate.

use thiserror::Error;

use crate::value::InternalType;
use crate::wire::WireType;

/// A single conversion between internal and wire form failed.
///
/// Recoverable: the caller reports it for the current tick and carries on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    #[error("{kind} expects exactly {expected} components, got {actual}")]
    InvalidLength {
        kind: InternalType,
        expected: usize,
        actual: usize,
    },

    #[error("matrix width {width} does not evenly divide a buffer of {len} elements")]
    InvalidMatrixWidth { width: u32, len: usize },

    #[error("cannot build a rotation from the zero quaternion")]
    DegenerateQuaternion,

    #[error("signal declared as {declared} produced a {found} value")]
    ValueMismatch {
        declared: InternalType,
        found: &'static str,
    },

    #[error("expected a {expected} message, got {found}")]
    WireMismatch { expected: WireType, found: WireType },
}

/// The transform lookup service could not answer.
///
/// Never escapes the fallback resolver: it only selects the stale path.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LookupError {
    #[error("frame '{0}' does not exist")]
    UnknownFrame(String),

    #[error("no transform path from '{source_frame}' to '{target_frame}'")]
    NoPath {
        source_frame: String,
        target_frame: String,
    },

    #[error("requested time predates the buffered history of '{parent}' -> '{child}'")]
    ExtrapolationIntoPast { parent: String, child: String },

    #[error("transform lookup unavailable: {0}")]
    Unavailable(String),
}

/// Global error type for registration, binding and command operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// No converter pair exists for the requested internal type.  Raised when
    /// a binding is registered, never in the middle of a tick.
    #[error("Unsupported conversion: no wire type registered for {0}")]
    UnsupportedConversion(InternalType),

    #[error("Conversion pair {internal} <-> {wire} registered twice")]
    DuplicateConversion {
        internal: InternalType,
        wire: WireType,
    },

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Duplicate binding: '{0}' is already bound")]
    DuplicateBinding(String),

    #[error("Unknown binding: '{0}'")]
    UnknownBinding(String),

    #[error("Unknown signal: '{0}'")]
    UnknownSignal(String),

    #[error("Signal '{name}' carries {kind} values and cannot be declared as {declared}")]
    SignalTypeMismatch {
        name: String,
        declared: InternalType,
        kind: &'static str,
    },

    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Command '{command}' failed: {reason}")]
    Command { command: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_error_display() {
        let err = BridgeError::DuplicateBinding("com".to_string());
        assert!(err.to_string().contains("Duplicate binding"));

        let err = BridgeError::from(ConversionError::InvalidLength {
            kind: InternalType::Twist,
            expected: 6,
            actual: 4,
        });
        assert!(matches!(err, BridgeError::Conversion(_)));
        assert!(err.to_string().contains("exactly 6"));
    }

    #[test]
    fn lookup_error_names_frames() {
        let err = LookupError::NoPath {
            source_frame: "camera".to_string(),
            target_frame: "world".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("camera") && msg.contains("world"));
    }
}
