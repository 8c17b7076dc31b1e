//! Wire (transport-side) message schemas.
//!
//! Field names follow the ROS message definitions the bridge speaks
//! (`data`, `x`/`y`/`z`, `width` + `data`, `translation` + `rotation`,
//! `linear` + `angular`, `header.stamp` + `header.frame_id`), so the JSON
//! produced by serde is directly usable on a rosbridge connection.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geometry::{Transform, Vector3};

/// Frame id written into every header produced by this bridge.
pub const WORLD_FRAME: &str = "/dynamic_graph/world";

// ────────────────────────────────────────────────────────────────────────────
// Type tags
// ────────────────────────────────────────────────────────────────────────────

/// Wire message type of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WireType {
    Float64,
    UInt32,
    Vector,
    Vector3,
    Matrix,
    Transform,
    Twist,
    Vector3Stamped,
    TransformStamped,
    TwistStamped,
}

impl WireType {
    /// ROS message type name, as announced in rosbridge `advertise` ops.
    pub fn ros_name(self) -> &'static str {
        match self {
            WireType::Float64 => "std_msgs/Float64",
            WireType::UInt32 => "std_msgs/UInt32",
            WireType::Vector => "dynamic_graph_bridge_msgs/Vector",
            WireType::Vector3 => "geometry_msgs/Vector3",
            WireType::Matrix => "dynamic_graph_bridge_msgs/Matrix",
            WireType::Transform => "geometry_msgs/Transform",
            WireType::Twist => "geometry_msgs/Twist",
            WireType::Vector3Stamped => "geometry_msgs/Vector3Stamped",
            WireType::TransformStamped => "geometry_msgs/TransformStamped",
            WireType::TwistStamped => "geometry_msgs/TwistStamped",
        }
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ros_name())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Header
// ────────────────────────────────────────────────────────────────────────────

/// ROS time: seconds and nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Stamp {
    pub secs: u32,
    pub nsecs: u32,
}

impl Stamp {
    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    /// Convert to a calendar instant.  Out-of-range nanoseconds map to the
    /// epoch.
    pub fn to_datetime(self) -> DateTime<Utc> {
        DateTime::from_timestamp(i64::from(self.secs), self.nsecs).unwrap_or_default()
    }
}

impl From<DateTime<Utc>> for Stamp {
    /// Instants before the epoch clamp to zero.
    fn from(time: DateTime<Utc>) -> Self {
        let secs = time.timestamp();
        if secs < 0 {
            return Self::default();
        }
        Self {
            secs: u32::try_from(secs).unwrap_or(u32::MAX),
            nsecs: time.timestamp_subsec_nanos(),
        }
    }
}

/// `std_msgs/Header`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub seq: u32,
    pub stamp: Stamp,
    pub frame_id: String,
}

impl Header {
    /// A header stamped now, in the bridge's world frame.
    pub fn now() -> Self {
        Self {
            seq: 0,
            stamp: Stamp::now(),
            frame_id: WORLD_FRAME.to_string(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Messages
// ────────────────────────────────────────────────────────────────────────────

/// `std_msgs/Float64`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Float64Msg {
    pub data: f64,
}

/// `std_msgs/UInt32`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UInt32Msg {
    pub data: u32,
}

/// `dynamic_graph_bridge_msgs/Vector`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorMsg {
    pub data: Vec<f64>,
}

/// `dynamic_graph_bridge_msgs/Matrix`: `width` is the row count and `data`
/// the column-major flattening.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatrixMsg {
    pub width: u32,
    pub data: Vec<f64>,
}

/// `geometry_msgs/Twist`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TwistMsg {
    pub linear: Vector3,
    pub angular: Vector3,
}

/// `geometry_msgs/Vector3Stamped`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3Stamped {
    pub header: Header,
    pub vector: Vector3,
}

/// `geometry_msgs/TransformStamped`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformStamped {
    pub header: Header,
    pub child_frame_id: String,
    pub transform: Transform,
}

/// `geometry_msgs/TwistStamped`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TwistStamped {
    pub header: Header,
    pub twist: TwistMsg,
}

/// Any message the bridge can put on the wire.
///
/// Serialises untagged, i.e. as the bare message body; the topic's
/// [`WireType`] is needed to parse one back (see [`WireMessage::from_json`]).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WireMessage {
    Float64(Float64Msg),
    UInt32(UInt32Msg),
    Vector(VectorMsg),
    Vector3(Vector3),
    Matrix(MatrixMsg),
    Transform(Transform),
    Twist(TwistMsg),
    Vector3Stamped(Vector3Stamped),
    TransformStamped(TransformStamped),
    TwistStamped(TwistStamped),
}

impl WireMessage {
    pub fn wire_type(&self) -> WireType {
        match self {
            WireMessage::Float64(_) => WireType::Float64,
            WireMessage::UInt32(_) => WireType::UInt32,
            WireMessage::Vector(_) => WireType::Vector,
            WireMessage::Vector3(_) => WireType::Vector3,
            WireMessage::Matrix(_) => WireType::Matrix,
            WireMessage::Transform(_) => WireType::Transform,
            WireMessage::Twist(_) => WireType::Twist,
            WireMessage::Vector3Stamped(_) => WireType::Vector3Stamped,
            WireMessage::TransformStamped(_) => WireType::TransformStamped,
            WireMessage::TwistStamped(_) => WireType::TwistStamped,
        }
    }

    /// Parse a JSON message body as a message of type `ty`.
    pub fn from_json(ty: WireType, body: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(match ty {
            WireType::Float64 => WireMessage::Float64(serde_json::from_value(body)?),
            WireType::UInt32 => WireMessage::UInt32(serde_json::from_value(body)?),
            WireType::Vector => WireMessage::Vector(serde_json::from_value(body)?),
            WireType::Vector3 => WireMessage::Vector3(serde_json::from_value(body)?),
            WireType::Matrix => WireMessage::Matrix(serde_json::from_value(body)?),
            WireType::Transform => WireMessage::Transform(serde_json::from_value(body)?),
            WireType::Twist => WireMessage::Twist(serde_json::from_value(body)?),
            WireType::Vector3Stamped => WireMessage::Vector3Stamped(serde_json::from_value(body)?),
            WireType::TransformStamped => {
                WireMessage::TransformStamped(serde_json::from_value(body)?)
            }
            WireType::TwistStamped => WireMessage::TwistStamped(serde_json::from_value(body)?),
        })
    }
}

/// A Rust type that is one of the [`WireMessage`] bodies.
pub trait WireRepr: Clone + Default + Send + Sync + 'static {
    const TYPE: WireType;

    fn from_message(message: &WireMessage) -> Option<&Self>;

    fn into_message(self) -> WireMessage;
}

macro_rules! wire_repr {
    ($ty:ty, $variant:ident) => {
        impl WireRepr for $ty {
            const TYPE: WireType = WireType::$variant;

            fn from_message(message: &WireMessage) -> Option<&Self> {
                match message {
                    WireMessage::$variant(m) => Some(m),
                    _ => None,
                }
            }

            fn into_message(self) -> WireMessage {
                WireMessage::$variant(self)
            }
        }
    };
}

wire_repr!(Float64Msg, Float64);
wire_repr!(UInt32Msg, UInt32);
wire_repr!(VectorMsg, Vector);
wire_repr!(Vector3, Vector3);
wire_repr!(MatrixMsg, Matrix);
wire_repr!(Transform, Transform);
wire_repr!(TwistMsg, Twist);
wire_repr!(Vector3Stamped, Vector3Stamped);
wire_repr!(TransformStamped, TransformStamped);
wire_repr!(TwistStamped, TwistStamped);
