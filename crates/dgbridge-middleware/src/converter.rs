//! Typed internal <-> wire converters.
//!
//! Each supported `(internal, wire)` pair is a zero-sized marker type that
//! implements [`Conversion`].  The set is closed: a pair without a marker
//! (say a stamped scalar) does not compile.
//!
//! | Marker | Internal | Wire |
//! |---|---|---|
//! | [`ScalarConv`] | `f64` | [`Float64Msg`] |
//! | [`CountConv`] | `u32` | [`UInt32Msg`] |
//! | [`VectorConv`] | `Vec<f64>` | [`VectorMsg`] |
//! | [`Vector3Conv`] | `Vec<f64>` | [`Vector3`] |
//! | [`MatrixConv`] | [`Matrix`] | [`MatrixMsg`] |
//! | [`HomogeneousConv`] | [`MatrixHomogeneous`] | [`Transform`] |
//! | [`TwistConv`] | `Vec<f64>` | [`TwistMsg`] |
//! | [`Stamped<Vector3Conv>`] | `Vec<f64>` | [`Vector3Stamped`] |
//! | [`Stamped<HomogeneousConv>`] | [`MatrixHomogeneous`] | [`TransformStamped`] |
//! | [`Stamped<TwistConv>`] | `Vec<f64>` | [`TwistStamped`] |
//!
//! Conversions write into an existing destination; see
//! [`Vector3Conv::to_wire`], which only overwrites the components its source
//! has.

use std::marker::PhantomData;

use dgbridge_types::{
    ConversionError, Float64Msg, Header, InternalRepr, InternalType, Matrix, MatrixHomogeneous,
    MatrixMsg, Quaternion, Transform, TransformStamped, TwistMsg, TwistStamped, UInt32Msg,
    Vector3, Vector3Stamped, VectorMsg, WireRepr,
};

/// Number of components of an internal twist vector.
pub const TWIST_LEN: usize = 6;

/// A registered `(internal, wire)` conversion pair.
pub trait Conversion {
    type Internal: InternalRepr;
    type Wire: WireRepr;

    /// Declared internal type this pair serves.
    const INTERNAL: InternalType;

    /// Write `src` into `dst`.
    fn to_wire(dst: &mut Self::Wire, src: &Self::Internal) -> Result<(), ConversionError>;

    /// Write `src` into `dst`.
    fn to_internal(dst: &mut Self::Internal, src: &Self::Wire) -> Result<(), ConversionError>;

    /// Convert from a shared wire instance (e.g. `Arc<Wire>` handed out by a
    /// subscription).  The instance is only borrowed for the duration of the
    /// call.
    fn to_internal_shared<R>(dst: &mut Self::Internal, src: &R) -> Result<(), ConversionError>
    where
        R: AsRef<Self::Wire> + ?Sized,
    {
        Self::to_internal(dst, src.as_ref())
    }

    /// Convert into a fresh, default-initialised wire value.
    fn wire_of(src: &Self::Internal) -> Result<Self::Wire, ConversionError> {
        let mut dst = Self::Wire::default();
        Self::to_wire(&mut dst, src)?;
        Ok(dst)
    }

    /// Convert into a fresh, default-initialised internal value.
    fn internal_of(src: &Self::Wire) -> Result<Self::Internal, ConversionError> {
        let mut dst = Self::Internal::default();
        Self::to_internal(&mut dst, src)?;
        Ok(dst)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Plain pairs
// ────────────────────────────────────────────────────────────────────────────

/// `f64` <-> `std_msgs/Float64`.
pub struct ScalarConv;

impl Conversion for ScalarConv {
    type Internal = f64;
    type Wire = Float64Msg;
    const INTERNAL: InternalType = InternalType::Scalar;

    fn to_wire(dst: &mut Float64Msg, src: &f64) -> Result<(), ConversionError> {
        dst.data = *src;
        Ok(())
    }

    fn to_internal(dst: &mut f64, src: &Float64Msg) -> Result<(), ConversionError> {
        *dst = src.data;
        Ok(())
    }
}

/// `u32` <-> `std_msgs/UInt32`.
pub struct CountConv;

impl Conversion for CountConv {
    type Internal = u32;
    type Wire = UInt32Msg;
    const INTERNAL: InternalType = InternalType::Count;

    fn to_wire(dst: &mut UInt32Msg, src: &u32) -> Result<(), ConversionError> {
        dst.data = *src;
        Ok(())
    }

    fn to_internal(dst: &mut u32, src: &UInt32Msg) -> Result<(), ConversionError> {
        *dst = src.data;
        Ok(())
    }
}

/// Variable-length vector <-> indexed buffer.
pub struct VectorConv;

impl Conversion for VectorConv {
    type Internal = Vec<f64>;
    type Wire = VectorMsg;
    const INTERNAL: InternalType = InternalType::Vector;

    fn to_wire(dst: &mut VectorMsg, src: &Vec<f64>) -> Result<(), ConversionError> {
        dst.data.clear();
        dst.data.extend_from_slice(src);
        Ok(())
    }

    fn to_internal(dst: &mut Vec<f64>, src: &VectorMsg) -> Result<(), ConversionError> {
        dst.clear();
        dst.extend_from_slice(&src.data);
        Ok(())
    }
}

/// Vector <-> named x/y/z fields.
///
/// `to_wire` only writes the components present in the source: a length-1
/// vector sets `x` and leaves `y`/`z` as they were in `dst`.  `to_internal`
/// always yields three components.  Shrinking round-trips are therefore not
/// lossless.
pub struct Vector3Conv;

impl Conversion for Vector3Conv {
    type Internal = Vec<f64>;
    type Wire = Vector3;
    const INTERNAL: InternalType = InternalType::Vector3;

    fn to_wire(dst: &mut Vector3, src: &Vec<f64>) -> Result<(), ConversionError> {
        if let Some(&x) = src.first() {
            dst.x = x;
        }
        if let Some(&y) = src.get(1) {
            dst.y = y;
        }
        if let Some(&z) = src.get(2) {
            dst.z = z;
        }
        Ok(())
    }

    fn to_internal(dst: &mut Vec<f64>, src: &Vector3) -> Result<(), ConversionError> {
        dst.clear();
        dst.extend_from_slice(&[src.x, src.y, src.z]);
        Ok(())
    }
}

/// Matrix <-> `{ width, data }`.
///
/// `width` is the row count; `data` is the column-major flattening, the same
/// order [`Matrix`] stores internally.  Both directions agree on both points,
/// so the round-trip is exact.
pub struct MatrixConv;

impl Conversion for MatrixConv {
    type Internal = Matrix;
    type Wire = MatrixMsg;
    const INTERNAL: InternalType = InternalType::Matrix;

    fn to_wire(dst: &mut MatrixMsg, src: &Matrix) -> Result<(), ConversionError> {
        dst.width = u32::try_from(src.rows()).map_err(|_| ConversionError::InvalidMatrixWidth {
            width: u32::MAX,
            len: src.as_slice().len(),
        })?;
        dst.data.clear();
        dst.data.extend_from_slice(src.as_slice());
        Ok(())
    }

    fn to_internal(dst: &mut Matrix, src: &MatrixMsg) -> Result<(), ConversionError> {
        let len = src.data.len();
        let width = src.width as usize;
        if width == 0 {
            if len != 0 {
                return Err(ConversionError::InvalidMatrixWidth { width: src.width, len });
            }
            dst.resize(0, 0);
            return Ok(());
        }
        if len % width != 0 {
            return Err(ConversionError::InvalidMatrixWidth { width: src.width, len });
        }
        dst.resize(width, len / width);
        dst.as_mut_slice().copy_from_slice(&src.data);
        Ok(())
    }
}

/// 4x4 homogeneous matrix <-> translation + quaternion.
///
/// The quaternion is extracted with Shepperd's method (see
/// [`Quaternion::from_rotation`]); the way back rebuilds an orthonormal block
/// from the quaternion.  Round-trips hold within floating-point tolerance.
pub struct HomogeneousConv;

impl Conversion for HomogeneousConv {
    type Internal = MatrixHomogeneous;
    type Wire = Transform;
    const INTERNAL: InternalType = InternalType::HomogeneousTransform;

    fn to_wire(dst: &mut Transform, src: &MatrixHomogeneous) -> Result<(), ConversionError> {
        dst.rotation = Quaternion::from_rotation(&src.rotation());
        dst.translation = src.translation();
        Ok(())
    }

    fn to_internal(dst: &mut MatrixHomogeneous, src: &Transform) -> Result<(), ConversionError> {
        let rotation = src
            .rotation
            .to_rotation()
            .ok_or(ConversionError::DegenerateQuaternion)?;
        dst.set_rotation(&rotation);
        dst.set_translation(src.translation);
        Ok(())
    }
}

/// Six-component vector <-> linear + angular.
///
/// The source must have exactly [`TWIST_LEN`] components; nothing is padded
/// or truncated.
pub struct TwistConv;

impl Conversion for TwistConv {
    type Internal = Vec<f64>;
    type Wire = TwistMsg;
    const INTERNAL: InternalType = InternalType::Twist;

    fn to_wire(dst: &mut TwistMsg, src: &Vec<f64>) -> Result<(), ConversionError> {
        let &[lx, ly, lz, ax, ay, az] = src.as_slice() else {
            return Err(ConversionError::InvalidLength {
                kind: InternalType::Twist,
                expected: TWIST_LEN,
                actual: src.len(),
            });
        };
        dst.linear = Vector3::new(lx, ly, lz);
        dst.angular = Vector3::new(ax, ay, az);
        Ok(())
    }

    fn to_internal(dst: &mut Vec<f64>, src: &TwistMsg) -> Result<(), ConversionError> {
        dst.clear();
        dst.extend_from_slice(&[
            src.linear.x,
            src.linear.y,
            src.linear.z,
            src.angular.x,
            src.angular.y,
            src.angular.z,
        ]);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stamped pairs
// ────────────────────────────────────────────────────────────────────────────

/// A conversion that also exists in a header-carrying form.
pub trait StampedInner: Conversion {
    type Stamped: WireRepr;
    const STAMPED: InternalType;

    fn header_mut(msg: &mut Self::Stamped) -> &mut Header;

    fn inner(msg: &Self::Stamped) -> &Self::Wire;

    fn inner_mut(msg: &mut Self::Stamped) -> &mut Self::Wire;

    /// Type-specific fields to reset on every outgoing message.
    fn finish(_msg: &mut Self::Stamped) {}
}

impl StampedInner for Vector3Conv {
    type Stamped = Vector3Stamped;
    const STAMPED: InternalType = InternalType::Vector3Stamped;

    fn header_mut(msg: &mut Vector3Stamped) -> &mut Header {
        &mut msg.header
    }

    fn inner(msg: &Vector3Stamped) -> &Vector3 {
        &msg.vector
    }

    fn inner_mut(msg: &mut Vector3Stamped) -> &mut Vector3 {
        &mut msg.vector
    }
}

impl StampedInner for HomogeneousConv {
    type Stamped = TransformStamped;
    const STAMPED: InternalType = InternalType::HomogeneousTransformStamped;

    fn header_mut(msg: &mut TransformStamped) -> &mut Header {
        &mut msg.header
    }

    fn inner(msg: &TransformStamped) -> &Transform {
        &msg.transform
    }

    fn inner_mut(msg: &mut TransformStamped) -> &mut Transform {
        &mut msg.transform
    }

    fn finish(msg: &mut TransformStamped) {
        msg.child_frame_id.clear();
    }
}

impl StampedInner for TwistConv {
    type Stamped = TwistStamped;
    const STAMPED: InternalType = InternalType::TwistStamped;

    fn header_mut(msg: &mut TwistStamped) -> &mut Header {
        &mut msg.header
    }

    fn inner(msg: &TwistStamped) -> &TwistMsg {
        &msg.twist
    }

    fn inner_mut(msg: &mut TwistStamped) -> &mut TwistMsg {
        &mut msg.twist
    }
}

/// Stamped form of the pair `C`.
///
/// Outgoing messages get a fresh header (sequence 0, stamp sampled now, the
/// bridge's world frame).  Incoming headers are discarded: only the inner
/// value reaches the graph, the timestamp does not.
pub struct Stamped<C>(PhantomData<C>);

impl<C: StampedInner> Conversion for Stamped<C> {
    type Internal = C::Internal;
    type Wire = C::Stamped;
    const INTERNAL: InternalType = C::STAMPED;

    fn to_wire(dst: &mut C::Stamped, src: &C::Internal) -> Result<(), ConversionError> {
        *C::header_mut(dst) = Header::now();
        C::to_wire(C::inner_mut(dst), src)?;
        C::finish(dst);
        Ok(())
    }

    fn to_internal(dst: &mut C::Internal, src: &C::Stamped) -> Result<(), ConversionError> {
        C::to_internal(dst, C::inner(src))
    }
}
