//! Internal (dataflow-side) value shapes.
//!
//! Signals carry one of the [`Value`] variants.  Several internal types share
//! a representation (a Vector3 or a Twist is a plain `Vec<f64>` inside the
//! graph), so the declared [`InternalType`] tag, not the runtime value, decides
//! which wire shape a signal converts to.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geometry::{Rotation, Vector3};

// ────────────────────────────────────────────────────────────────────────────
// Type tags
// ────────────────────────────────────────────────────────────────────────────

/// Declared internal type of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InternalType {
    Scalar,
    Count,
    Vector,
    Vector3,
    Matrix,
    HomogeneousTransform,
    Twist,
    Vector3Stamped,
    HomogeneousTransformStamped,
    TwistStamped,
}

impl InternalType {
    /// Every internal type the bridge knows about.
    pub const ALL: [InternalType; 10] = [
        InternalType::Scalar,
        InternalType::Count,
        InternalType::Vector,
        InternalType::Vector3,
        InternalType::Matrix,
        InternalType::HomogeneousTransform,
        InternalType::Twist,
        InternalType::Vector3Stamped,
        InternalType::HomogeneousTransformStamped,
        InternalType::TwistStamped,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            InternalType::Scalar => "scalar",
            InternalType::Count => "count",
            InternalType::Vector => "vector",
            InternalType::Vector3 => "vector3",
            InternalType::Matrix => "matrix",
            InternalType::HomogeneousTransform => "homogeneous_transform",
            InternalType::Twist => "twist",
            InternalType::Vector3Stamped => "vector3_stamped",
            InternalType::HomogeneousTransformStamped => "homogeneous_transform_stamped",
            InternalType::TwistStamped => "twist_stamped",
        }
    }

    /// The [`Value`] representation signals of this type carry.
    pub fn repr_kind(self) -> &'static str {
        match self {
            InternalType::Scalar => f64::KIND,
            InternalType::Count => u32::KIND,
            InternalType::Vector
            | InternalType::Vector3
            | InternalType::Twist
            | InternalType::Vector3Stamped
            | InternalType::TwistStamped => Vec::<f64>::KIND,
            InternalType::Matrix => Matrix::KIND,
            InternalType::HomogeneousTransform | InternalType::HomogeneousTransformStamped => {
                MatrixHomogeneous::KIND
            }
        }
    }

    /// Parse the snake-case name used in config files and commands.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl fmt::Display for InternalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Matrix
// ────────────────────────────────────────────────────────────────────────────

/// Dense matrix stored column-major: element `(r, c)` lives at
/// `data[c * rows + r]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// A `rows x cols` matrix of zeros.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Wrap a column-major buffer.  Returns `None` when the buffer length does
    /// not match the shape.
    pub fn from_column_major(rows: usize, cols: usize, data: Vec<f64>) -> Option<Self> {
        (data.len() == rows * cols).then_some(Self { rows, cols, data })
    }

    /// Build from a row-major buffer (the natural way to write a literal).
    pub fn from_row_major(rows: usize, cols: usize, values: &[f64]) -> Option<Self> {
        if values.len() != rows * cols {
            return None;
        }
        let mut m = Self::zeros(rows, cols);
        for r in 0..rows {
            for c in 0..cols {
                m.set(r, c, values[r * cols + c]);
            }
        }
        Some(m)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[col * self.rows + row]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[col * self.rows + row] = value;
    }

    /// The column-major buffer.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Reshape to `rows x cols`, zero-filling the buffer.
    pub fn resize(&mut self, rows: usize, cols: usize) {
        self.rows = rows;
        self.cols = cols;
        self.data.clear();
        self.data.resize(rows * cols, 0.0);
    }

    /// Mutable access to the column-major buffer.
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }
}

// ────────────────────────────────────────────────────────────────────────────
// MatrixHomogeneous
// ────────────────────────────────────────────────────────────────────────────

/// 4x4 rigid transform: rotation block in the upper-left 3x3, translation in
/// the last column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatrixHomogeneous {
    m: [[f64; 4]; 4],
}

impl Default for MatrixHomogeneous {
    fn default() -> Self {
        Self::identity()
    }
}

impl MatrixHomogeneous {
    pub fn identity() -> Self {
        let mut m = [[0.0; 4]; 4];
        for (i, row) in m.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        Self { m }
    }

    pub fn from_parts(rotation: &Rotation, translation: Vector3) -> Self {
        let mut h = Self::identity();
        h.set_rotation(rotation);
        h.set_translation(translation);
        h
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.m[row][col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.m[row][col] = value;
    }

    pub fn rotation(&self) -> Rotation {
        let mut r = [[0.0; 3]; 3];
        for (i, row) in r.iter_mut().enumerate() {
            row.copy_from_slice(&self.m[i][..3]);
        }
        r
    }

    pub fn set_rotation(&mut self, rotation: &Rotation) {
        for (i, row) in rotation.iter().enumerate() {
            self.m[i][..3].copy_from_slice(row);
        }
    }

    pub fn translation(&self) -> Vector3 {
        Vector3::new(self.m[0][3], self.m[1][3], self.m[2][3])
    }

    pub fn set_translation(&mut self, t: Vector3) {
        self.m[0][3] = t.x;
        self.m[1][3] = t.y;
        self.m[2][3] = t.z;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Value
// ────────────────────────────────────────────────────────────────────────────

/// A value flowing through the dataflow graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f64),
    Count(u32),
    Vector(Vec<f64>),
    Matrix(Matrix),
    Homogeneous(MatrixHomogeneous),
}

impl Value {
    /// Short name of the representation, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Scalar(_) => f64::KIND,
            Value::Count(_) => u32::KIND,
            Value::Vector(_) => Vec::<f64>::KIND,
            Value::Matrix(_) => Matrix::KIND,
            Value::Homogeneous(_) => MatrixHomogeneous::KIND,
        }
    }

    /// The default value carried by a signal of type `ty` before it has been
    /// computed or received.
    pub fn default_for(ty: InternalType) -> Self {
        match ty {
            InternalType::Scalar => Value::Scalar(0.0),
            InternalType::Count => Value::Count(0),
            InternalType::Vector => Value::Vector(Vec::new()),
            InternalType::Vector3 | InternalType::Vector3Stamped => Value::Vector(vec![0.0; 3]),
            InternalType::Twist | InternalType::TwistStamped => Value::Vector(vec![0.0; 6]),
            InternalType::Matrix => Value::Matrix(Matrix::default()),
            InternalType::HomogeneousTransform | InternalType::HomogeneousTransformStamped => {
                Value::Homogeneous(MatrixHomogeneous::identity())
            }
        }
    }
}

/// A Rust type that can sit inside a [`Value`].
pub trait InternalRepr: Clone + Default + Send + Sync + 'static {
    /// Name reported when a value of another shape shows up.
    const KIND: &'static str;

    /// Internal type a signal of this representation declares by default.
    const CANONICAL: InternalType;

    fn from_value(value: &Value) -> Option<&Self>;

    fn into_value(self) -> Value;
}

macro_rules! internal_repr {
    ($ty:ty, $variant:ident, $kind:literal, $canonical:ident) => {
        impl InternalRepr for $ty {
            const KIND: &'static str = $kind;
            const CANONICAL: InternalType = InternalType::$canonical;

            fn from_value(value: &Value) -> Option<&Self> {
                match value {
                    Value::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn into_value(self) -> Value {
                Value::$variant(self)
            }
        }
    };
}

internal_repr!(f64, Scalar, "scalar", Scalar);
internal_repr!(u32, Count, "count", Count);
internal_repr!(Vec<f64>, Vector, "vector", Vector);
internal_repr!(Matrix, Matrix, "matrix", Matrix);
internal_repr!(MatrixHomogeneous, Homogeneous, "homogeneous", HomogeneousTransform);
