//! Scalar and vector value representation.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use super::DataType;
use crate::error::{QuiverError, Result};

/// A single value flowing through the engine.
///
/// Values are immutable in transit between operators; operators may assemble
/// new records but never mutate another operator's emitted record. `Null`
/// stands in for absent values of nullable columns.
///
/// Equality and hashing treat floating-point values bitwise, so `Value` can
/// serve as a key in distinct sets and plan digests.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Complex32 { real: f32, imaginary: f32 },
    Complex64 { real: f64, imaginary: f64 },
    String(String),
    ByteString(Vec<u8>),
    BooleanVector(Vec<bool>),
    IntVector(Vec<i32>),
    LongVector(Vec<i64>),
    FloatVector(Vec<f32>),
    DoubleVector(Vec<f64>),
    Complex32Vector(Vec<[f32; 2]>),
    Complex64Vector(Vec<[f64; 2]>),
}

impl Value {
    /// Whether this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The data type of this value, or `None` for `Null`.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Byte(_) => Some(DataType::Byte),
            Value::Short(_) => Some(DataType::Short),
            Value::Int(_) => Some(DataType::Int),
            Value::Long(_) => Some(DataType::Long),
            Value::Float(_) => Some(DataType::Float),
            Value::Double(_) => Some(DataType::Double),
            Value::Complex32 { .. } => Some(DataType::Complex32),
            Value::Complex64 { .. } => Some(DataType::Complex64),
            Value::String(_) => Some(DataType::String),
            Value::ByteString(_) => Some(DataType::ByteString),
            Value::BooleanVector(v) => Some(DataType::BooleanVector(v.len())),
            Value::IntVector(v) => Some(DataType::IntVector(v.len())),
            Value::LongVector(v) => Some(DataType::LongVector(v.len())),
            Value::FloatVector(v) => Some(DataType::FloatVector(v.len())),
            Value::DoubleVector(v) => Some(DataType::DoubleVector(v.len())),
            Value::Complex32Vector(v) => Some(DataType::Complex32Vector(v.len())),
            Value::Complex64Vector(v) => Some(DataType::Complex64Vector(v.len())),
        }
    }

    /// Try to interpret this value as an `i64`.
    pub fn try_as_i64(&self) -> Result<i64> {
        match self {
            Value::Byte(v) => Ok(*v as i64),
            Value::Short(v) => Ok(*v as i64),
            Value::Int(v) => Ok(*v as i64),
            Value::Long(v) => Ok(*v),
            other => Err(QuiverError::type_error(format!(
                "cannot interpret {other} as LONG"
            ))),
        }
    }

    /// Try to interpret this value as an `f64`.
    pub fn try_as_f64(&self) -> Result<f64> {
        match self {
            Value::Byte(v) => Ok(*v as f64),
            Value::Short(v) => Ok(*v as f64),
            Value::Int(v) => Ok(*v as f64),
            Value::Long(v) => Ok(*v as f64),
            Value::Float(v) => Ok(*v as f64),
            Value::Double(v) => Ok(*v),
            other => Err(QuiverError::type_error(format!(
                "cannot interpret {other} as DOUBLE"
            ))),
        }
    }

    /// Try to interpret this value as a boolean.
    pub fn try_as_bool(&self) -> Result<bool> {
        match self {
            Value::Boolean(v) => Ok(*v),
            other => Err(QuiverError::type_error(format!(
                "cannot interpret {other} as BOOLEAN"
            ))),
        }
    }

    /// Try to view this value as a float vector, widening `FloatVector`
    /// and `DoubleVector` contents to `f64`.
    pub fn try_as_f64_vector(&self) -> Result<Vec<f64>> {
        match self {
            Value::FloatVector(v) => Ok(v.iter().map(|x| *x as f64).collect()),
            Value::DoubleVector(v) => Ok(v.clone()),
            Value::IntVector(v) => Ok(v.iter().map(|x| *x as f64).collect()),
            Value::LongVector(v) => Ok(v.iter().map(|x| *x as f64).collect()),
            other => Err(QuiverError::type_error(format!(
                "cannot interpret {other} as a numeric vector"
            ))),
        }
    }

    /// Total ordering between two values of the same family.
    ///
    /// Numeric scalars compare by widening to `f64` (floats use total
    /// ordering); strings and byte strings compare lexicographically. Nulls
    /// sort before every non-null value. Incomparable pairs are a type error.
    pub fn compare(&self, other: &Value) -> Result<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Ok(Ordering::Equal),
            (Value::Null, _) => Ok(Ordering::Less),
            (_, Value::Null) => Ok(Ordering::Greater),
            (Value::Boolean(a), Value::Boolean(b)) => Ok(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
            (Value::ByteString(a), Value::ByteString(b)) => Ok(a.cmp(b)),
            (a, b) if a.data_type().map_or(false, |t| t.is_numeric())
                && b.data_type().map_or(false, |t| t.is_numeric()) =>
            {
                Ok(a.try_as_f64()?.total_cmp(&b.try_as_f64()?))
            }
            (a, b) => Err(QuiverError::type_error(format!(
                "cannot compare {a} with {b}"
            ))),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Boolean(a), Boolean(b)) => a == b,
            (Byte(a), Byte(b)) => a == b,
            (Short(a), Short(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Long(a), Long(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Double(a), Double(b)) => a.to_bits() == b.to_bits(),
            (
                Complex32 { real: ar, imaginary: ai },
                Complex32 { real: br, imaginary: bi },
            ) => ar.to_bits() == br.to_bits() && ai.to_bits() == bi.to_bits(),
            (
                Complex64 { real: ar, imaginary: ai },
                Complex64 { real: br, imaginary: bi },
            ) => ar.to_bits() == br.to_bits() && ai.to_bits() == bi.to_bits(),
            (String(a), String(b)) => a == b,
            (ByteString(a), ByteString(b)) => a == b,
            (BooleanVector(a), BooleanVector(b)) => a == b,
            (IntVector(a), IntVector(b)) => a == b,
            (LongVector(a), LongVector(b)) => a == b,
            (FloatVector(a), FloatVector(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (DoubleVector(a), DoubleVector(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (Complex32Vector(a), Complex32Vector(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b).all(|(x, y)| {
                        x[0].to_bits() == y[0].to_bits() && x[1].to_bits() == y[1].to_bits()
                    })
            }
            (Complex64Vector(a), Complex64Vector(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b).all(|(x, y)| {
                        x[0].to_bits() == y[0].to_bits() && x[1].to_bits() == y[1].to_bits()
                    })
            }
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(v) => v.hash(state),
            Value::Byte(v) => v.hash(state),
            Value::Short(v) => v.hash(state),
            Value::Int(v) => v.hash(state),
            Value::Long(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Double(v) => v.to_bits().hash(state),
            Value::Complex32 { real, imaginary } => {
                real.to_bits().hash(state);
                imaginary.to_bits().hash(state);
            }
            Value::Complex64 { real, imaginary } => {
                real.to_bits().hash(state);
                imaginary.to_bits().hash(state);
            }
            Value::String(v) => v.hash(state),
            Value::ByteString(v) => v.hash(state),
            Value::BooleanVector(v) => v.hash(state),
            Value::IntVector(v) => v.hash(state),
            Value::LongVector(v) => v.hash(state),
            Value::FloatVector(v) => {
                for x in v {
                    x.to_bits().hash(state);
                }
            }
            Value::DoubleVector(v) => {
                for x in v {
                    x.to_bits().hash(state);
                }
            }
            Value::Complex32Vector(v) => {
                for x in v {
                    x[0].to_bits().hash(state);
                    x[1].to_bits().hash(state);
                }
            }
            Value::Complex64Vector(v) => {
                for x in v {
                    x[0].to_bits().hash(state);
                    x[1].to_bits().hash(state);
                }
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Byte(v) => write!(f, "{v}"),
            Value::Short(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Complex32 { real, imaginary } => write!(f, "{real}+{imaginary}i"),
            Value::Complex64 { real, imaginary } => write!(f, "{real}+{imaginary}i"),
            Value::String(v) => write!(f, "'{v}'"),
            Value::ByteString(v) => write!(f, "<{} bytes>", v.len()),
            Value::BooleanVector(v) => write!(f, "[boolean; {}]", v.len()),
            Value::IntVector(v) => write!(f, "[integer; {}]", v.len()),
            Value::LongVector(v) => write!(f, "[long; {}]", v.len()),
            Value::FloatVector(v) => write!(f, "[float; {}]", v.len()),
            Value::DoubleVector(v) => write!(f, "[double; {}]", v.len()),
            Value::Complex32Vector(v) => write!(f, "[complex32; {}]", v.len()),
            Value::Complex64Vector(v) => write!(f, "[complex64; {}]", v.len()),
        }
    }
}
