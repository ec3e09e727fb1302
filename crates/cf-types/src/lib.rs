#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Utf8,
    Number,
    Date,
    Bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Date(NaiveDate),
}

impl Scalar {
    #[must_use]
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Bool(_) => DataType::Bool,
            Self::Int64(_) | Self::Float64(_) => DataType::Number,
            Self::Utf8(_) => DataType::Utf8,
            Self::Date(_) => DataType::Date,
        }
    }

    #[must_use]
    pub fn is_empty_text(&self) -> bool {
        matches!(self, Self::Utf8(v) if v.trim().is_empty())
    }

    pub fn to_f64(&self) -> Result<f64, TypeError> {
        match self {
            Self::Bool(v) => Ok(if *v { 1.0 } else { 0.0 }),
            Self::Int64(v) => Ok(*v as f64),
            Self::Float64(v) => Ok(*v),
            Self::Utf8(v) => Err(TypeError::NonNumericValue {
                value: v.clone(),
                data_type: DataType::Utf8,
            }),
            Self::Date(v) => Err(TypeError::NonNumericValue {
                value: v.to_string(),
                data_type: DataType::Date,
            }),
        }
    }

    /// Ordering across values of the same data type; `None` when the pair is
    /// unordered (mixed types, or NaN on either side).
    #[must_use]
    pub fn ordered_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Utf8(a), Self::Utf8(b)) => Some(a.cmp(b)),
            (Self::Date(a), Self::Date(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            _ => {
                let a = self.to_f64().ok()?;
                let b = other.to_f64().ok()?;
                a.partial_cmp(&b)
            }
        }
    }

    /// Decode a plain JSON scalar under a declared data type. This is the
    /// wire-side inverse of [`Scalar::to_json`]: the preset wire format
    /// carries untyped JSON, so the owning dimension's data type decides how
    /// strings and numbers are read back.
    pub fn from_json(value: &serde_json::Value, data_type: DataType) -> Result<Self, TypeError> {
        match (data_type, value) {
            (DataType::Bool, serde_json::Value::Bool(v)) => Ok(Self::Bool(*v)),
            (DataType::Number, serde_json::Value::Number(n)) => {
                if let Some(v) = n.as_i64() {
                    Ok(Self::Int64(v))
                } else if let Some(v) = n.as_f64() {
                    Ok(Self::Float64(v))
                } else {
                    Err(TypeError::MalformedScalar {
                        value: n.to_string(),
                        data_type,
                    })
                }
            }
            (DataType::Utf8, serde_json::Value::String(v)) => Ok(Self::Utf8(v.clone())),
            (DataType::Date, serde_json::Value::String(v)) => v
                .parse::<NaiveDate>()
                .map(Self::Date)
                .map_err(|_| TypeError::MalformedScalar {
                    value: v.clone(),
                    data_type,
                }),
            (_, other) => Err(TypeError::MalformedScalar {
                value: other.to_string(),
                data_type,
            }),
        }
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(v) => serde_json::Value::Bool(*v),
            Self::Int64(v) => serde_json::Value::from(*v),
            Self::Float64(v) => serde_json::Value::from(*v),
            Self::Utf8(v) => serde_json::Value::String(v.clone()),
            Self::Date(v) => serde_json::Value::String(v.to_string()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Utf8(v) => write!(f, "{v}"),
            Self::Date(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float64(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// The value-arity an operator expects on its right-hand side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueShape {
    None,
    Single,
    Pair,
    List,
}

/// A clause's right-hand side. The variant must agree with the operator's
/// [`ValueShape`]; the predicate validator enforces that agreement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", content = "value", rename_all = "snake_case")]
pub enum ClauseValue {
    Absent,
    One(Scalar),
    Range(Scalar, Scalar),
    Many(Vec<Scalar>),
}

impl ClauseValue {
    #[must_use]
    pub fn shape(&self) -> ValueShape {
        match self {
            Self::Absent => ValueShape::None,
            Self::One(_) => ValueShape::Single,
            Self::Range(..) => ValueShape::Pair,
            Self::Many(_) => ValueShape::List,
        }
    }

    /// Wire encoding: absent → JSON null, single → scalar, range → 2-element
    /// array, list → array.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Absent => serde_json::Value::Null,
            Self::One(v) => v.to_json(),
            Self::Range(lo, hi) => serde_json::Value::Array(vec![lo.to_json(), hi.to_json()]),
            Self::Many(vs) => serde_json::Value::Array(vs.iter().map(Scalar::to_json).collect()),
        }
    }

    /// Decode a wire value. A bare JSON array is ambiguous between `Range`
    /// and `Many`, so the expected shape (derived from the clause operator)
    /// disambiguates.
    pub fn from_json(
        value: &serde_json::Value,
        shape: ValueShape,
        data_type: DataType,
    ) -> Result<Self, TypeError> {
        match shape {
            ValueShape::None => match value {
                serde_json::Value::Null => Ok(Self::Absent),
                other => Err(TypeError::UnexpectedValue {
                    value: other.to_string(),
                }),
            },
            ValueShape::Single => Ok(Self::One(Scalar::from_json(value, data_type)?)),
            ValueShape::Pair => match value.as_array() {
                Some(items) if items.len() == 2 => Ok(Self::Range(
                    Scalar::from_json(&items[0], data_type)?,
                    Scalar::from_json(&items[1], data_type)?,
                )),
                _ => Err(TypeError::MalformedRange {
                    value: value.to_string(),
                }),
            },
            ValueShape::List => match value.as_array() {
                Some(items) => Ok(Self::Many(
                    items
                        .iter()
                        .map(|item| Scalar::from_json(item, data_type))
                        .collect::<Result<Vec<_>, _>>()?,
                )),
                None => Err(TypeError::MalformedList {
                    value: value.to_string(),
                }),
            },
        }
    }
}

/// One entry in a dimension's option list: the display label and the raw
/// value submitted back through selections and lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OptionItem {
    pub label: String,
    pub value: String,
}

impl OptionItem {
    #[must_use]
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }

    /// Shorthand for options whose label and value coincide.
    #[must_use]
    pub fn plain(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            label: value.clone(),
            value,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeError {
    #[error("value {value:?} has non-numeric data type {data_type:?}")]
    NonNumericValue { value: String, data_type: DataType },
    #[error("cannot decode {value} as a {data_type:?} scalar")]
    MalformedScalar {
        value: String,
        data_type: DataType,
    },
    #[error("expected a 2-element array for a range value but found {value}")]
    MalformedRange { value: String },
    #[error("expected an array for a list value but found {value}")]
    MalformedList { value: String },
    #[error("expected no value but found {value}")]
    UnexpectedValue { value: String },
}
