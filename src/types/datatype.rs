//! Element data types of measures and dimensions.

use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Prefix shared by every datatype name and every primitive name.
pub const TYPE_PREFIX: &str = "oph_";

/// Supported element data types
///
/// The textual form (`oph_double`, ...) is what appears in expressions, in metadata rows and in
/// the broadcast payload.
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize)]
pub enum DataType {
    /// [i8]
    #[serde(rename = "oph_byte")]
    #[strum(serialize = "oph_byte")]
    Byte,
    /// [i16]
    #[serde(rename = "oph_short")]
    #[strum(serialize = "oph_short")]
    Short,
    /// [i32]
    #[serde(rename = "oph_int")]
    #[strum(serialize = "oph_int")]
    Int,
    /// [i64]
    #[serde(rename = "oph_long")]
    #[strum(serialize = "oph_long")]
    Long,
    /// [f32]
    #[serde(rename = "oph_float")]
    #[strum(serialize = "oph_float")]
    Float,
    /// [f64]
    #[serde(rename = "oph_double")]
    #[strum(serialize = "oph_double")]
    Double,
    /// Pair of [i32]
    #[serde(rename = "oph_complex_int")]
    #[strum(serialize = "oph_complex_int")]
    ComplexInt,
    /// Pair of [i64]
    #[serde(rename = "oph_complex_long")]
    #[strum(serialize = "oph_complex_long")]
    ComplexLong,
    /// Pair of [f32]
    #[serde(rename = "oph_complex_float")]
    #[strum(serialize = "oph_complex_float")]
    ComplexFloat,
    /// Pair of [f64]
    #[serde(rename = "oph_complex_double")]
    #[strum(serialize = "oph_complex_double")]
    ComplexDouble,
}

impl DataType {
    /// Every supported type, in declaration order.
    pub const ALL: [DataType; 10] = [
        Self::Byte,
        Self::Short,
        Self::Int,
        Self::Long,
        Self::Float,
        Self::Double,
        Self::ComplexInt,
        Self::ComplexLong,
        Self::ComplexFloat,
        Self::ComplexDouble,
    ];

    /// Returns the size of one element of the associated type in bytes.
    pub fn size_of(self) -> usize {
        match self {
            Self::Byte => std::mem::size_of::<i8>(),
            Self::Short => std::mem::size_of::<i16>(),
            Self::Int => std::mem::size_of::<i32>(),
            Self::Long => std::mem::size_of::<i64>(),
            Self::Float => std::mem::size_of::<f32>(),
            Self::Double => std::mem::size_of::<f64>(),
            Self::ComplexInt => 2 * std::mem::size_of::<i32>(),
            Self::ComplexLong => 2 * std::mem::size_of::<i64>(),
            Self::ComplexFloat => 2 * std::mem::size_of::<f32>(),
            Self::ComplexDouble => 2 * std::mem::size_of::<f64>(),
        }
    }

    /// Look a type up by name, ignoring case and surrounding whitespace.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|dtype| dtype.to_string().eq_ignore_ascii_case(name))
    }
}
