//! Aggregation categories of primitives and of whole expressions.

use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Aggregation category declared by a primitive descriptor.
///
/// * `Simple`: element-wise, sizes unchanged.
/// * `Aggregate`: reduces the elements of each row (implicit dimensions).
/// * `Reduce`: reduces rows (explicit dimensions).
/// * `Total`: both of the above.
/// * `Identity`: framework-internal marker, never user-composable.
#[derive(Clone, Copy, Debug, Default, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Category {
    Identity,
    #[default]
    Simple,
    Aggregate,
    Reduce,
    Total,
}

/// Aggregation semantics inferred for a whole expression.
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Classification {
    Unknown,
    Identity,
    Simple,
    Aggregate,
    Reduce,
    Total,
}

impl Classification {
    /// Whether the operation changes the number of rows.
    pub fn reduces_rows(self) -> bool {
        matches!(self, Self::Reduce | Self::Total)
    }
}

impl From<Category> for Classification {
    fn from(category: Category) -> Self {
        match category {
            Category::Identity => Self::Identity,
            Category::Simple => Self::Simple,
            Category::Aggregate => Self::Aggregate,
            Category::Reduce => Self::Reduce,
            Category::Total => Self::Total,
        }
    }
}
