pub mod category;
pub mod datatype;

// Re-export types for convenience.
pub use crate::types::category::{Category, Classification};
pub use crate::types::datatype::{DataType, TYPE_PREFIX};
