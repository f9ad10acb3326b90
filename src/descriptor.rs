//! Primitive descriptor lookup.
//!
//! The framework keeps a registry describing every server-side primitive: what it returns and
//! which aggregation category it belongs to. The operator only needs those two facts, so the
//! registry is consumed through the [PrimitiveRegistry] trait.

use crate::primitive::PrimitiveTree;
use crate::types::Category;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of value a primitive returns.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnKind {
    /// A binary array of elements
    BinaryArray,
    /// A single number
    Number,
    /// Anything else
    Other,
}

/// Facts the operator needs about one primitive.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Descriptor {
    /// Name of the primitive
    pub name: String,
    /// Kind of value returned
    pub returns: ReturnKind,
    /// Aggregation category; `simple` when not declared
    #[serde(default)]
    pub category: Category,
}

impl Descriptor {
    /// Return a new Descriptor.
    pub fn new(name: impl Into<String>, returns: ReturnKind, category: Category) -> Self {
        Self {
            name: name.into(),
            returns,
            category,
        }
    }

    pub fn returns_binary_array(&self) -> bool {
        self.returns == ReturnKind::BinaryArray
    }
}

/// Descriptor lookup error
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// No descriptor for the primitive
    #[error("unknown primitive {name}")]
    Unknown { name: String },

    /// The registry could not be read
    #[error("invalid primitive registry")]
    Invalid(#[from] serde_json::Error),
}

/// Source of primitive descriptors.
pub trait PrimitiveRegistry: Send + Sync {
    /// Describe the primitive called `name`.
    fn describe(&self, name: &str) -> Result<Descriptor, DescriptorError>;
}

/// Registry held in memory, keyed by lower-case primitive name.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    descriptors: HashMap<String, Descriptor>,
}

impl StaticRegistry {
    /// Build a registry from descriptors.
    pub fn new(descriptors: impl IntoIterator<Item = Descriptor>) -> Self {
        Self {
            descriptors: descriptors
                .into_iter()
                .map(|descriptor| (descriptor.name.to_ascii_lowercase(), descriptor))
                .collect(),
        }
    }

    /// Build a registry from a JSON array of descriptors.
    pub fn from_json(json: &str) -> Result<Self, DescriptorError> {
        let descriptors: Vec<Descriptor> = serde_json::from_str(json)?;
        Ok(Self::new(descriptors))
    }
}

impl PrimitiveRegistry for StaticRegistry {
    fn describe(&self, name: &str) -> Result<Descriptor, DescriptorError> {
        self.descriptors
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| DescriptorError::Unknown {
                name: name.to_string(),
            })
    }
}

/// Outcome of describing a whole tree.
#[derive(Debug, Error)]
pub enum AnnotateError {
    /// Descriptor lookup failed
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    /// A primitive is marked as framework-internal
    #[error("primitive {name} is reserved")]
    Reserved { name: String },
}

/// Fill in return kind and category of every call in the tree.
///
/// # Arguments
///
/// * `tree`: Parsed expression
/// * `registry`: Descriptor source
pub fn annotate(
    tree: &mut PrimitiveTree,
    registry: &dyn PrimitiveRegistry,
) -> Result<(), AnnotateError> {
    for call in tree.iter_mut() {
        let descriptor = registry.describe(&call.name)?;
        if descriptor.category == Category::Identity {
            return Err(AnnotateError::Reserved {
                name: call.name.clone(),
            });
        }
        call.returns_binary_array = descriptor.returns_binary_array();
        call.category = descriptor.category;
    }
    Ok(())
}
