//! Parsed primitive calls.
//!
//! A [PrimitiveTree] is a flat arena of [PrimitiveCall]s in discovery order. Parent links are
//! indices into the arena and always point at a call discovered earlier, so the structure is a
//! forest whose first root sits at index 0.

use crate::types::Category;

/// One primitive call found in an expression.
#[derive(Clone, Debug, PartialEq)]
pub struct PrimitiveCall {
    /// Primitive name as written in the expression
    pub name: String,
    /// Raw positional arguments, trimmed, in order
    pub params: Vec<String>,
    /// Aggregation category, filled in from the primitive descriptor
    pub category: Category,
    /// Whether the primitive returns a binary array, filled in from the primitive descriptor
    pub returns_binary_array: bool,
    /// Declared input datatype (first argument), lower case
    pub input_datatype: Option<String>,
    /// Declared output datatype (second argument), lower case
    pub output_datatype: Option<String>,
    /// Whether an argument is the measure or dimension keyword
    pub check_datatype: bool,
    /// Index of the enclosing call, if any
    pub parent: Option<usize>,
}

impl PrimitiveCall {
    /// Return a new, not yet described, PrimitiveCall.
    pub fn new(name: impl Into<String>, params: Vec<String>, parent: Option<usize>) -> Self {
        Self {
            name: name.into(),
            params,
            category: Category::default(),
            returns_binary_array: true,
            input_datatype: None,
            output_datatype: None,
            check_datatype: false,
            parent,
        }
    }

    /// Whether one of the arguments is exactly `keyword`.
    pub fn references(&self, keyword: &str) -> bool {
        self.params.iter().any(|param| param == keyword)
    }

    /// Rebuild the call text from its name and arguments.
    pub fn source(&self) -> String {
        format!("{}({})", self.name, self.params.join(","))
    }
}

/// Arena of primitive calls.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PrimitiveTree {
    calls: Vec<PrimitiveCall>,
}

impl PrimitiveTree {
    /// Return an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a call and return its index.
    ///
    /// The parent, if any, must already be in the tree.
    pub fn push(&mut self, call: PrimitiveCall) -> usize {
        debug_assert!(call.parent.map_or(true, |parent| parent < self.calls.len()));
        self.calls.push(call);
        self.calls.len() - 1
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// The first top-level call.
    pub fn root(&self) -> Option<&PrimitiveCall> {
        self.calls.first()
    }

    pub fn get(&self, index: usize) -> Option<&PrimitiveCall> {
        self.calls.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PrimitiveCall> {
        self.calls.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, PrimitiveCall> {
        self.calls.iter_mut()
    }

    /// Indices of the direct children of the call at `index`, in discovery order.
    pub fn children(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.calls
            .iter()
            .enumerate()
            .skip(index + 1)
            .filter(move |(_, call)| call.parent == Some(index))
            .map(|(child, _)| child)
    }
}

impl std::ops::Index<usize> for PrimitiveTree {
    type Output = PrimitiveCall;

    fn index(&self, index: usize) -> &Self::Output {
        &self.calls[index]
    }
}
