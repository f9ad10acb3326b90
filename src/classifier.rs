//! Operation-type classification.
//!
//! Merges the categories of the calls in a [PrimitiveTree] bottom-up into a single verdict on how
//! the expression changes the shape of a datacube.

use crate::primitive::PrimitiveTree;
use crate::types::{Category, Classification};

/// Classify a described tree.
///
/// The verdict is taken from the first root. A tree without calls is a plain copy and classifies
/// as [Classification::Identity].
pub fn classify(tree: &PrimitiveTree) -> Classification {
    if tree.is_empty() {
        Classification::Identity
    } else {
        classify_call(tree, 0)
    }
}

fn classify_call(tree: &PrimitiveTree, index: usize) -> Classification {
    let call = &tree[index];
    if !call.returns_binary_array {
        return Classification::Unknown;
    }
    if call.category == Category::Total {
        return Classification::Total;
    }

    let mut aggregate = false;
    let mut reduce = false;
    let mut total = false;
    for child in tree.children(index) {
        match classify_call(tree, child) {
            // NOTE: the first element-wise child decides for the parent; later siblings are not
            // inspected.
            Classification::Simple | Classification::Identity => return call.category.into(),
            Classification::Aggregate => aggregate = true,
            Classification::Reduce => reduce = true,
            Classification::Total => total = true,
            Classification::Unknown => (),
        }
    }

    if reduce {
        if aggregate || call.category == Category::Aggregate {
            Classification::Total
        } else {
            Classification::Reduce
        }
    } else if aggregate {
        if call.category == Category::Reduce {
            Classification::Total
        } else {
            Classification::Aggregate
        }
    } else if total {
        Classification::Total
    } else {
        call.category.into()
    }
}
