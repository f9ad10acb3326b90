//! Datatype validation of a primitive composition.

use crate::primitive::{PrimitiveCall, PrimitiveTree};

use thiserror::Error;

/// Datatype validation error
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TypeError {
    /// The call does not produce a binary array
    #[error("primitive {name} does not return a binary array")]
    NotBinaryArray { name: String },

    /// The call does not declare its input or output type
    #[error("primitive {name} does not declare its input and output types")]
    MissingDatatype { name: String },

    /// Declared types do not chain
    #[error("primitive {name} expects {expected} but receives {found}")]
    Mismatch {
        name: String,
        expected: String,
        found: String,
    },
}

/// Validate the datatype chain of a tree and return the type it produces.
///
/// Checking starts at the first root. Every binary-array child must produce the type its parent
/// consumes. A call consuming data directly (no binary-array child), or one taking `target` or
/// `subtarget` as an argument, must consume `expected`.
///
/// # Arguments
///
/// * `tree`: Described tree
/// * `expected`: Type of the data the expression reads
/// * `target`: Keyword standing for the data read
/// * `subtarget`: Optional secondary keyword
pub fn validate(
    tree: &PrimitiveTree,
    expected: &str,
    target: &str,
    subtarget: Option<&str>,
) -> Result<String, TypeError> {
    if tree.is_empty() {
        return Ok(expected.to_string());
    }
    let validator = Validator {
        tree,
        expected,
        target,
        subtarget,
    };
    validator.check(0)?;
    let (_, output) = datatypes(&tree[0])?;
    Ok(output.to_string())
}

struct Validator<'a> {
    tree: &'a PrimitiveTree,
    expected: &'a str,
    target: &'a str,
    subtarget: Option<&'a str>,
}

impl Validator<'_> {
    fn check(&self, index: usize) -> Result<(), TypeError> {
        let call = &self.tree[index];
        if !call.returns_binary_array {
            return Err(TypeError::NotBinaryArray {
                name: call.name.clone(),
            });
        }
        let (input, _) = datatypes(call)?;

        let mut leaf = true;
        for child in self.tree.children(index) {
            let child_call = &self.tree[child];
            if !child_call.returns_binary_array {
                continue;
            }
            leaf = false;
            self.check(child)?;
            let (_, child_output) = datatypes(child_call)?;
            if child_output != input {
                return Err(TypeError::Mismatch {
                    name: call.name.clone(),
                    expected: input.to_string(),
                    found: child_output.to_string(),
                });
            }
        }

        if (leaf || self.reads_target(call)) && input != self.expected {
            return Err(TypeError::Mismatch {
                name: call.name.clone(),
                expected: input.to_string(),
                found: self.expected.to_string(),
            });
        }
        Ok(())
    }

    fn reads_target(&self, call: &PrimitiveCall) -> bool {
        call.check_datatype
            && (call.references(self.target)
                || self
                    .subtarget
                    .map_or(false, |subtarget| call.references(subtarget)))
    }
}

fn datatypes(call: &PrimitiveCall) -> Result<(&str, &str), TypeError> {
    match (&call.input_datatype, &call.output_datatype) {
        (Some(input), Some(output)) => Ok((input, output)),
        _ => Err(TypeError::MissingDatatype {
            name: call.name.clone(),
        }),
    }
}
