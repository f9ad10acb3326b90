//! Error handling.

use crate::comm::CommError;
use crate::descriptor::{AnnotateError, DescriptorError};
use crate::parser::ParseError;
use crate::partition::FragmentIdSetError;
use crate::payload::PayloadError;
use crate::pid::PidError;
use crate::storage::StorageError;
use crate::store::StoreError;
use crate::typecheck::TypeError;

use serde::{Deserialize, Serialize};
use std::error::Error;
use thiserror::Error;
use tracing::{event, Level};
use zune_inflate::errors::InflateDecodeErrors;

/// Apply operator error type
///
/// This type encapsulates the various errors that may occur.
/// Each variant is either caused by the task input or by a failing collaborator.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// Error compressing data
    #[error("failed to compress data")]
    Compression(#[source] std::io::Error),

    /// Error communicating with the other ranks
    #[error("communication with the process group failed")]
    Communication(#[from] CommError),

    /// Error decompressing data
    #[error("failed to decompress data")]
    DecompressionFlate2(#[from] std::io::Error),

    /// Error decompressing data
    #[error("failed to decompress data")]
    DecompressionZune(#[from] InflateDecodeErrors),

    /// Error looking up a primitive
    #[error("primitive lookup failed")]
    Descriptor(#[from] DescriptorError),

    /// Dimension array received does not have the announced length
    #[error("received dimension array of {received} bytes, expected {expected}")]
    DimensionArrayLength { expected: u64, received: u64 },

    /// The dimensions of the datacube do not support the operation
    #[error("{0}")]
    DimensionCardinality(String),

    /// A fragment does not fit the operation
    #[error("{0}")]
    FragmentConstraint(String),

    /// Invalid fragment-id set in the metadata store
    #[error("invalid fragment id set")]
    FragmentIds(#[from] FragmentIdSetError),

    /// Invalid task input
    #[error("{0}")]
    Input(String),

    /// Error from the metadata store
    #[error("metadata store request failed")]
    MetadataStore(#[from] StoreError),

    /// Error registering metrics
    #[error("failed to register metrics")]
    Metrics(#[from] prometheus::Error),

    /// Error encoding or decoding the setup payload
    #[error("invalid setup payload")]
    Payload(#[from] PayloadError),

    /// Invalid datacube PID
    #[error("invalid datacube PID")]
    Pid(#[from] PidError),

    /// A reserved primitive was used
    #[error("primitive {name} is reserved")]
    ReservedPrimitive { name: String },

    /// The root rank failed before broadcasting the setup outcome
    #[error("setup failed: {}", .0.message)]
    SetupFailed(ErrorReport),

    /// Error from the storage connector
    #[error("storage request failed")]
    Storage(#[from] StorageError),

    /// Invalid expression
    #[error("expression is not valid")]
    Syntax(#[source] ParseError),

    /// Error deserialising task parameters
    #[error("task parameters are not valid")]
    TaskParametersJson(#[from] serde_json::Error),

    /// Error validating task parameters
    #[error("task parameters are not valid")]
    TaskParametersValidation(#[from] validator::ValidationErrors),

    /// Error converting between integer types
    #[error(transparent)]
    TryFromInt(#[from] std::num::TryFromIntError),

    /// Inconsistent datatypes
    #[error("datatype check failed")]
    Type(#[from] TypeError),
}

impl From<ParseError> for ApplyError {
    fn from(error: ParseError) -> Self {
        match error {
            ParseError::ReservedPrimitive { name } => Self::ReservedPrimitive { name },
            error => Self::Syntax(error),
        }
    }
}

impl From<AnnotateError> for ApplyError {
    fn from(error: AnnotateError) -> Self {
        match error {
            AnnotateError::Descriptor(error) => Self::Descriptor(error),
            AnnotateError::Reserved { name } => Self::ReservedPrimitive { name },
        }
    }
}

/// Who is to blame for an error
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// The task input
    User,
    /// The engine or one of its collaborators
    Server,
}

impl ApplyError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApplyError::DecompressionFlate2(_)
            | ApplyError::DecompressionZune(_)
            | ApplyError::Descriptor(_)
            | ApplyError::DimensionCardinality(_)
            | ApplyError::FragmentConstraint(_)
            | ApplyError::Input(_)
            | ApplyError::Pid(_)
            | ApplyError::ReservedPrimitive { name: _ }
            | ApplyError::Syntax(_)
            | ApplyError::TaskParametersJson(_)
            | ApplyError::TaskParametersValidation(_)
            | ApplyError::Type(_) => ErrorKind::User,

            ApplyError::Compression(_)
            | ApplyError::Communication(_)
            | ApplyError::DimensionArrayLength {
                expected: _,
                received: _,
            }
            | ApplyError::FragmentIds(_)
            | ApplyError::MetadataStore(_)
            | ApplyError::Metrics(_)
            | ApplyError::Payload(_)
            | ApplyError::SetupFailed(_)
            | ApplyError::Storage(_)
            | ApplyError::TryFromInt(_) => ErrorKind::Server,
        }
    }

    /// Log the error with its causes if the server is to blame.
    pub fn log(&self) {
        if self.kind() == ErrorKind::Server {
            event!(Level::ERROR, "{}", self.to_string());
            let mut current = self.source();
            while let Some(source) = current {
                event!(Level::ERROR, "Caused by: {}", source.to_string());
                current = source.source();
            }
        }
    }
}

/// Description of an error that can cross process boundaries
///
/// Implements serde (de)serialise. Every field is always serialised, since the broadcast
/// encoding is not self-describing.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ErrorReport {
    /// Main error message
    pub message: String,

    /// Optional list of causes
    pub caused_by: Option<Vec<String>>,
}

impl ErrorReport {
    /// Return a new ErrorReport
    ///
    /// # Arguments
    ///
    /// * `error`: The error that occurred
    pub fn new<E>(error: &E) -> Self
    where
        E: std::error::Error,
    {
        let message = error.to_string();
        let mut caused_by = None;
        let mut current = error.source();
        while let Some(source) = current {
            let mut causes: Vec<String> = caused_by.unwrap_or_default();
            causes.push(source.to_string());
            caused_by = Some(causes);
            current = source.source();
        }
        // Remove duplicate entries.
        if let Some(caused_by) = caused_by.as_mut() {
            caused_by.dedup()
        }
        ErrorReport { message, caused_by }
    }
}

impl From<&ApplyError> for ErrorReport {
    fn from(error: &ApplyError) -> Self {
        match error {
            // A setup failure seen by another rank already carries the original report.
            ApplyError::SetupFailed(report) => report.clone(),
            error => Self::new(error),
        }
    }
}
