//! Storage connector interface.
//!
//! Fragments live in database instances managed by the engine. The operator hands each fragment
//! a query to run and never sees the dialect spoken by the instance.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Storage connector error
#[derive(Debug, Error)]
pub enum StorageError {
    /// No connection to the instance could be made
    #[error("cannot connect to dbms {dbms} database {db}")]
    Connect { dbms: i64, db: i64 },

    /// The fragment does not exist
    #[error("fragment {0} not found")]
    FragmentNotFound(String),

    /// The query failed
    #[error("query failed: {0}")]
    Query(String),
}

/// Request to build one output fragment from one input fragment.
#[derive(Clone, Debug)]
pub struct FragmentTransform<'a> {
    /// Input fragment name
    pub input: &'a str,
    /// Output fragment name
    pub output: &'a str,
    /// Expression computing the output measure from the input measure
    pub query: &'a str,
    /// Values bound to the placeholders of the query, in order
    pub bindings: &'a [Bytes],
    /// Whether to report the number of rows produced
    pub count_rows: bool,
}

/// Shape of a stored fragment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FragmentShape {
    /// Number of elements in the measure array of a row
    pub elements_per_row: u64,
    /// Number of rows
    pub rows: u64,
}

/// Connection to one database of one instance. Closed on drop.
#[async_trait]
pub trait StorageSession: Send {
    /// Build a fragment, returning the number of rows produced if requested.
    async fn transform(
        &mut self,
        transform: &FragmentTransform<'_>,
    ) -> Result<Option<u64>, StorageError>;

    /// Measure a stored fragment.
    async fn probe(&mut self, fragment: &str) -> Result<FragmentShape, StorageError>;
}

/// Entry point to the storage layer.
#[async_trait]
pub trait StorageConnector: Send + Sync {
    /// Open a session against a database of an instance.
    async fn open(&self, dbms: i64, db: i64) -> Result<Box<dyn StorageSession>, StorageError>;

    /// Evaluate an expression over bound arrays outside of any fragment.
    async fn evaluate(&self, query: &str, bindings: &[Bytes]) -> Result<Bytes, StorageError>;
}
