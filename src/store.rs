//! Metadata store interface.
//!
//! The relational catalogue of containers, datacubes, dimensions and fragments is owned by the
//! engine. The operator reads and writes it through [MetadataStore].

use crate::models::Compression;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Datacube catalogue entry.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct DatacubeRow {
    pub id: i64,
    pub container_id: i64,
    /// Measure name
    pub measure: String,
    /// Measure datatype
    pub measure_type: String,
    /// Whether the measure is stored compressed
    pub compressed: bool,
    /// Number of operators applied since import
    pub level: i64,
    /// Fragment-id set
    pub fragment_ids: String,
    /// Number of rows held by a full fragment
    pub tuples_per_fragment: u64,
    pub description: Option<String>,
}

/// Dimension of a datacube, in declaration order.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct DimensionRow {
    pub id: i64,
    pub datacube_id: i64,
    pub name: String,
    /// Datatype of the dimension values
    pub datatype: String,
    /// Explicit dimensions span rows, implicit ones span the elements of a row
    pub explicit: bool,
    pub size: u64,
    /// Zero for a collapsed dimension
    pub level: i64,
}

impl DimensionRow {
    /// Whether this is an implicit dimension that has not been collapsed.
    pub fn is_eligible_implicit(&self) -> bool {
        !self.explicit && self.level > 0
    }

    /// Reduce the dimension to a single value.
    pub fn collapse(&mut self) {
        self.size = 1;
        self.level = 0;
    }
}

/// Stored value arrays of a dimension.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DimensionArrays {
    /// Positions of the dimension values
    pub index: Bytes,
    /// Dimension values, when kept separately from the index
    pub labels: Option<Bytes>,
    /// Compression of both arrays
    pub compression: Option<Compression>,
}

/// Fragment catalogue entry.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct FragmentRow {
    pub id: i64,
    pub datacube_id: i64,
    pub name: String,
    pub db_instance_id: i64,
    pub dbms_instance_id: i64,
    /// First key held, inclusive; zero for an empty fragment
    pub key_start: u64,
    /// Last key held, inclusive
    pub key_end: u64,
}

impl FragmentRow {
    /// Number of rows held, or `None` if the key range is inverted.
    pub fn span(&self) -> Option<u64> {
        if self.key_start == 0 {
            Some(0)
        } else {
            self.key_end.checked_add(1)?.checked_sub(self.key_start)
        }
    }
}

/// Lineage entry recording how a datacube was produced.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct TaskRow {
    pub output_datacube: i64,
    pub input_datacube: i64,
    pub operator: String,
    /// Query run against every fragment
    pub query: String,
}

/// Metadata store error
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested entry does not exist
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// The store failed
    #[error("metadata store failure: {0}")]
    Backend(String),
}

/// Access to the metadata store.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn datacube(&self, id: i64) -> Result<DatacubeRow, StoreError>;

    /// Dimensions of a datacube in declaration order.
    async fn dimensions(&self, datacube_id: i64) -> Result<Vec<DimensionRow>, StoreError>;

    async fn dimension_arrays(&self, dimension_id: i64) -> Result<DimensionArrays, StoreError>;

    /// Insert a datacube and return its new id. The `id` of `row` is ignored.
    async fn insert_datacube(&self, row: &DatacubeRow) -> Result<i64, StoreError>;

    async fn update_datacube(&self, row: &DatacubeRow) -> Result<(), StoreError>;

    /// Delete a datacube along with its lineage entries.
    async fn delete_datacube(&self, id: i64) -> Result<(), StoreError>;

    async fn insert_task(&self, row: &TaskRow) -> Result<i64, StoreError>;

    /// Fragments of a datacube with the given ids.
    async fn fragments(&self, datacube_id: i64, ids: &[i64])
        -> Result<Vec<FragmentRow>, StoreError>;

    /// Insert a fragment. The `id` of `row` is kept.
    async fn insert_fragment(&self, row: &FragmentRow) -> Result<(), StoreError>;

    /// Insert a dimension with its arrays and return its new id. The `id` of `row` is ignored.
    async fn insert_dimension(
        &self,
        row: &DimensionRow,
        arrays: &DimensionArrays,
    ) -> Result<i64, StoreError>;
}
