//! Dimension values and the post-execution update of dimension metadata.
//!
//! After the fragments of the output datacube exist, rank 0 derives its dimensions from those of
//! the input: implicit dimensions follow the number of elements the expression produces per row,
//! explicit dimensions shrink by the number of rows folded into one, and the relevant implicit
//! dimension may be relabelled by a dimension expression.

use crate::compression;
use crate::error::ApplyError;
use crate::models::Compression;
use crate::storage::StorageConnector;
use crate::store::{DimensionArrays, DimensionRow, MetadataStore};
use crate::types::DataType;

use bytes::Bytes;
use tracing::debug;
use zerocopy::AsBytes;

/// Raw values of a dimension, ready to be bound to a query.
#[derive(Clone, Debug, PartialEq)]
pub struct DimensionBinding {
    /// Values in native byte order
    pub bytes: Bytes,
    /// Number of values
    pub count: usize,
    /// Size of one value in bytes
    pub width: usize,
}

impl DimensionBinding {
    /// Return a new DimensionBinding.
    ///
    /// # Arguments
    ///
    /// * `bytes`: Uncompressed values
    /// * `datatype`: Name of the element type
    pub fn new(bytes: Bytes, datatype: &str) -> Result<Self, ApplyError> {
        let width = element_width(datatype)?;
        if bytes.len() % width != 0 {
            return Err(ApplyError::DimensionCardinality(format!(
                "dimension array of {} bytes does not hold {datatype} values",
                bytes.len()
            )));
        }
        Ok(Self {
            count: bytes.len() / width,
            bytes,
            width,
        })
    }
}

fn element_width(datatype: &str) -> Result<usize, ApplyError> {
    DataType::from_name(datatype)
        .map(DataType::size_of)
        .ok_or_else(|| ApplyError::Input(format!("unsupported dimension type {datatype}")))
}

fn decompress(compression: Option<Compression>, data: &Bytes) -> Result<Bytes, ApplyError> {
    match compression {
        Some(compression) => compression::decompress(compression, data),
        None => Ok(data.clone()),
    }
}

fn compress(compression: Option<Compression>, data: Bytes) -> Result<Bytes, ApplyError> {
    match compression {
        Some(compression) => compression::compress(compression, &data),
        None => Ok(data),
    }
}

/// Load the values of a dimension.
///
/// Values are the labels when kept separately from the index, the index otherwise.
pub async fn load_values(
    store: &dyn MetadataStore,
    dimension: &DimensionRow,
) -> Result<DimensionBinding, ApplyError> {
    let arrays = store.dimension_arrays(dimension.id).await?;
    let values = arrays.labels.as_ref().unwrap_or(&arrays.index);
    let values = decompress(arrays.compression, values)?;
    let binding = DimensionBinding::new(values, &dimension.datatype)?;
    if binding.count as u64 != dimension.size {
        return Err(ApplyError::DimensionCardinality(format!(
            "dimension {} holds {} values but has size {}",
            dimension.name, binding.count, dimension.size
        )));
    }
    Ok(binding)
}

/// Contiguous index `1..=size` as `oph_long` values.
pub fn index_array(size: u64) -> Result<Bytes, ApplyError> {
    let size = i64::try_from(size)?;
    let index: Vec<i64> = (1..=size).collect();
    Ok(Bytes::copy_from_slice(index.as_bytes()))
}

/// Resize dimensions after an operation.
///
/// # Arguments
///
/// * `dimensions`: Input dimensions, in declaration order
/// * `new_elements`: Elements per row produced, if different from the input
/// * `explicit_factor`: Number of input rows folded into one output row, if greater than one
pub fn resize(
    dimensions: &[DimensionRow],
    new_elements: Option<u64>,
    explicit_factor: Option<u64>,
) -> Result<Vec<DimensionRow>, ApplyError> {
    let mut resized = dimensions.to_vec();

    if let Some(elements) = new_elements {
        let eligible: Vec<usize> = (0..resized.len())
            .filter(|&i| resized[i].is_eligible_implicit())
            .collect();
        if elements == 1 {
            eligible.iter().for_each(|&i| resized[i].collapse());
        } else if let [only] = eligible[..] {
            resized[only].size = elements;
            resized[only].level = 1;
        } else {
            return Err(ApplyError::DimensionCardinality(format!(
                "cannot assign {elements} elements per row to {} implicit dimensions",
                eligible.len()
            )));
        }
    }

    if let Some(factor) = explicit_factor {
        let mut residual = factor;
        for dimension in resized.iter_mut().rev().filter(|d| d.explicit) {
            if residual == 1 {
                break;
            }
            if dimension.size % residual == 0 {
                dimension.size /= residual;
                residual = 1;
                if dimension.size == 1 {
                    dimension.collapse();
                } else {
                    dimension.level = 1;
                }
            } else if residual % dimension.size == 0 {
                residual /= dimension.size;
                dimension.collapse();
            } else {
                return Err(ApplyError::DimensionCardinality(format!(
                    "explicit dimension {} of size {} cannot absorb a factor of {residual}",
                    dimension.name, dimension.size
                )));
            }
        }
        if residual != 1 {
            return Err(ApplyError::DimensionCardinality(format!(
                "explicit dimensions cannot absorb a factor of {factor}"
            )));
        }
    }

    Ok(resized)
}

/// Expression computing new labels for the relevant implicit dimension.
#[derive(Clone, Debug, PartialEq)]
pub struct Relabel {
    /// Expression with a placeholder for each reference to the dimension values
    pub query: String,
    /// Number of placeholders
    pub ref_count: usize,
    /// Type of the new labels
    pub label_type: String,
}

/// Inputs of [update_dimensions].
#[derive(Clone, Debug)]
pub struct DimensionUpdate<'a> {
    /// Input dimensions, in declaration order
    pub dimensions: &'a [DimensionRow],
    /// Datacube the new dimensions belong to
    pub output_datacube: i64,
    /// Elements per row produced, if different from the input
    pub new_elements: Option<u64>,
    /// Number of input rows folded into one output row, if greater than one
    pub explicit_factor: Option<u64>,
    /// Dimension expression, if any
    pub relabel: Option<&'a Relabel>,
}

/// Derive and persist the dimensions of the output datacube.
///
/// Returns the new dimension rows in declaration order.
pub async fn update_dimensions(
    store: &dyn MetadataStore,
    storage: &dyn StorageConnector,
    update: &DimensionUpdate<'_>,
) -> Result<Vec<DimensionRow>, ApplyError> {
    let mut resized = resize(update.dimensions, update.new_elements, update.explicit_factor)?;
    let relabelled = update.relabel.and_then(|relabel| {
        update
            .dimensions
            .iter()
            .rposition(DimensionRow::is_eligible_implicit)
            .map(|position| (position, relabel))
    });

    let mut arrays = vec![DimensionArrays::default(); resized.len()];
    for position in (0..resized.len()).rev() {
        let old = &update.dimensions[position];
        let new = &mut resized[position];
        let stored = store.dimension_arrays(old.id).await?;
        let labels = match relabelled {
            _ if new.level == 0 => None,
            Some((target, relabel)) if target == position => {
                let labels = relabel_values(storage, old, &stored, relabel).await?;
                let count = labels.len() / element_width(&relabel.label_type)?;
                if count as u64 != new.size {
                    return Err(ApplyError::DimensionCardinality(format!(
                        "dimension expression produced {count} values for dimension {} of size {}",
                        new.name, new.size
                    )));
                }
                new.datatype = relabel.label_type.clone();
                Some(compress(stored.compression, labels)?)
            }
            _ if new.size == old.size => Some(stored.labels.unwrap_or(stored.index)),
            _ => None,
        };
        if labels.is_none() {
            new.datatype = DataType::Long.to_string();
        }
        new.datacube_id = update.output_datacube;
        debug!(
            dimension = %new.name,
            size = new.size,
            level = new.level,
            "updated dimension"
        );
        arrays[position] = DimensionArrays {
            index: compress(stored.compression, index_array(new.size)?)?,
            labels,
            compression: stored.compression,
        };
    }

    for (dimension, arrays) in resized.iter_mut().zip(&arrays) {
        dimension.id = store.insert_dimension(dimension, arrays).await?;
    }
    Ok(resized)
}

async fn relabel_values(
    storage: &dyn StorageConnector,
    dimension: &DimensionRow,
    stored: &DimensionArrays,
    relabel: &Relabel,
) -> Result<Bytes, ApplyError> {
    let values = stored.labels.as_ref().unwrap_or(&stored.index);
    let values = decompress(stored.compression, values)?;
    let binding = DimensionBinding::new(values, &dimension.datatype)?;
    let bindings = vec![binding.bytes; relabel.ref_count];
    Ok(storage.evaluate(&relabel.query, &bindings).await?)
}
