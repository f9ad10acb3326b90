//! Fragment execution, performed by every rank on its share of the fragments.

use crate::error::ApplyError;
use crate::metrics;
use crate::partition::{FragmentAssignment, FragmentIdSet};
use crate::payload::SetupOutcome;
use crate::storage::{FragmentShape, FragmentTransform, StorageConnector, StorageSession};
use crate::store::{FragmentRow, MetadataStore, StoreError};

use bytes::Bytes;
use hashbrown::HashSet;
use std::time::Instant;
use tracing::{debug, instrument};

/// State of a rank after receiving the setup outcome.
#[derive(Clone, Debug)]
pub struct WorkerTask {
    pub rank: usize,
    pub input_datacube_id: i64,
    pub outcome: SetupOutcome,
    pub fragment_ids: FragmentIdSet,
    /// One binding per dimension placeholder in the query
    pub bindings: Vec<Bytes>,
}

impl WorkerTask {
    /// Prepare a rank for execution.
    ///
    /// # Arguments
    ///
    /// * `rank`: Rank of this process
    /// * `input_datacube_id`: Identifier of the input datacube
    /// * `outcome`: Setup outcome received from the root rank
    /// * `dimension`: Dimension values received from the root rank, if referenced
    pub fn new(
        rank: usize,
        input_datacube_id: i64,
        outcome: SetupOutcome,
        dimension: Option<Bytes>,
    ) -> Result<Self, ApplyError> {
        if outcome.explicit_size == 0 {
            return Err(ApplyError::FragmentConstraint(
                "explicit size must be positive".into(),
            ));
        }
        let fragment_ids = outcome.fragment_ids.parse()?;
        let dim_ref_count = usize::try_from(outcome.dim_ref_count)?;
        let bindings = match dimension {
            Some(dimension) => vec![dimension; dim_ref_count],
            None if dim_ref_count == 0 => vec![],
            None => {
                return Err(ApplyError::DimensionArrayLength {
                    expected: outcome.dim_array_len,
                    received: 0,
                })
            }
        };
        Ok(Self {
            rank,
            input_datacube_id,
            outcome,
            fragment_ids,
            bindings,
        })
    }

    /// Name of the `seq`-th fragment produced by this rank.
    pub fn fragment_name(&self, seq: usize) -> String {
        format!("dc{}_r{}_f{}", self.outcome.output_datacube_id, self.rank, seq)
    }
}

/// What a rank learnt while executing.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ExecutionReport {
    /// Number of fragments produced
    pub fragments: usize,
    /// Shape of the first non-empty fragment produced
    pub shape: Option<FragmentShape>,
}

impl ExecutionReport {
    /// Elements per row, if they differ from the prediction.
    pub fn new_elements(&self, predicted: u64) -> Option<u64> {
        self.shape
            .map(|shape| shape.elements_per_row)
            .filter(|&elements| elements != predicted)
    }
}

/// Build the output fragments of the assigned input fragments.
///
/// Every fragment is checked before the first is built, so a constraint violation leaves no
/// output behind.
#[instrument(skip_all, fields(rank = task.rank))]
pub async fn execute(
    task: &WorkerTask,
    assignment: &FragmentAssignment,
    store: &dyn MetadataStore,
    storage: &dyn StorageConnector,
) -> Result<ExecutionReport, ApplyError> {
    let mut report = ExecutionReport::default();
    let ids = task.fragment_ids.assigned(assignment);
    if ids.is_empty() {
        debug!("no fragments assigned");
        return Ok(report);
    }
    let mut fragments = store.fragments(task.input_datacube_id, &ids).await?;
    check_fetched(&ids, &fragments)?;
    fragments.sort_by_key(|fragment| {
        (
            fragment.dbms_instance_id,
            fragment.db_instance_id,
            fragment.id,
        )
    });

    let outcome = &task.outcome;
    for fragment in &fragments {
        let span = span(fragment)?;
        if outcome.explicit_size_update && span % outcome.explicit_size != 0 {
            return Err(ApplyError::FragmentConstraint(format!(
                "fragment {} holds {span} rows, not a multiple of {}",
                fragment.name, outcome.explicit_size
            )));
        }
    }

    let mut seq = 0;
    for group in fragments.chunk_by(|a, b| {
        (a.dbms_instance_id, a.db_instance_id) == (b.dbms_instance_id, b.db_instance_id)
    }) {
        let mut session = storage
            .open(group[0].dbms_instance_id, group[0].db_instance_id)
            .await?;
        for fragment in group {
            seq += 1;
            let produced = transform(task, session.as_mut(), fragment, seq, &mut report).await?;
            store.insert_fragment(&produced).await?;
            report.fragments += 1;
        }
    }
    debug!(fragments = report.fragments, "fragments produced");
    Ok(report)
}

/// Check that the store returned exactly the requested fragments.
fn check_fetched(ids: &[i64], fragments: &[FragmentRow]) -> Result<(), ApplyError> {
    let fetched: HashSet<i64> = fragments.iter().map(|fragment| fragment.id).collect();
    if let Some(&id) = ids.iter().find(|id| !fetched.contains(*id)) {
        return Err(StoreError::NotFound {
            entity: "fragment",
            id,
        }
        .into());
    }
    if fragments.len() != ids.len() {
        return Err(StoreError::Backend(format!(
            "requested {} fragments, received {}",
            ids.len(),
            fragments.len()
        ))
        .into());
    }
    Ok(())
}

fn span(fragment: &FragmentRow) -> Result<u64, ApplyError> {
    fragment.span().ok_or_else(|| {
        ApplyError::FragmentConstraint(format!(
            "fragment {} has inverted key range {}:{}",
            fragment.name, fragment.key_start, fragment.key_end
        ))
    })
}

async fn transform(
    task: &WorkerTask,
    session: &mut dyn StorageSession,
    fragment: &FragmentRow,
    seq: usize,
    report: &mut ExecutionReport,
) -> Result<FragmentRow, ApplyError> {
    let outcome = &task.outcome;
    let name = task.fragment_name(seq);
    let span = span(fragment)?;
    let expected_rows = span / outcome.explicit_size;

    let start = Instant::now();
    let rows = session
        .transform(&FragmentTransform {
            input: &fragment.name,
            output: &name,
            query: &outcome.query,
            bindings: &task.bindings,
            count_rows: outcome.explicit_size_update,
        })
        .await?;
    metrics::record_fragment(start.elapsed());
    if let Some(rows) = rows {
        if rows != expected_rows {
            return Err(ApplyError::FragmentConstraint(format!(
                "fragment {name} has {rows} rows, expected {expected_rows}"
            )));
        }
    }

    if report.shape.is_none() && span > 0 {
        let shape = session.probe(&name).await?;
        if shape.rows != expected_rows {
            return Err(ApplyError::FragmentConstraint(format!(
                "fragment {name} has {} rows, expected {expected_rows}",
                shape.rows
            )));
        }
        debug!(
            fragment = %name,
            elements_per_row = shape.elements_per_row,
            rows = shape.rows,
            "probed fragment"
        );
        report.shape = Some(shape);
    }

    let (key_start, key_end) = if outcome.explicit_size_update && span > 0 {
        let size = outcome.explicit_size;
        ((fragment.key_start - 1) / size + 1, fragment.key_end / size)
    } else {
        (fragment.key_start, fragment.key_end)
    };
    Ok(FragmentRow {
        id: fragment.id,
        datacube_id: outcome.output_datacube_id,
        name,
        db_instance_id: fragment.db_instance_id,
        dbms_instance_id: fragment.dbms_instance_id,
        key_start,
        key_end,
    })
}
