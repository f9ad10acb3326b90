//! The apply operator.
//!
//! One invocation runs on every rank of a process group and goes through the phases
//! `Init → MasterSetup → Broadcast → WorkerSetup → Distribute → Execute → Reduce → Done`.
//! Only the root rank performs `MasterSetup` and `Reduce`. A setup failure travels to the other
//! ranks inside the broadcast payload, so every rank stops at the same point.

use crate::comm::{Communicator, LocalCommunicator, LocalGroup, ROOT};
use crate::config::EngineConfig;
use crate::descriptor::PrimitiveRegistry;
use crate::dimension::{self, DimensionUpdate};
use crate::error::{ApplyError, ErrorReport};
use crate::master::{self, MasterSetup, SetupContext};
use crate::metrics;
use crate::models::TaskParameters;
use crate::partition;
use crate::payload::{self, SetupOutcome};
use crate::pid::Pid;
use crate::storage::StorageConnector;
use crate::store::MetadataStore;
use crate::worker::{self, ExecutionReport, WorkerTask};

use bytes::Bytes;
use serde_json::json;
use std::sync::Arc;
use strum_macros::Display;
use tracing::{debug, info, instrument};

/// Phase of an invocation
#[derive(Clone, Copy, Debug, Default, Display, Eq, PartialEq)]
pub enum Phase {
    #[default]
    Init,
    MasterSetup,
    Broadcast,
    WorkerSetup,
    Distribute,
    Execute,
    Reduce,
    Done,
}

/// Configuration and collaborators of a rank.
#[derive(Clone)]
pub struct Engine {
    pub config: EngineConfig,
    pub store: Arc<dyn MetadataStore>,
    pub storage: Arc<dyn StorageConnector>,
    pub registry: Arc<dyn PrimitiveRegistry>,
}

impl Engine {
    /// Prepare this process for running invocations and return its engine.
    ///
    /// Installs the tracing subscriber unless the process already has one, and registers the
    /// metrics.
    pub fn init(
        config: EngineConfig,
        store: Arc<dyn MetadataStore>,
        storage: Arc<dyn StorageConnector>,
        registry: Arc<dyn PrimitiveRegistry>,
    ) -> Result<Self, ApplyError> {
        if crate::tracing::init_tracing(config.log_filter.as_deref()).is_err() {
            debug!("keeping the installed tracing subscriber");
        }
        metrics::register_metrics()?;
        Ok(Self {
            config,
            store,
            storage,
            registry,
        })
    }

    /// Create the communicators of an in-process group of `size` ranks.
    pub fn local_group(&self, size: usize) -> Vec<LocalCommunicator> {
        LocalGroup::new(size, self.config.broadcast_capacity)
    }

    /// Run an invocation on this rank, with task parameters given as key-value pairs.
    ///
    /// Every rank receives the same parameters, so invalid ones fail on every rank.
    pub async fn apply<'a, I>(
        &self,
        parameters: I,
        comm: &mut dyn Communicator,
    ) -> Result<Option<ApplyOutput>, ApplyError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        match TaskParameters::from_map(parameters) {
            Ok(parameters) => ApplyTask::new(self, &parameters).run(comm).await,
            Err(err) => {
                metrics::record_task(false);
                err.log();
                Err(err)
            }
        }
    }
}

/// Result of an invocation, produced by the root rank.
#[derive(Clone, Debug, PartialEq)]
pub struct ApplyOutput {
    /// PID of the output datacube
    pub pid: String,
    /// Text returned to the user
    pub notification: String,
    /// Structured report
    pub report: serde_json::Value,
}

/// State built up while going through the phases.
#[derive(Default)]
struct PhaseState {
    phase: Phase,
    /// Root rank only
    master: Option<MasterSetup>,
    worker: Option<WorkerTask>,
    execution: Option<ExecutionReport>,
}

impl PhaseState {
    fn enter(&mut self, phase: Phase, rank: usize) {
        debug!(rank, from = %self.phase, to = %phase, "phase transition");
        self.phase = phase;
    }
}

/// One invocation of the operator on one rank.
pub struct ApplyTask<'a> {
    engine: &'a Engine,
    parameters: &'a TaskParameters,
}

impl<'a> ApplyTask<'a> {
    /// Return a new ApplyTask.
    pub fn new(engine: &'a Engine, parameters: &'a TaskParameters) -> Self {
        Self { engine, parameters }
    }

    /// Run the invocation.
    ///
    /// Returns the output on the root rank and `None` on every other rank.
    #[instrument(skip_all, fields(rank = comm.rank()))]
    pub async fn run(
        &self,
        comm: &mut dyn Communicator,
    ) -> Result<Option<ApplyOutput>, ApplyError> {
        let result = self.run_phases(comm).await;
        metrics::record_task(result.is_ok());
        if let Err(err) = &result {
            err.log();
        }
        result
    }

    async fn run_phases(
        &self,
        comm: &mut dyn Communicator,
    ) -> Result<Option<ApplyOutput>, ApplyError> {
        let rank = comm.rank();
        let mut state = PhaseState::default();

        let setup = if rank == ROOT {
            state.enter(Phase::MasterSetup, rank);
            let context = SetupContext {
                server_uri: &self.engine.config.server_uri,
                store: self.engine.store.as_ref(),
                registry: self.engine.registry.as_ref(),
            };
            Some(master::setup(&context, self.parameters).await)
        } else {
            None
        };

        state.enter(Phase::Broadcast, rank);
        let (outcome, dimension) = broadcast(comm, setup, &mut state).await?;

        state.enter(Phase::WorkerSetup, rank);
        let pid: Pid = self.parameters.cube.parse()?;
        let worker = WorkerTask::new(rank, pid.datacube, outcome, dimension)?;

        state.enter(Phase::Distribute, rank);
        let assignment = partition::partition(worker.fragment_ids.len(), comm.size(), rank);
        debug!(rank, offset = assignment.offset, count = assignment.count, "fragments assigned");

        state.enter(Phase::Execute, rank);
        let execution = worker::execute(
            &worker,
            &assignment,
            self.engine.store.as_ref(),
            self.engine.storage.as_ref(),
        )
        .await?;
        state.worker = Some(worker);
        state.execution = Some(execution);

        let output = match state.master.take() {
            Some(master) => {
                state.enter(Phase::Reduce, rank);
                Some(self.reduce(master, &state).await?)
            }
            None => None,
        };
        state.enter(Phase::Done, rank);
        Ok(output)
    }

    /// Finalise the output datacube and its dimensions.
    async fn reduce(
        &self,
        master: MasterSetup,
        state: &PhaseState,
    ) -> Result<ApplyOutput, ApplyError> {
        let outcome = &master.outcome;
        let execution = state.execution.unwrap_or_default();
        let explicit_factor = (outcome.explicit_size_update && outcome.explicit_size > 1)
            .then_some(outcome.explicit_size);
        let update = DimensionUpdate {
            dimensions: &master.dimensions,
            output_datacube: master.output.id,
            new_elements: execution.new_elements(outcome.predicted_elements),
            explicit_factor,
            relabel: master.relabel.as_ref(),
        };
        let dimensions = dimension::update_dimensions(
            self.engine.store.as_ref(),
            self.engine.storage.as_ref(),
            &update,
        )
        .await?;

        let mut output = master.output.clone();
        output.fragment_ids = outcome.fragment_ids.clone();
        if let Some(factor) = explicit_factor {
            output.tuples_per_fragment /= factor;
        }
        self.engine.store.update_datacube(&output).await?;

        let pid = Pid::new(
            self.engine.config.server_uri.clone(),
            output.container_id,
            output.id,
        )
        .to_string();
        let mut notification = master.warnings.join("\n");
        if !notification.is_empty() {
            notification.push('\n');
        }
        notification.push_str(&pid);
        let fragments = state
            .worker
            .as_ref()
            .map_or(0, |worker| worker.fragment_ids.len());
        info!(%pid, classification = %master.classification, "datacube created");
        Ok(ApplyOutput {
            report: json!({
                "title": "Output Cube",
                "pid": pid,
                "classification": master.classification.to_string(),
                "measure_type": output.measure_type,
                "fragments": fragments,
                "dimensions": dimensions
                    .iter()
                    .map(|dimension| json!({"name": dimension.name, "size": dimension.size}))
                    .collect::<Vec<_>>(),
            }),
            pid,
            notification,
        })
    }
}

/// Share the setup outcome, and the dimension values if referenced, with every rank.
///
/// The root always sends both messages, so no rank is left waiting when the root fails.
async fn broadcast(
    comm: &mut dyn Communicator,
    setup: Option<Result<MasterSetup, ApplyError>>,
    state: &mut PhaseState,
) -> Result<(SetupOutcome, Option<Bytes>), ApplyError> {
    let mut local_error = None;
    let message = match setup {
        Some(Ok(master)) => match payload::encode(&Ok(master.outcome.clone())) {
            Ok(message) => {
                state.master = Some(master);
                Some(message)
            }
            Err(err) => {
                let err = ApplyError::from(err);
                let message = encode_failure(&err);
                local_error = Some(err);
                Some(message)
            }
        },
        Some(Err(err)) => {
            let message = encode_failure(&err);
            local_error = Some(err);
            Some(message)
        }
        None => None,
    };
    let received = comm.broadcast(message).await?;
    metrics::APPLY_BROADCAST_BYTES.inc_by(received.len() as u64);
    if let Some(err) = local_error {
        return Err(err);
    }
    let outcome = payload::decode(&received)?.map_err(ApplyError::SetupFailed)?;

    if outcome.dim_ref_count == 0 {
        return Ok((outcome, None));
    }
    let message = state
        .master
        .as_ref()
        .map(|master| master.dimension.clone().unwrap_or_default());
    let dimension = comm.broadcast(message).await?;
    metrics::APPLY_BROADCAST_BYTES.inc_by(dimension.len() as u64);
    if dimension.len() as u64 != outcome.dim_array_len {
        return Err(ApplyError::DimensionArrayLength {
            expected: outcome.dim_array_len,
            received: dimension.len() as u64,
        });
    }
    Ok((outcome, Some(dimension)))
}

/// Encode a setup failure. Falls back to an empty message, which no rank can decode.
fn encode_failure(err: &ApplyError) -> Bytes {
    payload::encode(&Err(ErrorReport::from(err))).unwrap_or_default()
}
