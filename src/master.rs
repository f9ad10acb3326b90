//! Setup performed by the root rank before anything is broadcast.
//!
//! The root resolves the input datacube, checks and classifies the expressions, registers the
//! output datacube and prepares the query every rank runs against its fragments.

use crate::classifier;
use crate::config::{DIMENSION_KEYWORD, MEASURE_KEYWORD, OPERATOR_NAME};
use crate::descriptor::{self, PrimitiveRegistry};
use crate::dimension::{self, Relabel};
use crate::error::ApplyError;
use crate::models::{TaskParameters, TypeRequest};
use crate::parser;
use crate::partition::FragmentIdSet;
use crate::payload::SetupOutcome;
use crate::pid::Pid;
use crate::primitive::PrimitiveTree;
use crate::rewrite::{self, MeasureRewrite};
use crate::store::{DatacubeRow, DimensionRow, MetadataStore, TaskRow};
use crate::typecheck::{self, TypeError};
use crate::types::{Classification, DataType};

use bytes::Bytes;
use tracing::{debug, error, warn};
use url::Url;

/// Everything the root rank knows after setup.
#[derive(Clone, Debug)]
pub struct MasterSetup {
    /// Outcome shared with every rank
    pub outcome: SetupOutcome,
    /// Dimension values bound to the query, if referenced
    pub dimension: Option<Bytes>,
    pub input: DatacubeRow,
    /// Output datacube as registered; its fragment-id set is filled in after execution
    pub output: DatacubeRow,
    /// Dimensions of the input datacube
    pub dimensions: Vec<DimensionRow>,
    pub classification: Classification,
    /// Dimension expression, if any
    pub relabel: Option<Relabel>,
    /// Non-fatal findings reported to the user
    pub warnings: Vec<String>,
}

/// Collaborators used during setup.
pub struct SetupContext<'a> {
    pub server_uri: &'a Url,
    pub store: &'a dyn MetadataStore,
    pub registry: &'a dyn PrimitiveRegistry,
}

/// An expression checked against its input.
struct CheckedExpression {
    /// Text after datatype injection
    text: String,
    tree: PrimitiveTree,
    classification: Classification,
    /// Type produced
    output_type: String,
}

/// Prepare the operation.
///
/// Nothing is written to the metadata store unless every check passed. If registering the
/// lineage fails, the output datacube is deleted again.
pub async fn setup(
    context: &SetupContext<'_>,
    parameters: &TaskParameters,
) -> Result<MasterSetup, ApplyError> {
    let pid: Pid = parameters.cube.parse()?;
    pid.check_server(context.server_uri)?;
    let input = context.store.datacube(pid.datacube).await?;
    if input.container_id != pid.container {
        return Err(ApplyError::Input(format!(
            "datacube {} does not belong to container {}",
            pid.datacube, pid.container
        )));
    }
    let fragment_ids: FragmentIdSet = input.fragment_ids.parse()?;
    let dimensions = context.store.dimensions(input.id).await?;
    let eligible: Vec<&DimensionRow> = dimensions
        .iter()
        .filter(|dimension| dimension.is_eligible_implicit())
        .collect();
    let mut warnings = vec![];

    // Measure expression.
    let dim_uses = rewrite::count_keyword(&parameters.query, DIMENSION_KEYWORD)?;
    match (dim_uses, eligible.len()) {
        (0, count) if count > 1 => {
            let warning = format!(
                "datacube has {count} implicit dimensions, the expression is applied to all of them"
            );
            warn!("{}", warning);
            warnings.push(warning);
        }
        (0, _) | (_, 1) => (),
        (_, count) => {
            return Err(ApplyError::DimensionCardinality(format!(
                "expression references the dimension but the datacube has {count} \
                 implicit dimensions"
            )))
        }
    }
    let measure = check_expression(
        context.registry,
        &parameters.query,
        &input.measure_type,
        MEASURE_KEYWORD,
        Some(DIMENSION_KEYWORD),
        parameters,
    )?;
    let measure_type = match parameters.measure_type {
        TypeRequest::Explicit(requested) if parameters.check_type.is_yes() => {
            if requested.to_string() != measure.output_type {
                return Err(TypeError::Mismatch {
                    name: measure
                        .tree
                        .root()
                        .map_or_else(String::new, |root| root.name.clone()),
                    expected: requested.to_string(),
                    found: measure.output_type,
                }
                .into());
            }
            measure.output_type
        }
        TypeRequest::Explicit(requested) => requested.to_string(),
        TypeRequest::Auto | TypeRequest::Manual => measure.output_type,
    };
    debug!(classification = %measure.classification, %measure_type, "checked measure expression");

    // Dimension expression.
    let relabel = match &parameters.dim_query {
        Some(dim_query) => {
            if rewrite::count_keyword(dim_query, MEASURE_KEYWORD)? > 0 {
                return Err(ApplyError::Input(
                    "dimension expression must not reference the measure".into(),
                ));
            }
            let [dimension] = eligible[..] else {
                return Err(ApplyError::DimensionCardinality(format!(
                    "dimension expression needs exactly one implicit dimension, found {}",
                    eligible.len()
                )));
            };
            let checked = check_expression(
                context.registry,
                dim_query,
                &dimension.datatype,
                DIMENSION_KEYWORD,
                None,
                parameters,
            )?;
            let (query, ref_count) =
                rewrite::replace_keyword(&checked.text, DIMENSION_KEYWORD, rewrite::PLACEHOLDER)?;
            Some(Relabel {
                query,
                ref_count,
                label_type: checked.output_type,
            })
        }
        None => None,
    };

    let compressed = parameters.compressed.resolve(input.compressed);
    let rewritten = rewrite::rewrite_measure(
        &measure.text,
        &MeasureRewrite {
            measure_keyword: MEASURE_KEYWORD,
            dimension_keyword: DIMENSION_KEYWORD,
            input_compressed: input.compressed,
            output_compressed: compressed,
        },
    )?;
    let dimension = match eligible.first() {
        Some(dimension) if rewritten.dim_ref_count > 0 => {
            Some(dimension::load_values(context.store, dimension).await?.bytes)
        }
        _ => None,
    };

    let explicit_size_update = measure.classification.reduces_rows();
    let explicit_size = if explicit_size_update {
        input.tuples_per_fragment.max(1)
    } else {
        1
    };
    let predicted_elements = eligible.iter().map(|dimension| dimension.size).product();

    let mut output = DatacubeRow {
        id: 0,
        container_id: input.container_id,
        measure: parameters
            .measure
            .clone()
            .unwrap_or_else(|| input.measure.clone()),
        measure_type: measure_type.clone(),
        compressed,
        level: input.level + 1,
        fragment_ids: String::new(),
        tuples_per_fragment: input.tuples_per_fragment,
        description: parameters.description.clone(),
    };
    output.id = context.store.insert_datacube(&output).await?;
    let task = TaskRow {
        output_datacube: output.id,
        input_datacube: input.id,
        operator: OPERATOR_NAME.to_string(),
        query: rewritten.query.clone(),
    };
    if let Err(err) = context.store.insert_task(&task).await {
        if let Err(rollback) = context.store.delete_datacube(output.id).await {
            error!(datacube = output.id, "failed to roll back datacube: {}", rollback);
        }
        return Err(err.into());
    }

    let outcome = SetupOutcome {
        fragment_ids: fragment_ids.to_string(),
        output_datacube_id: output.id,
        compressed,
        explicit_size_update,
        explicit_size,
        dim_ref_count: rewritten.dim_ref_count as u64,
        dim_array_len: dimension.as_ref().map_or(0, |bytes| bytes.len() as u64),
        measure_type,
        query: rewritten.query,
        predicted_elements,
    };
    Ok(MasterSetup {
        outcome,
        dimension,
        input,
        output,
        dimensions,
        classification: measure.classification,
        relabel,
        warnings,
    })
}

/// Parse, describe, classify and type-check an expression.
fn check_expression(
    registry: &dyn PrimitiveRegistry,
    expr: &str,
    input_type: &str,
    target: &str,
    subtarget: Option<&str>,
    parameters: &TaskParameters,
) -> Result<CheckedExpression, ApplyError> {
    let text = match parameters.measure_type {
        TypeRequest::Auto => {
            let dtype = DataType::from_name(input_type)
                .ok_or_else(|| ApplyError::Input(format!("unsupported datatype {input_type}")))?;
            rewrite::inject_datatypes(expr, dtype)?
        }
        _ => expr.to_string(),
    };
    let mut tree = parser::parse(&text, MEASURE_KEYWORD, DIMENSION_KEYWORD)?;
    descriptor::annotate(&mut tree, registry)?;
    let classification = classifier::classify(&tree);
    if classification == Classification::Unknown {
        return Err(ApplyError::Input(format!(
            "expression {expr} does not produce an array"
        )));
    }
    let output_type = if parameters.check_type.is_yes() {
        typecheck::validate(&tree, input_type, target, subtarget)?
    } else {
        tree.root()
            .and_then(|root| root.output_datatype.clone())
            .unwrap_or_else(|| input_type.to_string())
    };
    Ok(CheckedExpression {
        text,
        tree,
        classification,
        output_type,
    })
}
