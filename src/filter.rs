// Copyright 2025 Cowboy AI, LLC.

//! Filter composition engine
//!
//! Turns a list of (attribute, predicate) pairs into a single derived
//! cohort by invoking the backend sequentially: each step's output cohort
//! is the next step's input, so there is no valid parallel decomposition.
//!
//! Label and value accumulation keeps backend writes minimal. A chain of
//! one filter takes the creation route's label and values as returned; a
//! longer chain concatenates the two-part labels with `", "`, flattens the
//! per-step values into one list, and issues exactly one metadata-update
//! call at the end.

use crate::attribute::Attribute;
use crate::backend::CohortBackend;
use crate::cohort::{Cohort, CohortLabel, TaskKind, TaskNode};
use crate::errors::{AnalysisError, AnalysisResult};
use crate::graph::DerivationGraph;
use crate::identifiers::{CohortId, TaskId};
use crate::predicate::FilterPredicate;
use tracing::{debug, info};

/// One step of a filter chain: an attribute and the predicate to apply
#[derive(Debug, Clone, PartialEq)]
pub struct FilterStep {
    /// The attribute to filter on
    pub attribute: Attribute,
    /// The predicate to apply
    pub predicate: FilterPredicate,
}

impl FilterStep {
    /// Create a step
    pub fn new(attribute: Attribute, predicate: FilterPredicate) -> Self {
        Self { attribute, predicate }
    }
}

/// Apply a sequence of filters to a base cohort, producing one derived cohort
///
/// Steps run strictly in order. On a mid-chain failure the whole operation
/// aborts with [`AnalysisError::ChainAborted`]; cohorts already created
/// server-side during the failed chain are not cleaned up.
pub async fn multi_attribute_filter<B>(
    backend: &B,
    base: &Cohort,
    steps: &[FilterStep],
) -> AnalysisResult<Cohort>
where
    B: CohortBackend + ?Sized,
{
    if steps.is_empty() {
        return Err(AnalysisError::InvalidOperation {
            reason: "filter chain is empty".to_string(),
        });
    }

    let mut current_db = base.db_id.clone();
    let mut label: Option<CohortLabel> = None;
    let mut values = Vec::with_capacity(steps.len());

    for (step_index, step) in steps.iter().enumerate() {
        debug!(
            step = step_index,
            attribute = step.attribute.label(),
            kind = step.attribute.kind_name(),
            "applying filter step"
        );

        let handle = step
            .attribute
            .filter(backend, &current_db, &step.predicate)
            .await
            .map_err(|source| AnalysisError::ChainAborted {
                step: step_index,
                attribute: step.attribute.label().to_string(),
                source: Box::new(source),
            })?;

        current_db = handle.db_id;
        label = Some(match label {
            None => handle.label,
            Some(accumulated) => accumulated.concat(&handle.label),
        });
        values.push(step.predicate.clone());
    }

    let label = label.expect("chain applied at least one step");

    // A single filter never needs a second write; a chain needs exactly
    // one extra write so the cohort reflects the whole chain.
    if steps.len() > 1 {
        backend
            .update_cohort_metadata(&current_db, &label, &values)
            .await?;
    }

    info!(
        cohort = %current_db,
        steps = steps.len(),
        "filter chain complete"
    );
    Ok(Cohort::derived(current_db, label, values, base.source.clone()))
}

/// Arity-checked wrapper pairing attribute and predicate lists
///
/// Fails fast with [`AnalysisError::ArityMismatch`] before any backend
/// call when the list lengths differ.
pub async fn multi_filter<B>(
    backend: &B,
    base: &Cohort,
    attributes: Vec<Attribute>,
    predicates: Vec<FilterPredicate>,
) -> AnalysisResult<Cohort>
where
    B: CohortBackend + ?Sized,
{
    if attributes.len() != predicates.len() {
        return Err(AnalysisError::ArityMismatch {
            attributes: attributes.len(),
            filters: predicates.len(),
        });
    }

    let steps: Vec<FilterStep> = attributes
        .into_iter()
        .zip(predicates)
        .map(|(attribute, predicate)| FilterStep::new(attribute, predicate))
        .collect();
    multi_attribute_filter(backend, base, &steps).await
}

/// Run a filter chain and record it as a Filter task in the graph
///
/// Looks up the base cohort, applies the chain, then registers a
/// [`TaskKind::Filter`] task whose attribute list is aligned with the
/// output cohort's predicate values.
pub async fn apply_filter_task<B>(
    graph: &mut DerivationGraph,
    backend: &B,
    base: CohortId,
    steps: &[FilterStep],
) -> AnalysisResult<(TaskId, CohortId)>
where
    B: CohortBackend + ?Sized,
{
    let base_cohort = graph.cohort(base)?.clone();
    let cohort = multi_attribute_filter(backend, &base_cohort, steps).await?;

    let attributes: Vec<Attribute> = steps.iter().map(|s| s.attribute.clone()).collect();
    let task = TaskNode::new(TaskKind::Filter, cohort.label.to_string(), attributes);

    let (task_id, output_ids) = graph.register_task(task, &[base], vec![cohort])?;
    Ok((task_id, output_ids[0]))
}
