// Copyright 2025 Cowboy AI, LLC.

//! Prevalence statistics engine
//!
//! Reports what fraction of a reference population a derived cohort
//! represents, with a Wald confidence interval. The reference cohort is
//! rebuilt from the root whenever the analyst changes the selected
//! ancestor-task subset or the missing-value exclusion flag; the analyzed
//! cohort's own size never changes and is cached separately.

use crate::backend::CohortBackend;
use crate::cache::{CacheKey, FilterSignature, SessionCache};
use crate::cohort::Cohort;
use crate::errors::{AnalysisError, AnalysisResult};
use crate::filter::{multi_attribute_filter, FilterStep};
use crate::graph::{BloodlineEntry, DerivationGraph};
use crate::identifiers::{CohortId, DbCohortId, RequestToken, TaskId, TokenIssuer};
use crate::predicate::FilterPredicate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// z-score of the 95% normal-approximation interval
const Z_95: f64 = 1.96;

/// Prevalence of a cohort within a reference population
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PrevalenceMeasure {
    /// Size of the analyzed cohort
    pub size: u64,
    /// Size of the reference cohort
    pub ref_size: u64,
    /// `size / ref_size`
    pub prevalence: f64,
    /// Half-width of the 95% Wald confidence interval
    pub ci: f64,
}

/// Outcome of a prevalence computation
///
/// A zero-sized reference yields [`PrevalenceOutcome::Undefined`], never
/// `NaN` or `Infinity`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub enum PrevalenceOutcome {
    /// The reference population is empty; prevalence is undefined
    Undefined,
    /// Prevalence and confidence interval
    Computed(PrevalenceMeasure),
}

impl PrevalenceOutcome {
    /// The measure, if the computation produced one
    pub fn measure(&self) -> Option<&PrevalenceMeasure> {
        match self {
            PrevalenceOutcome::Computed(measure) => Some(measure),
            PrevalenceOutcome::Undefined => None,
        }
    }
}

/// One ancestor task's re-applicable filter
///
/// Pairs the task's attributes with the predicate values of its output
/// cohort, in the positional alignment both lists share.
#[derive(Debug, Clone)]
pub struct AncestorFilter {
    /// The ancestor task
    pub task: TaskId,
    /// The task's display label
    pub label: String,
    /// Attribute/predicate pairs, in task order
    pub steps: Vec<FilterStep>,
}

impl AncestorFilter {
    /// Extract the ancestor filters of `cohort` from its bloodline
    ///
    /// Walks the bloodline root-first and pairs each task's attribute
    /// list with the succeeding cohort's predicate values. Tasks without
    /// attributes (e.g. Combine) contribute no filter.
    pub fn from_bloodline(
        graph: &DerivationGraph,
        cohort: CohortId,
    ) -> AnalysisResult<Vec<AncestorFilter>> {
        let bloodline = graph.bloodline(cohort)?;
        let mut ancestors = Vec::new();

        for window in bloodline.windows(2) {
            let (task_id, cohort_id) = match (window[0], window[1]) {
                (BloodlineEntry::Task(t), BloodlineEntry::Cohort(c)) => (t, c),
                _ => continue,
            };
            let task = graph.task(task_id)?;
            if task.attributes.is_empty() {
                continue;
            }

            let output = graph.cohort(cohort_id)?;
            if task.attributes.len() != output.values.len() {
                return Err(AnalysisError::InvariantViolation(format!(
                    "task {task_id} has {} attributes but its output cohort carries {} values",
                    task.attributes.len(),
                    output.values.len()
                )));
            }

            let steps = task
                .attributes
                .iter()
                .cloned()
                .zip(output.values.iter().cloned())
                .map(|(attribute, predicate)| FilterStep::new(attribute, predicate))
                .collect();
            ancestors.push(AncestorFilter {
                task: task_id,
                label: task.label.clone(),
                steps,
            });
        }

        Ok(ancestors)
    }
}

/// Phase of one cohort-under-analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrevalencePhase {
    /// No reference computed yet
    Idle,
    /// Walking the ancestor task list and building the reference cohort
    BuildingReference,
    /// Reference size known; prevalence and CI derived
    Computed,
}

/// Tracks the phase, latest outcome, and request token of one view region
///
/// Every recomputation begins by issuing a fresh token; a finishing
/// computation is applied only if its token is still current. An earlier,
/// slower response can therefore never overwrite the result of a newer
/// request.
#[derive(Debug)]
pub struct PrevalenceRegion {
    issuer: TokenIssuer,
    state: Mutex<RegionState>,
}

#[derive(Debug)]
struct RegionState {
    phase: PrevalencePhase,
    outcome: Option<PrevalenceOutcome>,
}

impl Default for PrevalenceRegion {
    fn default() -> Self {
        Self::new()
    }
}

impl PrevalenceRegion {
    /// Create an idle region
    pub fn new() -> Self {
        Self {
            issuer: TokenIssuer::new(),
            state: Mutex::new(RegionState {
                phase: PrevalencePhase::Idle,
                outcome: None,
            }),
        }
    }

    /// Start a recomputation, superseding any in-flight one
    pub fn begin(&self) -> RequestToken {
        let token = self.issuer.issue();
        let mut state = self.state.lock().expect("region state poisoned");
        state.phase = PrevalencePhase::BuildingReference;
        token
    }

    /// Apply a finished computation unless it is stale
    ///
    /// Returns `false`, mutating nothing, when `token` has been
    /// superseded by a later [`PrevalenceRegion::begin`].
    pub fn complete(&self, token: RequestToken, outcome: PrevalenceOutcome) -> bool {
        if !self.issuer.is_current(token) {
            debug!(%token, "discarding stale prevalence result");
            return false;
        }
        let mut state = self.state.lock().expect("region state poisoned");
        state.phase = PrevalencePhase::Computed;
        state.outcome = Some(outcome);
        true
    }

    /// Current phase
    pub fn phase(&self) -> PrevalencePhase {
        self.state.lock().expect("region state poisoned").phase
    }

    /// Latest applied outcome
    pub fn outcome(&self) -> Option<PrevalenceOutcome> {
        self.state.lock().expect("region state poisoned").outcome
    }
}

/// Computes reference cohorts and prevalence measures
///
/// Holds the session caches for cohort sizes and reference cohorts; both
/// are keyed by immutable inputs and live for the whole session.
pub struct PrevalenceEngine {
    backend: Arc<dyn CohortBackend>,
    sizes: SessionCache<u64>,
    references: SessionCache<DbCohortId>,
}

impl PrevalenceEngine {
    /// Create an engine over the given backend
    pub fn new(backend: Arc<dyn CohortBackend>) -> Self {
        Self {
            backend,
            sizes: SessionCache::new(),
            references: SessionCache::new(),
        }
    }

    /// Compute the prevalence of `cohort` within its reference population
    ///
    /// The reference cohort is built from `root` by re-applying, in
    /// ancestor order, every *selected* ancestor task's filter; with
    /// `exclude_missing`, every unselected ancestor task contributes one
    /// not-missing filter per attribute instead. The reference signature
    /// is checked against the session cache before any composition.
    pub async fn compute(
        &self,
        root: &Cohort,
        cohort: &Cohort,
        ancestors: &[AncestorFilter],
        selected: &HashSet<TaskId>,
        exclude_missing: bool,
    ) -> AnalysisResult<PrevalenceOutcome> {
        let ref_db = self
            .reference_cohort(root, ancestors, selected, exclude_missing)
            .await?;

        let size = self.cohort_size(&cohort.db_id).await?;
        let ref_size = self.cohort_size(&ref_db).await?;

        let outcome = wald_outcome(size, ref_size);
        info!(
            cohort = %cohort.db_id,
            reference = %ref_db,
            size,
            ref_size,
            "prevalence computed"
        );
        Ok(outcome)
    }

    /// Compute prevalence for several cohorts concurrently
    ///
    /// Computations fan out and are joined before the group is considered
    /// settled; each individual filter chain remains strictly sequential.
    pub async fn compute_many(
        &self,
        root: &Cohort,
        targets: &[(Cohort, Vec<AncestorFilter>)],
        selected: &HashSet<TaskId>,
        exclude_missing: bool,
    ) -> Vec<AnalysisResult<PrevalenceOutcome>> {
        futures::future::join_all(targets.iter().map(|(cohort, ancestors)| {
            self.compute(root, cohort, ancestors, selected, exclude_missing)
        }))
        .await
    }

    /// Resolve the reference cohort for the given selection
    async fn reference_cohort(
        &self,
        root: &Cohort,
        ancestors: &[AncestorFilter],
        selected: &HashSet<TaskId>,
        exclude_missing: bool,
    ) -> AnalysisResult<DbCohortId> {
        let selected_ids: Vec<TaskId> = ancestors
            .iter()
            .filter(|ancestor| selected.contains(&ancestor.task))
            .map(|ancestor| ancestor.task)
            .collect();
        let steps = reference_steps(ancestors, selected, exclude_missing);
        if steps.is_empty() {
            // Nothing selected and nothing to exclude: the root itself is
            // the reference population.
            return Ok(root.db_id.clone());
        }

        let signature = FilterSignature::new(exclude_missing, selected_ids);
        let key = CacheKey::reference(&root.db_id, &signature);
        let backend = self.backend.clone();
        let base = root.clone();
        self.references
            .get_or_compute(&key, move || async move {
                let reference = multi_attribute_filter(backend.as_ref(), &base, &steps).await?;
                Ok(reference.db_id)
            })
            .await
    }

    /// Fetch a cohort's size through the session cache
    async fn cohort_size(&self, cohort: &DbCohortId) -> AnalysisResult<u64> {
        let key = CacheKey::size(cohort);
        let backend = self.backend.clone();
        let cohort = cohort.clone();
        self.sizes
            .get_or_compute(&key, move || async move {
                backend.cohort_size(&cohort).await
            })
            .await
    }
}

/// Build the reference filter chain for one selection
///
/// Selected ancestors contribute their original filter steps; with
/// `exclude_missing`, unselected ancestors contribute one "value is
/// present" filter per attribute. Ancestor order is preserved.
fn reference_steps(
    ancestors: &[AncestorFilter],
    selected: &HashSet<TaskId>,
    exclude_missing: bool,
) -> Vec<FilterStep> {
    let mut steps = Vec::new();
    for ancestor in ancestors {
        if selected.contains(&ancestor.task) {
            steps.extend(ancestor.steps.iter().cloned());
        } else if exclude_missing {
            steps.extend(ancestor.steps.iter().map(|step| {
                FilterStep::new(step.attribute.clone(), FilterPredicate::not_missing())
            }));
        }
    }
    steps
}

/// Derive the prevalence outcome from the two sizes
///
/// Guards the zero-reference case explicitly; at full prevalence the
/// interval collapses to zero.
fn wald_outcome(size: u64, ref_size: u64) -> PrevalenceOutcome {
    if ref_size == 0 {
        return PrevalenceOutcome::Undefined;
    }
    let prevalence = size as f64 / ref_size as f64;
    let ci = if size == ref_size {
        0.0
    } else {
        Z_95 * (prevalence * (1.0 - prevalence) / ref_size as f64).sqrt()
    };
    PrevalenceOutcome::Computed(PrevalenceMeasure {
        size,
        ref_size,
        prevalence,
        ci,
    })
}

/// Format a prevalence for display as a whole-number percentage
///
/// Percentages below 1% render as `"< 1"` rather than `"0"`.
pub fn format_percentage(prevalence: f64) -> String {
    let pct = prevalence * 100.0;
    if pct > 0.0 && pct < 1.0 {
        "< 1".to_string()
    } else {
        format!("{}", pct.round() as i64)
    }
}

/// Format a prevalence percentage for tooltips, keeping three decimals
pub fn format_raw_percentage(prevalence: f64) -> String {
    format!("{:.3}", prevalence * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    /// Full prevalence collapses the interval to zero
    #[test]
    fn test_boundary_full_prevalence() {
        let outcome = wald_outcome(250, 250);
        let measure = outcome.measure().unwrap();

        assert_eq!(measure.prevalence, 1.0);
        assert_eq!(measure.ci, 0.0);
    }

    /// A zero reference is undefined, never NaN
    #[test]
    fn test_zero_reference_undefined() {
        let outcome = wald_outcome(10, 0);
        assert_eq!(outcome, PrevalenceOutcome::Undefined);
        assert!(outcome.measure().is_none());
    }

    #[test]
    fn test_wald_interval() {
        let outcome = wald_outcome(30, 120);
        let measure = outcome.measure().unwrap();

        assert_eq!(measure.prevalence, 0.25);
        let expected = 1.96 * (0.25_f64 * 0.75 / 120.0).sqrt();
        assert!((measure.ci - expected).abs() < 1e-12);
    }

    #[test]
    fn test_zero_size_cohort() {
        let outcome = wald_outcome(0, 80);
        let measure = outcome.measure().unwrap();

        assert_eq!(measure.prevalence, 0.0);
        let expected = 0.0;
        assert_eq!(measure.ci, expected);
    }

    #[test_case(0.0, "0" ; "zero stays zero")]
    #[test_case(0.004, "< 1" ; "below one percent")]
    #[test_case(0.0099, "< 1" ; "just below one percent")]
    #[test_case(0.01, "1" ; "exactly one percent")]
    #[test_case(0.25, "25" ; "quarter")]
    #[test_case(1.0, "100" ; "full")]
    fn test_format_percentage(prevalence: f64, expected: &str) {
        assert_eq!(format_percentage(prevalence), expected);
    }

    #[test_case(0.004, "0.400")]
    #[test_case(0.123456, "12.346")]
    #[test_case(1.0, "100.000")]
    fn test_format_raw_percentage(prevalence: f64, expected: &str) {
        assert_eq!(format_raw_percentage(prevalence), expected);
    }

    #[test]
    fn test_region_phases() {
        let region = PrevalenceRegion::new();
        assert_eq!(region.phase(), PrevalencePhase::Idle);
        assert_eq!(region.outcome(), None);

        let token = region.begin();
        assert_eq!(region.phase(), PrevalencePhase::BuildingReference);

        assert!(region.complete(token, PrevalenceOutcome::Undefined));
        assert_eq!(region.phase(), PrevalencePhase::Computed);
        assert_eq!(region.outcome(), Some(PrevalenceOutcome::Undefined));
    }

    /// An older response must not overwrite a newer request's result
    #[test]
    fn test_region_staleness_discard() {
        let region = PrevalenceRegion::new();

        let token_a = region.begin();
        let token_b = region.begin();

        let outcome_b = wald_outcome(5, 10);
        assert!(region.complete(token_b, outcome_b));

        let outcome_a = wald_outcome(9, 10);
        assert!(!region.complete(token_a, outcome_a));

        // The region still reflects B's result.
        assert_eq!(region.outcome(), Some(outcome_b));
    }

    #[test]
    fn test_reference_steps_selection() {
        use crate::attribute::{server_column, DataType};
        use crate::predicate::{EqualsList, NumRange};

        let age = AncestorFilter {
            task: TaskId::new(),
            label: "age".to_string(),
            steps: vec![FilterStep::new(
                server_column("age", "Age", DataType::Number),
                FilterPredicate::NumRanges(vec![NumRange::closed(18.0, 65.0)]),
            )],
        };
        let gender = AncestorFilter {
            task: TaskId::new(),
            label: "gender".to_string(),
            steps: vec![FilterStep::new(
                server_column("gender", "Gender", DataType::Categorical),
                FilterPredicate::Equals(EqualsList::new(["Female"])),
            )],
        };

        // Only the selected task's filter is re-applied.
        let selected = HashSet::from([age.task]);
        let steps = reference_steps(&[age.clone(), gender.clone()], &selected, false);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].attribute.label(), "Age");

        // With exclusion, the unselected task contributes a not-missing
        // filter in ancestor order.
        let steps = reference_steps(&[age.clone(), gender.clone()], &selected, true);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].attribute.label(), "Gender");
        assert!(steps[1].predicate.is_not_missing_filter());

        // Nothing selected, no exclusion: empty chain.
        let steps = reference_steps(&[age, gender], &HashSet::new(), false);
        assert!(steps.is_empty());
    }
}
