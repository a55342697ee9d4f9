//! Derivation graph over cohorts and tasks
//!
//! The graph is an arena of id-keyed nodes with explicit edge lists, so
//! traversal and cascading removal are plain graph operations rather than
//! pointer surgery. The graph is write-once per derivation: nodes are
//! added as tasks execute and removed only by the explicit cascade, never
//! rewired.

use crate::cohort::{Cohort, TaskKind, TaskNode};
use crate::errors::{AnalysisError, AnalysisResult};
use crate::identifiers::{CohortId, TaskId};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

/// One entry of a bloodline: a cohort or a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BloodlineEntry {
    /// A cohort on the ancestor path
    Cohort(CohortId),
    /// A task on the ancestor path
    Task(TaskId),
}

impl BloodlineEntry {
    /// The cohort id, if this entry is a cohort
    pub fn as_cohort(&self) -> Option<CohortId> {
        match self {
            BloodlineEntry::Cohort(id) => Some(*id),
            BloodlineEntry::Task(_) => None,
        }
    }

    /// The task id, if this entry is a task
    pub fn as_task(&self) -> Option<TaskId> {
        match self {
            BloodlineEntry::Task(id) => Some(*id),
            BloodlineEntry::Cohort(_) => None,
        }
    }
}

/// Arena-based cohort/task derivation graph
///
/// Nodes are stored in insertion-ordered maps keyed by stable ids;
/// relationships are explicit edge lists. Exactly one cohort is initial
/// and roots every bloodline.
#[derive(Debug, Default)]
pub struct DerivationGraph {
    cohorts: IndexMap<CohortId, Cohort>,
    tasks: IndexMap<TaskId, TaskNode>,
    task_inputs: HashMap<TaskId, Vec<CohortId>>,
    task_outputs: HashMap<TaskId, Vec<CohortId>>,
    /// Tasks that produced the cohort (normally one)
    parent_tasks: HashMap<CohortId, Vec<TaskId>>,
    /// Tasks that consume the cohort
    child_tasks: HashMap<CohortId, Vec<TaskId>>,
}

impl DerivationGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the root cohort of the analysis
    ///
    /// Fails if the graph already has an initial cohort or if the given
    /// cohort is not marked initial.
    pub fn insert_initial_cohort(&mut self, cohort: Cohort) -> AnalysisResult<CohortId> {
        if !cohort.is_initial {
            return Err(AnalysisError::InvariantViolation(
                "root cohort must be marked initial".to_string(),
            ));
        }
        if self.cohorts.values().any(|c| c.is_initial) {
            return Err(AnalysisError::InvariantViolation(
                "analysis already has an initial cohort".to_string(),
            ));
        }

        let id = cohort.id;
        self.cohorts.insert(id, cohort);
        debug!(%id, "inserted initial cohort");
        Ok(id)
    }

    /// Register an executed task together with its output cohorts
    ///
    /// Inputs must already be in the graph; outputs are inserted here.
    /// Derivation kinds are arity-checked: Filter is one-to-one, Split
    /// one-to-many, Combine many-to-one.
    pub fn register_task(
        &mut self,
        task: TaskNode,
        inputs: &[CohortId],
        outputs: Vec<Cohort>,
    ) -> AnalysisResult<(TaskId, Vec<CohortId>)> {
        for input in inputs {
            if !self.cohorts.contains_key(input) {
                return Err(AnalysisError::EntityNotFound {
                    entity_type: "Cohort".to_string(),
                    id: input.to_string(),
                });
            }
        }

        let arity_ok = match task.kind {
            TaskKind::Filter => inputs.len() == 1 && outputs.len() == 1,
            TaskKind::Split => inputs.len() == 1 && !outputs.is_empty(),
            TaskKind::Combine => !inputs.is_empty() && outputs.len() == 1,
            TaskKind::Overview | TaskKind::Characterization => true,
        };
        if !arity_ok {
            return Err(AnalysisError::InvalidOperation {
                reason: format!(
                    "{} task cannot map {} input(s) to {} output(s)",
                    task.kind.display_name(),
                    inputs.len(),
                    outputs.len()
                ),
            });
        }

        if outputs.iter().any(|c| c.is_initial) {
            return Err(AnalysisError::InvariantViolation(
                "task outputs cannot be initial cohorts".to_string(),
            ));
        }

        let task_id = task.id;
        let mut output_ids = Vec::with_capacity(outputs.len());
        for cohort in outputs {
            let cohort_id = cohort.id;
            self.cohorts.insert(cohort_id, cohort);
            self.parent_tasks.entry(cohort_id).or_default().push(task_id);
            output_ids.push(cohort_id);
        }

        for input in inputs {
            self.child_tasks.entry(*input).or_default().push(task_id);
        }
        self.task_inputs.insert(task_id, inputs.to_vec());
        self.task_outputs.insert(task_id, output_ids.clone());
        self.tasks.insert(task_id, task);

        debug!(%task_id, outputs = output_ids.len(), "registered task");
        Ok((task_id, output_ids))
    }

    /// Get a cohort by id
    pub fn cohort(&self, id: CohortId) -> AnalysisResult<&Cohort> {
        self.cohorts.get(&id).ok_or_else(|| AnalysisError::EntityNotFound {
            entity_type: "Cohort".to_string(),
            id: id.to_string(),
        })
    }

    /// Get a mutable cohort by id
    pub fn cohort_mut(&mut self, id: CohortId) -> AnalysisResult<&mut Cohort> {
        self.cohorts.get_mut(&id).ok_or_else(|| AnalysisError::EntityNotFound {
            entity_type: "Cohort".to_string(),
            id: id.to_string(),
        })
    }

    /// Get a task by id
    pub fn task(&self, id: TaskId) -> AnalysisResult<&TaskNode> {
        self.tasks.get(&id).ok_or_else(|| AnalysisError::EntityNotFound {
            entity_type: "Task".to_string(),
            id: id.to_string(),
        })
    }

    /// The unique root cohort of the analysis
    pub fn root(&self) -> AnalysisResult<&Cohort> {
        self.cohorts
            .values()
            .find(|c| c.is_initial)
            .ok_or_else(|| AnalysisError::InvariantViolation(
                "analysis has no initial cohort".to_string(),
            ))
    }

    /// Number of cohorts in the graph
    pub fn cohort_count(&self) -> usize {
        self.cohorts.len()
    }

    /// Number of tasks in the graph
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Whether a predicate contradiction was detected for the cohort
    ///
    /// Callers check this before requesting a histogram or size and treat
    /// a positive result as "cannot compute", not as an error.
    pub fn has_filter_conflict(&self, id: CohortId) -> AnalysisResult<bool> {
        Ok(self.cohort(id)?.has_filter_conflict)
    }

    /// The ancestor path from the root cohort to `id`, root first
    ///
    /// The path alternates cohort/task/cohort/.../task/cohort. It is
    /// assembled newest-first by walking parent pointers, then reversed
    /// into chronological order before returning.
    ///
    /// # Panics
    ///
    /// Panics if the walk revisits a node. The graph is constructed
    /// write-once, so a cycle can only mean internal corruption and is a
    /// fatal invariant failure, not a recoverable error.
    pub fn bloodline(&self, id: CohortId) -> AnalysisResult<Vec<BloodlineEntry>> {
        let mut entries = self.bloodline_newest_first(id)?;
        entries.reverse();
        Ok(entries)
    }

    fn bloodline_newest_first(&self, id: CohortId) -> AnalysisResult<Vec<BloodlineEntry>> {
        let mut entries = Vec::new();
        let mut visited = HashSet::new();
        let mut current = id;

        loop {
            let cohort = self.cohort(current)?;
            assert!(
                visited.insert(current),
                "cycle in derivation graph at cohort {current}"
            );
            entries.push(BloodlineEntry::Cohort(current));

            let parent = self
                .parent_tasks
                .get(&current)
                .and_then(|tasks| tasks.first())
                .copied();
            match parent {
                None => {
                    if !cohort.is_initial {
                        return Err(AnalysisError::InvariantViolation(format!(
                            "bloodline of {id} terminated at non-initial cohort {current}"
                        )));
                    }
                    break;
                }
                Some(task_id) => {
                    entries.push(BloodlineEntry::Task(task_id));
                    current = self
                        .task_inputs
                        .get(&task_id)
                        .and_then(|inputs| inputs.first())
                        .copied()
                        .ok_or_else(|| AnalysisError::InvariantViolation(format!(
                            "task {task_id} has no input cohort"
                        )))?;
                }
            }
        }

        Ok(entries)
    }

    /// The cohorts feeding the task(s) that produced `id`
    ///
    /// Used to find "the previous step" for per-task comparisons, e.g.
    /// histogram reference bars.
    pub fn cohort_parents(&self, id: CohortId) -> AnalysisResult<Vec<&Cohort>> {
        self.cohort(id)?;

        let mut parents = Vec::new();
        for task_id in self.parent_tasks.get(&id).into_iter().flatten() {
            for input in self.task_inputs.get(task_id).into_iter().flatten() {
                parents.push(self.cohort(*input)?);
            }
        }
        Ok(parents)
    }

    /// Remove a cohort and cascade through everything derived from it
    ///
    /// All tasks consuming the cohort, their output cohorts, and so on
    /// transitively are removed; orphans are never left behind. Returns
    /// the number of removed nodes (cohorts plus tasks).
    pub fn remove_cohort(&mut self, id: CohortId) -> AnalysisResult<usize> {
        self.cohort(id)?;

        let mut removed = 0;
        let mut cohort_queue = VecDeque::from([id]);
        while let Some(cohort_id) = cohort_queue.pop_front() {
            if self.cohorts.shift_remove(&cohort_id).is_none() {
                continue;
            }
            removed += 1;

            // Detach from the task(s) that produced this cohort; a
            // producing task with no outputs left goes away as well.
            for task_id in self.parent_tasks.remove(&cohort_id).into_iter().flatten() {
                let now_empty = match self.task_outputs.get_mut(&task_id) {
                    Some(outputs) => {
                        outputs.retain(|c| *c != cohort_id);
                        outputs.is_empty()
                    }
                    None => false,
                };
                if now_empty && self.tasks.shift_remove(&task_id).is_some() {
                    removed += 1;
                    self.task_outputs.remove(&task_id);
                    for input in self.task_inputs.remove(&task_id).into_iter().flatten() {
                        if let Some(children) = self.child_tasks.get_mut(&input) {
                            children.retain(|t| *t != task_id);
                        }
                    }
                }
            }

            // Every consuming task goes away, along with its outputs.
            for task_id in self.child_tasks.remove(&cohort_id).into_iter().flatten() {
                if self.tasks.shift_remove(&task_id).is_none() {
                    continue;
                }
                removed += 1;

                for input in self.task_inputs.remove(&task_id).into_iter().flatten() {
                    if let Some(children) = self.child_tasks.get_mut(&input) {
                        children.retain(|t| *t != task_id);
                    }
                }
                for output in self.task_outputs.remove(&task_id).into_iter().flatten() {
                    cohort_queue.push_back(output);
                }
            }
        }

        debug!(%id, removed, "removed cohort cascade");
        Ok(removed)
    }
}
