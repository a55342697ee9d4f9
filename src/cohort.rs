//! Cohort and task entities
//!
//! A cohort is a named, immutable-once-created subset of the dataset; a
//! task is one derivation operation consuming input cohort(s) and
//! producing output cohort(s). After creation, only a cohort's display
//! label and cached size may change; its filter predicates never do.

use crate::attribute::Attribute;
use crate::identifiers::{CohortId, DbCohortId, TaskId};
use crate::predicate::FilterPredicate;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Two-part cohort label: a short part and a detail part
///
/// Multi-filter chains concatenate both parts step by step with `", "`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CohortLabel {
    /// Short label, e.g. the attribute name
    pub short: String,
    /// Detail label, e.g. the applied range or value list
    pub detail: String,
}

impl CohortLabel {
    /// Create a label from its two parts
    pub fn new(short: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            short: short.into(),
            detail: detail.into(),
        }
    }

    /// Concatenate another label onto this one, part by part
    pub fn concat(&self, other: &CohortLabel) -> CohortLabel {
        CohortLabel {
            short: format!("{}, {}", self.short, other.short),
            detail: format!("{}, {}", self.detail, other.detail),
        }
    }
}

impl fmt::Display for CohortLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.short, self.detail)
    }
}

/// Source identity of the dataset a cohort was derived from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    /// Database name
    pub database: String,
    /// View name
    pub view: String,
    /// Table name
    pub table: String,
}

/// An immutable, identified subset of the dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cohort {
    /// Local identity within the analysis session
    pub id: CohortId,
    /// Backend identity
    pub db_id: DbCohortId,
    /// Two-part display label
    pub label: CohortLabel,
    /// The ordered filter predicates that produced this cohort, aligned
    /// positionally with the producing task's attribute list
    pub values: Vec<FilterPredicate>,
    /// Whether this is the root cohort of the analysis
    pub is_initial: bool,
    /// Cached retrieved size, if fetched before
    pub size_reference: Option<u64>,
    /// Display color in the task view
    pub color_task_view: Option<String>,
    /// Source identity
    pub source: DataSource,
    /// Whether a predicate contradiction was detected for this cohort
    pub has_filter_conflict: bool,
}

impl Cohort {
    /// Create the root cohort of an analysis
    ///
    /// Exactly one cohort per analysis may be initial; the derivation
    /// graph enforces this on insertion.
    pub fn initial(db_id: DbCohortId, label: CohortLabel, source: DataSource) -> Self {
        Self {
            id: CohortId::new(),
            db_id,
            label,
            values: Vec::new(),
            is_initial: true,
            size_reference: None,
            color_task_view: None,
            source,
            has_filter_conflict: false,
        }
    }

    /// Create a derived cohort from a backend handle and its predicates
    pub fn derived(
        db_id: DbCohortId,
        label: CohortLabel,
        values: Vec<FilterPredicate>,
        source: DataSource,
    ) -> Self {
        Self {
            id: CohortId::new(),
            db_id,
            label,
            values,
            is_initial: false,
            size_reference: None,
            color_task_view: None,
            source,
            has_filter_conflict: false,
        }
    }

    /// Update the display label
    pub fn update_label(&mut self, label: CohortLabel) {
        self.label = label;
    }

    /// Cache a retrieved size on the cohort
    pub fn cache_size(&mut self, size: u64) {
        self.size_reference = Some(size);
    }

    /// Mark that a predicate contradiction was detected externally
    ///
    /// Conflicted cohorts cannot serve size or histogram requests; callers
    /// check [`Cohort::has_filter_conflict`] and treat a positive result as
    /// "cannot compute".
    pub fn mark_filter_conflict(&mut self) {
        self.has_filter_conflict = true;
    }
}

/// Kinds of derivation tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    /// One input cohort, one filtered output cohort
    Filter,
    /// One input cohort, several output cohorts partitioned by attribute
    Split,
    /// Several input cohorts merged into one output cohort
    Combine,
    /// Overview of a cohort without deriving a new one
    Overview,
    /// Characterization of a cohort against its siblings
    Characterization,
}

impl TaskKind {
    /// Whether this task kind derives new cohorts
    pub fn is_derivation(&self) -> bool {
        matches!(self, TaskKind::Filter | TaskKind::Split | TaskKind::Combine)
    }

    /// Get a human-readable name for this task kind
    pub fn display_name(&self) -> &str {
        match self {
            TaskKind::Filter => "Filter",
            TaskKind::Split => "Split",
            TaskKind::Combine => "Combine",
            TaskKind::Overview => "Overview",
            TaskKind::Characterization => "Characterization",
        }
    }
}

/// One derivation operation in the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    /// Task identity
    pub id: TaskId,
    /// Kind of derivation
    pub kind: TaskKind,
    /// Display label
    pub label: String,
    /// The attributes used by this task, aligned positionally with the
    /// output cohorts' predicate lists
    pub attributes: Vec<Attribute>,
    /// When the task was created
    pub creation_date: DateTime<Utc>,
}

impl TaskNode {
    /// Create a task node with the current timestamp
    pub fn new(kind: TaskKind, label: impl Into<String>, attributes: Vec<Attribute>) -> Self {
        Self {
            id: TaskId::new(),
            kind,
            label: label.into(),
            attributes,
            creation_date: Utc::now(),
        }
    }
}
