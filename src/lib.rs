//! # Cohort Domain
//!
//! Core building blocks for interactive cohort analysis: deriving,
//! comparing, and inspecting subsets ("cohorts") of a dataset by applying
//! sequences of attribute filters, and reporting statistical summaries of
//! derived subsets relative to reference subsets.
//!
//! This crate provides the analysis core only:
//! - **Entities**: Cohort and task nodes with stable, typed identities
//! - **Derivation Graph**: arena-based ancestor traversal and cascading
//!   removal
//! - **Filter Composition**: sequential multi-attribute filtering with
//!   label/value accumulation
//! - **Session Cache**: memoized size/histogram/reference results with
//!   request coalescing
//! - **Prevalence Engine**: reference-cohort building and Wald confidence
//!   intervals
//!
//! Rendering, interaction, and provenance recording are external
//! collaborators: they call into this core and supply it with a
//! [`CohortBackend`] implementation.
//!
//! ## Design Principles
//!
//! 1. **Type Safety**: Ids are newtypes; attribute kinds are a tagged sum
//!    type with exhaustive dispatch
//! 2. **Immutability**: A cohort's filter predicates never change after
//!    creation; cache entries are single-assignment
//! 3. **Sequential Chains**: Each filter step's output feeds the next
//!    step's input; there is no parallel decomposition of one chain
//! 4. **Explicit Failure**: Backend failures propagate without retries or
//!    silent defaults; undefined prevalence is a value, never `NaN`

#![warn(missing_docs)]

mod attribute;
mod backend;
mod cache;
mod cohort;
mod errors;
mod filter;
mod graph;
mod identifiers;
mod predicate;
mod prevalence;

// Re-export core types
pub use attribute::{server_column, Attribute, AttributeDescriptor, DataType};
pub use backend::{CohortBackend, CohortHandle, HistogramBin};
pub use cache::{CacheKey, FilterSignature, SessionCache};
pub use cohort::{Cohort, CohortLabel, DataSource, TaskKind, TaskNode};
pub use errors::{AnalysisError, AnalysisResult};
pub use filter::{apply_filter_task, multi_attribute_filter, multi_filter, FilterStep};
pub use graph::{BloodlineEntry, DerivationGraph};
pub use identifiers::{
    AttributeId, CohortId, DbCohortId, RequestToken, TaskId, TokenIssuer,
};
pub use predicate::{
    BoundValue, EqualsList, FilterPredicate, NumRange, RangeOperator, Sentinel,
};
pub use prevalence::{
    format_percentage, format_raw_percentage, AncestorFilter, PrevalenceEngine,
    PrevalenceMeasure, PrevalenceOutcome, PrevalencePhase, PrevalenceRegion,
};
