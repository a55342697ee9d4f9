// Copyright 2025 Cowboy AI, LLC.

//! Backend Access Port
//!
//! The core consumes, but never implements, the backend: all cohort
//! creation and retrieval is delegated to an injected [`CohortBackend`].
//! The wire format is opaque here; only the input/output contracts matter.
//! Every route shares the same logical contract: current cohort identity
//! plus a serialized predicate in, new cohort identity out.

use crate::attribute::AttributeDescriptor;
use crate::cohort::CohortLabel;
use crate::errors::AnalysisResult;
use crate::identifiers::DbCohortId;
use crate::predicate::{EqualsList, FilterPredicate};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Identity and label of a freshly created backend cohort
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CohortHandle {
    /// Backend identity of the new cohort
    pub db_id: DbCohortId,
    /// Two-part label assigned by the creation route
    pub label: CohortLabel,
}

/// One bin of a cohort histogram
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct HistogramBin {
    /// Bin identity (category value or formatted numerical bucket)
    pub bin: String,
    /// Number of rows in the bin
    pub count: u64,
}

/// Async port to the cohort backend
///
/// One creation route exists per attribute kind; dispatch between them is
/// the job of [`Attribute::filter`](crate::attribute::Attribute::filter).
/// Failures are surfaced as
/// [`BackendUnavailable`](crate::errors::AnalysisError::BackendUnavailable);
/// the core performs no retries and never substitutes default values.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CohortBackend: Send + Sync {
    /// Create a cohort by filtering a plain server column
    async fn create_column_filtered(
        &self,
        base: &DbCohortId,
        attribute: &AttributeDescriptor,
        predicate: &FilterPredicate,
    ) -> AnalysisResult<CohortHandle>;

    /// Create a cohort by filtering a gene/score-derived column
    async fn create_gene_score_filtered(
        &self,
        base: &DbCohortId,
        attribute: &AttributeDescriptor,
        predicate: &FilterPredicate,
    ) -> AnalysisResult<CohortHandle>;

    /// Create a cohort by filtering a panel-annotation column
    async fn create_panel_annotation_filtered(
        &self,
        base: &DbCohortId,
        attribute: &AttributeDescriptor,
        predicate: &FilterPredicate,
    ) -> AnalysisResult<CohortHandle>;

    /// Create a cohort by filtering a depletion-score column
    async fn create_depletion_filtered(
        &self,
        base: &DbCohortId,
        attribute: &AttributeDescriptor,
        predicate: &FilterPredicate,
    ) -> AnalysisResult<CohortHandle>;

    /// Create a cohort by filtering the composite treatment attribute
    ///
    /// Treatments are computed from nested records rather than a flat
    /// column, so only categorical value lists are accepted here.
    async fn create_treatment_filtered(
        &self,
        base: &DbCohortId,
        attribute: &AttributeDescriptor,
        values: &EqualsList,
    ) -> AnalysisResult<CohortHandle>;

    /// Overwrite a cohort's displayed label and predicate values
    ///
    /// Issued exactly once at the end of a multi-filter chain so the
    /// cohort reflects the whole chain rather than only the last step.
    async fn update_cohort_metadata(
        &self,
        cohort: &DbCohortId,
        label: &CohortLabel,
        values: &[FilterPredicate],
    ) -> AnalysisResult<()>;

    /// Fetch the number of rows in a cohort
    async fn cohort_size(&self, cohort: &DbCohortId) -> AnalysisResult<u64>;

    /// Fetch a cohort's row data for one attribute
    async fn cohort_data(
        &self,
        cohort: &DbCohortId,
        attribute: &AttributeDescriptor,
    ) -> AnalysisResult<Vec<serde_json::Value>>;

    /// Fetch a cohort's histogram for one attribute
    async fn cohort_histogram(
        &self,
        cohort: &DbCohortId,
        attribute: &AttributeDescriptor,
    ) -> AnalysisResult<Vec<HistogramBin>>;
}
