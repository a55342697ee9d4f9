//! Attribute kinds and their shared capability set
//!
//! An attribute is a dataset column a cohort can be filtered or split on.
//! The concrete kinds differ only in which backend creation route they
//! dispatch to; all of them expose the same filter/data/histogram
//! contract. Only the composite treatment attribute may decline an
//! operation, and it does so explicitly, never silently.

use crate::backend::{CohortBackend, CohortHandle, HistogramBin};
use crate::errors::{AnalysisError, AnalysisResult};
use crate::identifiers::{AttributeId, DbCohortId};
use crate::predicate::FilterPredicate;
use serde::{Deserialize, Serialize};

/// Data type of an attribute's values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Numerical values
    Number,
    /// Categorical values
    Categorical,
    /// Free-form string values
    String,
}

/// The fields every attribute kind carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    /// Attribute identity
    pub id: AttributeId,
    /// Column key used by backend data/histogram calls
    pub data_key: String,
    /// Human-readable label
    pub label: String,
    /// Data type of the attribute's values
    pub data_type: DataType,
}

/// A dataset attribute, tagged by its concrete kind
///
/// Each variant carries only the fields its backend route needs. Dispatch
/// is exhaustive matching; there is no shape-checking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Attribute {
    /// Plain server column
    ServerColumn(AttributeDescriptor),
    /// Column derived from a gene score
    GeneScore {
        /// Shared attribute fields
        descriptor: AttributeDescriptor,
        /// Score table the column derives from
        table: String,
        /// Ensembl gene identifier
        ensg: String,
    },
    /// Panel-annotation column
    PanelAnnotation {
        /// Shared attribute fields
        descriptor: AttributeDescriptor,
        /// Panel the annotation belongs to
        panel: String,
    },
    /// Depletion-score column
    DepletionScore {
        /// Shared attribute fields
        descriptor: AttributeDescriptor,
        /// Depletion screen the score derives from
        screen: String,
    },
    /// Composite treatment attribute, computed from nested records
    Treatment {
        /// Shared attribute fields
        descriptor: AttributeDescriptor,
    },
}

impl Attribute {
    /// The shared descriptor of this attribute
    pub fn descriptor(&self) -> &AttributeDescriptor {
        match self {
            Attribute::ServerColumn(descriptor) => descriptor,
            Attribute::GeneScore { descriptor, .. } => descriptor,
            Attribute::PanelAnnotation { descriptor, .. } => descriptor,
            Attribute::DepletionScore { descriptor, .. } => descriptor,
            Attribute::Treatment { descriptor } => descriptor,
        }
    }

    /// Attribute identity
    pub fn id(&self) -> &AttributeId {
        &self.descriptor().id
    }

    /// Column key used by backend calls
    pub fn data_key(&self) -> &str {
        &self.descriptor().data_key
    }

    /// Human-readable label
    pub fn label(&self) -> &str {
        &self.descriptor().label
    }

    /// Data type of the attribute's values
    pub fn data_type(&self) -> DataType {
        self.descriptor().data_type
    }

    /// Whether this is the composite treatment attribute
    pub fn is_composite(&self) -> bool {
        matches!(self, Attribute::Treatment { .. })
    }

    /// Short name of the concrete kind, for logging and errors
    pub fn kind_name(&self) -> &'static str {
        match self {
            Attribute::ServerColumn(_) => "server column",
            Attribute::GeneScore { .. } => "gene score",
            Attribute::PanelAnnotation { .. } => "panel annotation",
            Attribute::DepletionScore { .. } => "depletion score",
            Attribute::Treatment { .. } => "treatment",
        }
    }

    /// Create a filtered cohort through this attribute's backend route
    ///
    /// The treatment attribute accepts only categorical value lists; a
    /// numerical-range predicate is declined with
    /// [`AnalysisError::FilterNotSupported`].
    pub async fn filter<B>(
        &self,
        backend: &B,
        base: &DbCohortId,
        predicate: &FilterPredicate,
    ) -> AnalysisResult<CohortHandle>
    where
        B: CohortBackend + ?Sized,
    {
        match self {
            Attribute::ServerColumn(descriptor) => {
                backend
                    .create_column_filtered(base, descriptor, predicate)
                    .await
            }
            Attribute::GeneScore { descriptor, .. } => {
                backend
                    .create_gene_score_filtered(base, descriptor, predicate)
                    .await
            }
            Attribute::PanelAnnotation { descriptor, .. } => {
                backend
                    .create_panel_annotation_filtered(base, descriptor, predicate)
                    .await
            }
            Attribute::DepletionScore { descriptor, .. } => {
                backend
                    .create_depletion_filtered(base, descriptor, predicate)
                    .await
            }
            Attribute::Treatment { descriptor } => match predicate {
                FilterPredicate::Equals(values) => {
                    backend
                        .create_treatment_filtered(base, descriptor, values)
                        .await
                }
                FilterPredicate::NumRanges(_) => Err(AnalysisError::FilterNotSupported {
                    attribute: descriptor.label.clone(),
                    reason: "numerical ranges are not defined for nested treatment records"
                        .to_string(),
                }),
            },
        }
    }

    /// Fetch this attribute's row data for a cohort
    pub async fn data<B>(
        &self,
        backend: &B,
        cohort: &DbCohortId,
    ) -> AnalysisResult<Vec<serde_json::Value>>
    where
        B: CohortBackend + ?Sized,
    {
        backend.cohort_data(cohort, self.descriptor()).await
    }

    /// Fetch this attribute's histogram for a cohort
    pub async fn histogram<B>(
        &self,
        backend: &B,
        cohort: &DbCohortId,
    ) -> AnalysisResult<Vec<HistogramBin>>
    where
        B: CohortBackend + ?Sized,
    {
        backend.cohort_histogram(cohort, self.descriptor()).await
    }
}

/// Convenience constructor for a plain server column attribute
pub fn server_column(
    id: impl Into<String>,
    label: impl Into<String>,
    data_type: DataType,
) -> Attribute {
    let id = id.into();
    Attribute::ServerColumn(AttributeDescriptor {
        data_key: id.clone(),
        id: AttributeId::from(id),
        label: label.into(),
        data_type,
    })
}
