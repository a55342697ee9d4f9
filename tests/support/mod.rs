//! In-memory scripted backend for integration tests
//!
//! Implements the backend port over a plain row store so tests can verify
//! end-to-end filter semantics, call counts, and cache behavior without a
//! server.

#![allow(dead_code)]

use async_trait::async_trait;
use cohort_domain::{
    AnalysisError, AnalysisResult, AttributeDescriptor, BoundValue, Cohort, CohortBackend,
    CohortHandle, CohortLabel, DataSource, DbCohortId, EqualsList, FilterPredicate, HistogramBin,
    NumRange, RangeOperator, Sentinel,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub type Row = serde_json::Map<String, serde_json::Value>;

/// Build a row from (column, value) pairs
pub fn row(entries: &[(&str, serde_json::Value)]) -> Row {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Row-filtering backend with call counters and failure injection
pub struct InMemoryBackend {
    cohorts: Mutex<HashMap<String, Vec<Row>>>,
    next_id: AtomicUsize,
    latency: Duration,
    fail_create_for: Mutex<Option<String>>,
    pub create_calls: AtomicUsize,
    pub size_calls: AtomicUsize,
    pub metadata_calls: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new(root_rows: Vec<Row>) -> Self {
        let mut cohorts = HashMap::new();
        cohorts.insert("root".to_string(), root_rows);
        Self {
            cohorts: Mutex::new(cohorts),
            next_id: AtomicUsize::new(0),
            latency: Duration::ZERO,
            fail_create_for: Mutex::new(None),
            create_calls: AtomicUsize::new(0),
            size_calls: AtomicUsize::new(0),
            metadata_calls: AtomicUsize::new(0),
        }
    }

    /// Add an artificial await point to every backend call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// The root cohort matching this backend's row store
    pub fn root_cohort(&self) -> Cohort {
        Cohort::initial(
            DbCohortId::from("root"),
            CohortLabel::new("All", "entire dataset"),
            DataSource {
                database: "testdb".to_string(),
                view: "samples".to_string(),
                table: "rows".to_string(),
            },
        )
    }

    /// Make the next creation call for `data_key` fail
    pub fn fail_create_for(&self, data_key: &str) {
        *self.fail_create_for.lock().unwrap() = Some(data_key.to_string());
    }

    pub fn cohort_exists(&self, db_id: &str) -> bool {
        self.cohorts.lock().unwrap().contains_key(db_id)
    }

    pub fn creates(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn sizes(&self) -> usize {
        self.size_calls.load(Ordering::SeqCst)
    }

    pub fn metadata_updates(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    async fn apply_filter(
        &self,
        base: &DbCohortId,
        attribute: &AttributeDescriptor,
        predicate: &FilterPredicate,
    ) -> AnalysisResult<CohortHandle> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        let failing = {
            let mut pending = self.fail_create_for.lock().unwrap();
            if pending.as_deref() == Some(attribute.data_key.as_str()) {
                *pending = None;
                true
            } else {
                false
            }
        };
        if failing {
            return Err(AnalysisError::backend(
                "create_filtered_cohort",
                format!("injected failure for {}", attribute.data_key),
            ));
        }

        let mut cohorts = self.cohorts.lock().unwrap();
        let rows = cohorts
            .get(base.as_str())
            .ok_or_else(|| AnalysisError::backend("create_filtered_cohort", "unknown base cohort"))?;
        let filtered: Vec<Row> = rows
            .iter()
            .filter(|r| matches_predicate(r, &attribute.data_key, predicate))
            .cloned()
            .collect();

        let id = format!("c{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        cohorts.insert(id.clone(), filtered);
        Ok(CohortHandle {
            db_id: DbCohortId::from(id),
            label: CohortLabel::new(attribute.label.clone(), predicate.to_string()),
        })
    }
}

#[async_trait]
impl CohortBackend for InMemoryBackend {
    async fn create_column_filtered(
        &self,
        base: &DbCohortId,
        attribute: &AttributeDescriptor,
        predicate: &FilterPredicate,
    ) -> AnalysisResult<CohortHandle> {
        self.apply_filter(base, attribute, predicate).await
    }

    async fn create_gene_score_filtered(
        &self,
        base: &DbCohortId,
        attribute: &AttributeDescriptor,
        predicate: &FilterPredicate,
    ) -> AnalysisResult<CohortHandle> {
        self.apply_filter(base, attribute, predicate).await
    }

    async fn create_panel_annotation_filtered(
        &self,
        base: &DbCohortId,
        attribute: &AttributeDescriptor,
        predicate: &FilterPredicate,
    ) -> AnalysisResult<CohortHandle> {
        self.apply_filter(base, attribute, predicate).await
    }

    async fn create_depletion_filtered(
        &self,
        base: &DbCohortId,
        attribute: &AttributeDescriptor,
        predicate: &FilterPredicate,
    ) -> AnalysisResult<CohortHandle> {
        self.apply_filter(base, attribute, predicate).await
    }

    async fn create_treatment_filtered(
        &self,
        base: &DbCohortId,
        attribute: &AttributeDescriptor,
        values: &EqualsList,
    ) -> AnalysisResult<CohortHandle> {
        let predicate = FilterPredicate::Equals(values.clone());
        self.apply_filter(base, attribute, &predicate).await
    }

    async fn update_cohort_metadata(
        &self,
        cohort: &DbCohortId,
        _label: &CohortLabel,
        _values: &[FilterPredicate],
    ) -> AnalysisResult<()> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.cohort_exists(cohort.as_str()) {
            Ok(())
        } else {
            Err(AnalysisError::backend(
                "update_cohort_metadata",
                "unknown cohort",
            ))
        }
    }

    async fn cohort_size(&self, cohort: &DbCohortId) -> AnalysisResult<u64> {
        self.size_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        let cohorts = self.cohorts.lock().unwrap();
        cohorts
            .get(cohort.as_str())
            .map(|rows| rows.len() as u64)
            .ok_or_else(|| AnalysisError::backend("cohort_size", "unknown cohort"))
    }

    async fn cohort_data(
        &self,
        cohort: &DbCohortId,
        attribute: &AttributeDescriptor,
    ) -> AnalysisResult<Vec<serde_json::Value>> {
        self.pause().await;
        let cohorts = self.cohorts.lock().unwrap();
        let rows = cohorts
            .get(cohort.as_str())
            .ok_or_else(|| AnalysisError::backend("cohort_data", "unknown cohort"))?;
        Ok(rows
            .iter()
            .map(|r| r.get(&attribute.data_key).cloned().unwrap_or(serde_json::Value::Null))
            .collect())
    }

    async fn cohort_histogram(
        &self,
        cohort: &DbCohortId,
        attribute: &AttributeDescriptor,
    ) -> AnalysisResult<Vec<HistogramBin>> {
        self.pause().await;
        let cohorts = self.cohorts.lock().unwrap();
        let rows = cohorts
            .get(cohort.as_str())
            .ok_or_else(|| AnalysisError::backend("cohort_histogram", "unknown cohort"))?;

        let mut bins: BTreeMap<String, u64> = BTreeMap::new();
        for row in rows {
            let bin = match row.get(&attribute.data_key) {
                None | Some(serde_json::Value::Null) => "missing".to_string(),
                Some(value) => value.to_string().trim_matches('"').to_string(),
            };
            *bins.entry(bin).or_default() += 1;
        }
        Ok(bins
            .into_iter()
            .map(|(bin, count)| HistogramBin { bin, count })
            .collect())
    }
}

fn matches_predicate(row: &Row, data_key: &str, predicate: &FilterPredicate) -> bool {
    let value = match row.get(data_key) {
        None | Some(serde_json::Value::Null) => None,
        Some(value) => Some(value),
    };
    match predicate {
        FilterPredicate::Equals(list) => value
            .and_then(|v| v.as_str())
            .map(|s| list.values.iter().any(|accepted| accepted == s))
            .unwrap_or(false),
        FilterPredicate::NumRanges(ranges) => {
            ranges.iter().any(|range| matches_range(value, range))
        }
    }
}

fn matches_range(value: Option<&serde_json::Value>, range: &NumRange) -> bool {
    let first = matches_bound(value, range.operator_one, &range.value_one);
    match (range.operator_two, &range.value_two) {
        (Some(op), Some(bound)) => first && matches_bound(value, op, bound),
        _ => first,
    }
}

fn matches_bound(
    value: Option<&serde_json::Value>,
    operator: RangeOperator,
    bound: &BoundValue,
) -> bool {
    match bound {
        BoundValue::Sentinel(Sentinel::Missing) => match operator {
            RangeOperator::NotEquals => value.is_some(),
            _ => value.is_none(),
        },
        BoundValue::Sentinel(Sentinel::NotMissing) => match operator {
            RangeOperator::NotEquals => value.is_none(),
            _ => value.is_some(),
        },
        BoundValue::Number(b) => match value.and_then(|v| v.as_f64()) {
            None => false,
            Some(n) => match operator {
                RangeOperator::Equals => n == *b,
                RangeOperator::NotEquals => n != *b,
                RangeOperator::LessThan => n < *b,
                RangeOperator::LessThanOrEquals => n <= *b,
                RangeOperator::GreaterThan => n > *b,
                RangeOperator::GreaterThanOrEquals => n >= *b,
            },
        },
    }
}
