//! Filter predicates attached to cohorts
//!
//! A predicate is either a list of numerical ranges or a list of accepted
//! categorical values. The predicate list attached to a cohort is ordered
//! and positionally aligned with the attribute list of the task that
//! produced it.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Comparison operator used at one end of a numerical range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum RangeOperator {
    /// Equal to the bound value
    #[serde(rename = "=")]
    Equals,
    /// Not equal to the bound value
    #[serde(rename = "!=")]
    NotEquals,
    /// Strictly less than the bound value
    #[serde(rename = "<")]
    LessThan,
    /// Less than or equal to the bound value
    #[serde(rename = "<=")]
    LessThanOrEquals,
    /// Strictly greater than the bound value
    #[serde(rename = ">")]
    GreaterThan,
    /// Greater than or equal to the bound value
    #[serde(rename = ">=")]
    GreaterThanOrEquals,
}

impl RangeOperator {
    /// The operator's comparison symbol
    pub fn symbol(&self) -> &str {
        match self {
            RangeOperator::Equals => "=",
            RangeOperator::NotEquals => "!=",
            RangeOperator::LessThan => "<",
            RangeOperator::LessThanOrEquals => "<=",
            RangeOperator::GreaterThan => ">",
            RangeOperator::GreaterThanOrEquals => ">=",
        }
    }
}

impl fmt::Display for RangeOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Sentinel standing in for a missing value in a range bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Sentinel {
    /// The value is missing (`'null'` on the wire)
    #[serde(rename = "null")]
    Missing,
    /// The value is present (`'!null'` on the wire)
    #[serde(rename = "!null")]
    NotMissing,
}

/// One end of a numerical range: a concrete number or a missing-value sentinel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum BoundValue {
    /// A concrete numerical bound
    Number(f64),
    /// A missing-value sentinel
    Sentinel(Sentinel),
}

impl BoundValue {
    /// Whether this bound is the missing-value sentinel
    pub fn is_missing(&self) -> bool {
        matches!(self, BoundValue::Sentinel(Sentinel::Missing))
    }

    /// Whether this bound is the not-missing sentinel
    pub fn is_not_missing(&self) -> bool {
        matches!(self, BoundValue::Sentinel(Sentinel::NotMissing))
    }
}

impl fmt::Display for BoundValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundValue::Number(n) => write!(f, "{n}"),
            BoundValue::Sentinel(Sentinel::Missing) => write!(f, "null"),
            BoundValue::Sentinel(Sentinel::NotMissing) => write!(f, "!null"),
        }
    }
}

/// A numerical range: an operator pair and up to two bound values
///
/// Single-ended ranges leave the second operator/value unset. The
/// missing-value sentinels let a range select, or reject, rows without a
/// value for the attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NumRange {
    /// Operator applied to the first bound
    pub operator_one: RangeOperator,
    /// First bound value
    pub value_one: BoundValue,
    /// Operator applied to the second bound, for two-sided ranges
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator_two: Option<RangeOperator>,
    /// Second bound value, for two-sided ranges
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_two: Option<BoundValue>,
}

impl NumRange {
    /// A two-sided closed range `lo <= x <= hi`
    pub fn closed(lo: f64, hi: f64) -> Self {
        Self {
            operator_one: RangeOperator::GreaterThanOrEquals,
            value_one: BoundValue::Number(lo),
            operator_two: Some(RangeOperator::LessThanOrEquals),
            value_two: Some(BoundValue::Number(hi)),
        }
    }

    /// A single-ended range with one operator and bound
    pub fn single(operator: RangeOperator, value: f64) -> Self {
        Self {
            operator_one: operator,
            value_one: BoundValue::Number(value),
            operator_two: None,
            value_two: None,
        }
    }

    /// The range selecting only rows with a missing value
    pub fn missing() -> Self {
        Self {
            operator_one: RangeOperator::Equals,
            value_one: BoundValue::Sentinel(Sentinel::Missing),
            operator_two: None,
            value_two: None,
        }
    }

    /// The implicit "value is present" range (`['!null']`) applied per
    /// attribute when missing values are excluded
    pub fn not_missing() -> Self {
        Self {
            operator_one: RangeOperator::Equals,
            value_one: BoundValue::Sentinel(Sentinel::NotMissing),
            operator_two: None,
            value_two: None,
        }
    }

    /// Whether this range is exactly the not-missing filter
    pub fn is_not_missing_filter(&self) -> bool {
        self.operator_one == RangeOperator::Equals
            && self.value_one.is_not_missing()
            && self.operator_two.is_none()
    }
}

impl fmt::Display for NumRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.operator_one, self.value_one)?;
        if let (Some(op), Some(value)) = (self.operator_two, &self.value_two) {
            write!(f, " and {op} {value}")?;
        }
        Ok(())
    }
}

/// A set of accepted categorical values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EqualsList {
    /// The accepted values, in display order
    pub values: Vec<String>,
}

impl EqualsList {
    /// Create from any collection of values
    pub fn new(values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for EqualsList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.values.join(" / "))
    }
}

/// A filter predicate: numerical ranges or a categorical value list
///
/// This is one entry of a cohort's `values` list; each entry corresponds
/// positionally to one attribute of the producing task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum FilterPredicate {
    /// One or more numerical ranges, combined disjunctively
    NumRanges(Vec<NumRange>),
    /// A set of accepted categorical values
    Equals(EqualsList),
}

impl FilterPredicate {
    /// The predicate selecting rows with a present value, used for the
    /// implicit missing-value exclusion filter
    pub fn not_missing() -> Self {
        FilterPredicate::NumRanges(vec![NumRange::not_missing()])
    }

    /// Whether this predicate is exactly the implicit not-missing filter
    pub fn is_not_missing_filter(&self) -> bool {
        match self {
            FilterPredicate::NumRanges(ranges) => {
                ranges.len() == 1 && ranges[0].is_not_missing_filter()
            }
            FilterPredicate::Equals(_) => false,
        }
    }

    /// Whether this predicate carries numerical ranges
    pub fn is_ranges(&self) -> bool {
        matches!(self, FilterPredicate::NumRanges(_))
    }
}

impl fmt::Display for FilterPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterPredicate::NumRanges(ranges) => {
                let parts: Vec<String> = ranges.iter().map(|r| r.to_string()).collect();
                write!(f, "{}", parts.join(", "))
            }
            FilterPredicate::Equals(list) => write!(f, "{list}"),
        }
    }
}
