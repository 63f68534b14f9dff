//! Data types produced by the aggregation pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::hierarchy::{EntityId, EntityKind};
use crate::indicators::registry::FormulaKind;
use crate::submission::ItineraryId;

/// Canonical status vocabulary shared by every indicator family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Status {
    Adequate,
    Partial,
    Inadequate,
    MeetsStandard,
    BelowStandard,
    Excellent,
    Good,
    Average,
    Poor,
    /// Data exists but the indicator has no threshold table.
    Unrated,
    /// No eligible data. Never a negative result.
    NoData,
}

impl Status {
    pub fn label(self) -> &'static str {
        match self {
            Status::Adequate => "Adequate",
            Status::Partial => "Partial",
            Status::Inadequate => "Inadequate",
            Status::MeetsStandard => "Meets standard",
            Status::BelowStandard => "Below standard",
            Status::Excellent => "Excellent",
            Status::Good => "Good",
            Status::Average => "Average",
            Status::Poor => "Poor",
            Status::Unrated => "Unrated",
            Status::NoData => "No data",
        }
    }

    pub fn is_no_data(self) -> bool {
        self == Status::NoData
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Numerator/denominator pair for one input question.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Component {
    pub numerator: f64,
    pub denominator: f64,
}

impl Component {
    pub fn add(&mut self, numerator: f64, denominator: f64) {
        self.numerator += numerator;
        self.denominator += denominator;
    }

    /// `numerator / denominator`, `None` when nothing was counted.
    pub fn ratio(&self) -> Option<f64> {
        (self.denominator > 0.0).then(|| self.numerator / self.denominator)
    }
}

/// Why a submission's answers could not be counted.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "error", rename_all = "camelCase")]
pub enum AnswerError {
    #[error("question '{question}' has invalid value '{value}': {reason}")]
    InvalidAnswerValue {
        question: String,
        value: String,
        reason: String,
    },

    #[error("question '{question}' was not answered")]
    MissingAnswer { question: String },
}

impl AnswerError {
    pub(crate) fn invalid(question: &str, value: impl fmt::Display, reason: impl Into<String>) -> Self {
        AnswerError::InvalidAnswerValue {
            question: question.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn missing(question: &str) -> Self {
        AnswerError::MissingAnswer {
            question: question.to_string(),
        }
    }
}

/// How one submission fed into a result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum Outcome {
    Counted {
        numerator: f64,
        denominator: f64,
        /// Text answers as given, e.g. the water source named.
        #[serde(skip_serializing_if = "Vec::is_empty")]
        labels: Vec<String>,
    },
    Excluded {
        reason: AnswerError,
    },
}

/// One entry of the raw-data drill-down.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Contribution {
    pub submission_id: String,
    pub entity_id: EntityId,
    pub submitted_at: DateTime<Utc>,
    pub outcome: Outcome,
}

impl Contribution {
    pub fn is_excluded(&self) -> bool {
        matches!(self.outcome, Outcome::Excluded { .. })
    }
}

/// Aggregated figures for one entity, before classification.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Measurement {
    pub numerator: f64,
    pub denominator: f64,
    /// Formula output: a fraction for ratios, a score for weighted averages,
    /// a total for sums, a count for distinct counts.
    pub value: Option<f64>,
    pub percentage: Option<f64>,
    pub components: BTreeMap<String, Component>,
}

/// Computed value of one indicator for one entity and itinerary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorResult {
    pub entity_id: EntityId,
    pub entity_name: String,
    pub entity_kind: EntityKind,
    pub itinerary_id: ItineraryId,
    pub indicator_key: String,
    pub kind: FormulaKind,
    pub numerator: f64,
    pub denominator: f64,
    pub value: Option<f64>,
    pub percentage: Option<f64>,
    pub components: BTreeMap<String, Component>,
    pub status: Status,
    pub detail: Vec<Contribution>,
}

impl IndicatorResult {
    /// The figure shown and ranked for this indicator: the percentage for
    /// ratios and distinct counts, the raw value otherwise.
    pub fn headline(&self) -> Option<f64> {
        self.kind.headline(self.value, self.percentage)
    }

    /// Submissions that were flagged and left out of the figures.
    pub fn excluded(&self) -> impl Iterator<Item = &Contribution> {
        self.detail.iter().filter(|entry| entry.is_excluded())
    }
}
