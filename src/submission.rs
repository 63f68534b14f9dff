//! Survey submissions, answer values and reporting cycles.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::hierarchy::{EntityId, EntityKind};

/// Identifier of a reporting cycle.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItineraryId(pub String);

impl ItineraryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItineraryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItineraryId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A reporting cycle during which submissions are collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Itinerary {
    pub id: ItineraryId,
    pub label: String,
    pub starts_on: NaiveDate,
}

/// The survey a submission belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    SchoolOutput,
    DistrictOutput,
    ConsolidatedChecklist,
    PartnersInPlay,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::SchoolOutput,
        Category::DistrictOutput,
        Category::ConsolidatedChecklist,
        Category::PartnersInPlay,
    ];

    /// Level of the entity expected to submit this survey.
    pub fn level(self) -> EntityKind {
        match self {
            Category::DistrictOutput => EntityKind::District,
            Category::SchoolOutput | Category::ConsolidatedChecklist | Category::PartnersInPlay => {
                EntityKind::School
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::SchoolOutput => "school-output",
            Category::DistrictOutput => "district-output",
            Category::ConsolidatedChecklist => "consolidated-checklist",
            Category::PartnersInPlay => "partners-in-play",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|category| category.as_str() == raw.trim())
            .ok_or_else(|| format!("unknown submission category '{raw}'"))
    }
}

/// A single answer: numeric, boolean, or text (enumerated or free).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl AnswerValue {
    /// Interprets a raw cell from a flat export. Blank cells are unanswered.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        match raw.parse::<f64>() {
            Ok(number) if number.is_finite() => Some(AnswerValue::Number(number)),
            _ => Some(AnswerValue::Text(raw.to_string())),
        }
    }

    /// Numeric reading of the answer; text is accepted when it parses to a
    /// finite number.
    pub fn as_number(&self) -> Option<f64> {
        let number = match self {
            AnswerValue::Number(number) => Some(*number),
            AnswerValue::Text(text) => text.trim().parse::<f64>().ok(),
            AnswerValue::Bool(_) => None,
        };
        number.filter(|number| number.is_finite())
    }
}

impl fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerValue::Bool(value) => write!(f, "{value}"),
            AnswerValue::Number(value) => write!(f, "{value}"),
            AnswerValue::Text(value) => f.write_str(value),
        }
    }
}

/// A single survey response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: String,
    pub entity_id: EntityId,
    pub itinerary_id: ItineraryId,
    #[serde(rename = "categoryId")]
    pub category: Category,
    #[serde(default)]
    pub answers: BTreeMap<String, AnswerValue>,
    pub submitted_at: DateTime<Utc>,
}

impl Submission {
    pub fn answer(&self, question: &str) -> Option<&AnswerValue> {
        self.answers.get(question)
    }
}
