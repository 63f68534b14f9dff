//! Indicator formula catalogue.
//!
//! A [`Registry`] is an immutable lookup table built once and passed to the
//! aggregator. Several registries can coexist, e.g. formula sets versioned per
//! reporting period.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::error::EngineError;
use crate::indicators::types::AnswerError;
use crate::submission::Category::{
    ConsolidatedChecklist, DistrictOutput, PartnersInPlay, SchoolOutput,
};
use crate::submission::{AnswerValue, Category};

const WEIGHT_TOLERANCE: f64 = 1e-9;

/// How an indicator turns submissions into a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FormulaKind {
    Ratio,
    WeightedAverage,
    Sum,
    DistinctCount,
}

impl FormulaKind {
    /// Picks the figure shown, ranked and compared against a cut: the
    /// percentage for ratios, the value otherwise. A distinct count ranks by
    /// the number of entities reached; its coverage stays in `percentage`.
    pub fn headline(self, value: Option<f64>, percentage: Option<f64>) -> Option<f64> {
        match self {
            FormulaKind::Ratio => percentage,
            FormulaKind::WeightedAverage | FormulaKind::Sum | FormulaKind::DistinctCount => value,
        }
    }
}

/// Threshold table used to classify an indicator's value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "camelCase")]
pub enum Threshold {
    #[default]
    Unrated,
    /// Adequate / Partial / Inadequate from positive vs answered sub-items.
    Availability,
    /// MeetsStandard at or above `value`, BelowStandard under it.
    Cut { value: f64 },
    /// Excellent / Good / Average / Poor from per-sub-item availability.
    SecurityRating,
}

/// Decides whether a categorical answer counts as positive.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "camelCase")]
pub enum AnswerRule {
    /// yes/no style answers; anything unrecognised is invalid.
    #[default]
    Affirmative,
    /// Any answer other than the listed negatives counts, whatever it names.
    AnyExcept { negatives: Vec<String> },
}

const AFFIRMATIVE: &[&str] = &[
    "yes",
    "y",
    "true",
    "available",
    "adequate",
    "present",
    "done",
    "completed",
];
const NEGATIVE: &[&str] = &[
    "no",
    "n",
    "false",
    "not available",
    "unavailable",
    "inadequate",
    "absent",
    "none",
    "not done",
];

impl AnswerRule {
    pub fn evaluate(&self, question: &str, answer: &AnswerValue) -> Result<bool, AnswerError> {
        match answer {
            AnswerValue::Bool(value) => Ok(*value),
            AnswerValue::Number(number) if number.is_finite() && *number >= 0.0 => {
                Ok(*number > 0.0)
            }
            AnswerValue::Number(number) => Err(AnswerError::invalid(
                question,
                number,
                "expected a non-negative count",
            )),
            AnswerValue::Text(text) => {
                let normalized = text.trim().to_ascii_lowercase();
                if normalized.is_empty() {
                    return Err(AnswerError::missing(question));
                }
                match self {
                    AnswerRule::Affirmative => {
                        if AFFIRMATIVE.contains(&normalized.as_str()) {
                            Ok(true)
                        } else if NEGATIVE.contains(&normalized.as_str()) {
                            Ok(false)
                        } else {
                            Err(AnswerError::invalid(question, text, "expected a yes/no answer"))
                        }
                    }
                    AnswerRule::AnyExcept { negatives } => Ok(!negatives
                        .iter()
                        .any(|negative| negative.trim().eq_ignore_ascii_case(&normalized))),
                }
            }
        }
    }
}

/// Declarative formula for one indicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorDefinition {
    pub key: String,
    pub label: String,
    /// Which survey feeds this indicator.
    pub category: Category,
    pub kind: FormulaKind,
    /// Question keys read from each submission.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Parallel to `inputs`; weighted averages only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<f64>>,
    #[serde(default)]
    pub threshold: Threshold,
    /// Bound of each rating for weighted averages and of any cut threshold.
    /// Percentage-based indicators use 100.
    #[serde(default = "default_scale_max")]
    pub scale_max: f64,
    #[serde(default)]
    pub answer_rule: AnswerRule,
}

fn default_scale_max() -> f64 {
    100.0
}

impl IndicatorDefinition {
    pub fn validate(&self) -> Result<(), RegistryError> {
        let key = || self.key.clone();

        if !self.scale_max.is_finite() || self.scale_max <= 0.0 {
            return Err(RegistryError::InvalidScale {
                key: key(),
                scale_max: self.scale_max,
            });
        }

        if self.inputs.is_empty() && self.kind != FormulaKind::DistinctCount {
            return Err(RegistryError::NoInputs { key: key() });
        }

        match (&self.weights, self.kind) {
            (Some(weights), FormulaKind::WeightedAverage) => {
                if weights.len() != self.inputs.len() {
                    return Err(RegistryError::WeightsMismatch {
                        key: key(),
                        inputs: self.inputs.len(),
                        weights: weights.len(),
                    });
                }
                if weights.iter().any(|weight| !weight.is_finite() || *weight < 0.0) {
                    return Err(RegistryError::NegativeWeight { key: key() });
                }
                let sum: f64 = weights.iter().sum();
                if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
                    return Err(RegistryError::WeightsSum { key: key(), sum });
                }
            }
            (None, FormulaKind::WeightedAverage) => {
                return Err(RegistryError::MissingWeights { key: key() });
            }
            (Some(_), _) => return Err(RegistryError::UnexpectedWeights { key: key() }),
            (None, _) => {}
        }

        if let Threshold::Cut { value } = self.threshold {
            if !(0.0..=self.scale_max).contains(&value) {
                return Err(RegistryError::ThresholdOutOfScale {
                    key: key(),
                    value,
                    scale_max: self.scale_max,
                });
            }
        }

        Ok(())
    }

    /// `(input, weight)` pairs; equal weights when none are declared.
    pub fn weighted_inputs(&self) -> impl Iterator<Item = (&str, f64)> {
        let equal = 1.0 / self.inputs.len().max(1) as f64;
        self.inputs.iter().enumerate().map(move |(position, input)| {
            let weight = self
                .weights
                .as_ref()
                .and_then(|weights| weights.get(position).copied())
                .unwrap_or(equal);
            (input.as_str(), weight)
        })
    }
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("indicator '{key}' is defined more than once")]
    DuplicateKey { key: String },

    #[error("indicator '{key}' has no inputs")]
    NoInputs { key: String },

    #[error("indicator '{key}' has {weights} weights for {inputs} inputs")]
    WeightsMismatch {
        key: String,
        inputs: usize,
        weights: usize,
    },

    #[error("indicator '{key}' weights sum to {sum}, expected 1.0")]
    WeightsSum { key: String, sum: f64 },

    #[error("indicator '{key}' has a negative or non-finite weight")]
    NegativeWeight { key: String },

    #[error("weighted average '{key}' declares no weights")]
    MissingWeights { key: String },

    #[error("indicator '{key}' declares weights but is not a weighted average")]
    UnexpectedWeights { key: String },

    #[error("indicator '{key}' threshold {value} is outside 0..={scale_max}")]
    ThresholdOutOfScale {
        key: String,
        value: f64,
        scale_max: f64,
    },

    #[error("indicator '{key}' has invalid scale maximum {scale_max}")]
    InvalidScale { key: String, scale_max: f64 },

    #[error("failed to read registry file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse registry: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct RegistryDocument {
    indicators: Vec<IndicatorDefinition>,
}

/// Immutable catalogue of indicator definitions keyed by indicator key.
#[derive(Debug, Clone)]
pub struct Registry {
    definitions: BTreeMap<String, IndicatorDefinition>,
}

impl Registry {
    /// Validates every definition and builds the lookup table.
    pub fn new(definitions: Vec<IndicatorDefinition>) -> Result<Self, RegistryError> {
        let mut table = BTreeMap::new();
        for definition in definitions {
            definition.validate()?;
            if table.contains_key(&definition.key) {
                return Err(RegistryError::DuplicateKey {
                    key: definition.key,
                });
            }
            table.insert(definition.key.clone(), definition);
        }
        Ok(Self { definitions: table })
    }

    /// The catalogue used by the monitoring programme.
    pub fn builtin() -> Self {
        Self::new(builtin_definitions()).expect("built-in indicator catalogue is valid")
    }

    /// Parses a `{"indicators": [...]}` document.
    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let document: RegistryDocument = serde_json::from_str(json)?;
        Self::new(document.indicators)
    }

    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let json = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn get(&self, key: &str) -> Result<&IndicatorDefinition, EngineError> {
        self.definitions
            .get(key)
            .ok_or_else(|| EngineError::UnknownIndicator {
                key: key.to_string(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndicatorDefinition> {
        self.definitions.values()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// Weights for learning-environment quality.
static LEARNING_ENVIRONMENT: &[(&str, f64)] = &[
    ("friendly_tone", 0.30),
    ("acknowledging_effort", 0.30),
    ("pupil_participation", 0.40),
];

/// The ten equally weighted facilitation questions.
static TEACHER_SKILLS: &[&str] = &[
    "lesson_introduction",
    "questioning_techniques",
    "use_of_learning_materials",
    "pupil_engagement",
    "group_work",
    "feedback_to_pupils",
    "classroom_management",
    "time_management",
    "assessment_for_learning",
    "lesson_conclusion",
];

static FURNITURE: &[&str] = &["desks", "chairs", "cupboards"];
static SANITATION: &[&str] = &["toilet_facility", "urinal_facility", "handwashing_facility"];
static SECURITY: &[&str] = &["fence_wall", "gate", "security_personnel", "lighting"];

const RATING_SCALE: f64 = 5.0;
const RATING_CUT: f64 = 3.5;

/// Single-question ratios: key, label, survey, question.
static RATIOS: &[(&str, &str, Category, &str)] = &[
    ("implementationPlans", "Implementation plans", SchoolOutput, "implementation_plan"),
    ("developmentPlans", "School development plans", SchoolOutput, "development_plan"),
    ("lessonPlans", "Lesson plans", SchoolOutput, "lesson_plan"),
    ("studentAttendance", "Student attendance", SchoolOutput, "student_attendance"),
    ("teacherAttendance", "Teacher attendance", SchoolOutput, "teacher_attendance"),
    ("outputCompletion", "Output completion rate", DistrictOutput, "output_completed"),
    ("outcomeCompletion", "Outcome completion rate", DistrictOutput, "outcome_achieved"),
];

fn definition(
    key: &str,
    label: &str,
    category: Category,
    kind: FormulaKind,
    inputs: &[&str],
) -> IndicatorDefinition {
    IndicatorDefinition {
        key: key.to_string(),
        label: label.to_string(),
        category,
        kind,
        inputs: inputs.iter().map(|input| input.to_string()).collect(),
        weights: None,
        threshold: Threshold::Unrated,
        scale_max: default_scale_max(),
        answer_rule: AnswerRule::Affirmative,
    }
}

fn rating(key: &str, label: &str, weighted: Vec<(&str, f64)>) -> IndicatorDefinition {
    let (inputs, weights): (Vec<&str>, Vec<f64>) = weighted.into_iter().unzip();
    IndicatorDefinition {
        weights: Some(weights),
        threshold: Threshold::Cut { value: RATING_CUT },
        scale_max: RATING_SCALE,
        ..definition(
            key,
            label,
            PartnersInPlay,
            FormulaKind::WeightedAverage,
            &inputs,
        )
    }
}

fn checklist(key: &str, label: &str, inputs: &[&str], threshold: Threshold) -> IndicatorDefinition {
    IndicatorDefinition {
        threshold,
        ..definition(key, label, ConsolidatedChecklist, FormulaKind::Ratio, inputs)
    }
}

fn builtin_definitions() -> Vec<IndicatorDefinition> {
    let mut definitions: Vec<IndicatorDefinition> = RATIOS
        .iter()
        .map(|(key, label, category, question)| {
            definition(key, label, *category, FormulaKind::Ratio, &[*question])
        })
        .collect();

    let skill_weight = 1.0 / TEACHER_SKILLS.len() as f64;
    let water = AnswerRule::AnyExcept {
        negatives: vec!["Not Available".to_string()],
    };

    definitions.extend([
        definition(
            "enrollment",
            "Enrollment",
            SchoolOutput,
            FormulaKind::Sum,
            &["boys", "girls"],
        ),
        definition(
            "schoolsReached",
            "Schools reached",
            SchoolOutput,
            FormulaKind::DistinctCount,
            &[],
        ),
        rating(
            "learningEnvironment",
            "Learning environment quality",
            LEARNING_ENVIRONMENT.to_vec(),
        ),
        rating(
            "teacherSkills",
            "Teacher facilitation skill",
            TEACHER_SKILLS
                .iter()
                .map(|input| (*input, skill_weight))
                .collect(),
        ),
        checklist("furniture", "Furniture", FURNITURE, Threshold::Availability),
        checklist("sanitation", "Sanitation", SANITATION, Threshold::Availability),
        IndicatorDefinition {
            answer_rule: water,
            ..checklist(
                "waterSource",
                "Water source",
                &["water_source"],
                Threshold::Availability,
            )
        },
        checklist("security", "Overall security", SECURITY, Threshold::SecurityRating),
    ]);

    definitions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_weights_are_normalized() {
        let registry = Registry::builtin();
        let averages: Vec<_> = registry
            .iter()
            .filter(|definition| definition.kind == FormulaKind::WeightedAverage)
            .collect();

        assert_eq!(averages.len(), 2);
        for definition in averages {
            let sum: f64 = definition.weights.as_ref().unwrap().iter().sum();
            assert!((sum - 1.0).abs() <= 1e-9, "{} sums to {sum}", definition.key);
        }
    }

    #[test]
    fn test_teacher_skills_has_ten_questions() {
        let registry = Registry::builtin();
        let skills = registry.get("teacherSkills").unwrap();
        assert_eq!(skills.inputs.len(), 10);
        assert_eq!(skills.threshold, Threshold::Cut { value: 3.5 });
    }

    #[test]
    fn test_headline_per_kind() {
        assert_eq!(FormulaKind::Ratio.headline(Some(0.5), Some(50.0)), Some(50.0));
        assert_eq!(FormulaKind::Sum.headline(Some(420.0), None), Some(420.0));
        assert_eq!(
            FormulaKind::DistinctCount.headline(Some(2.0), Some(66.7)),
            Some(2.0)
        );
    }

    #[test]
    fn test_unknown_indicator() {
        let registry = Registry::builtin();
        let err = registry.get("missing").unwrap_err();
        assert!(matches!(err, EngineError::UnknownIndicator { key } if key == "missing"));
    }

    #[test]
    fn test_rejects_weights_not_summing_to_one() {
        let mut bad = Registry::builtin().get("learningEnvironment").unwrap().clone();
        bad.weights = Some(vec![0.3, 0.3, 0.3]);

        let err = Registry::new(vec![bad]).unwrap_err();
        assert!(matches!(err, RegistryError::WeightsSum { .. }));
    }

    #[test]
    fn test_rejects_threshold_outside_scale() {
        let mut bad = Registry::builtin().get("teacherSkills").unwrap().clone();
        bad.threshold = Threshold::Cut { value: 6.0 };

        let err = Registry::new(vec![bad]).unwrap_err();
        assert!(matches!(err, RegistryError::ThresholdOutOfScale { .. }));
    }

    #[test]
    fn test_rejects_duplicate_keys() {
        let lessons = Registry::builtin().get("lessonPlans").unwrap().clone();
        let err = Registry::new(vec![lessons.clone(), lessons]).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateKey { .. }));
    }

    #[test]
    fn test_from_json_versioned_set() {
        let json = r#"{
            "indicators": [
                {
                    "key": "teacherSkills",
                    "label": "Teacher skill (2023 formula)",
                    "category": "partners-in-play",
                    "kind": "weightedAverage",
                    "inputs": ["a", "b"],
                    "weights": [0.5, 0.5],
                    "threshold": {"family": "cut", "value": 3.0},
                    "scaleMax": 5
                },
                {
                    "key": "waterSource",
                    "label": "Water",
                    "category": "consolidated-checklist",
                    "kind": "ratio",
                    "inputs": ["water_source"],
                    "threshold": {"family": "availability"},
                    "answerRule": {"rule": "anyExcept", "negatives": ["Not Available"]}
                }
            ]
        }"#;

        let older = Registry::from_json(json).unwrap();
        let current = Registry::builtin();

        assert_eq!(older.len(), 2);
        assert_eq!(older.get("waterSource").unwrap().scale_max, 100.0);
        assert_ne!(
            older.get("teacherSkills").unwrap().threshold,
            current.get("teacherSkills").unwrap().threshold
        );
    }

    #[test]
    fn test_affirmative_rule() {
        let rule = AnswerRule::Affirmative;
        let yes = AnswerValue::Text("Yes".to_string());
        let no = AnswerValue::Text("no".to_string());
        let odd = AnswerValue::Text("sometimes".to_string());

        assert_eq!(rule.evaluate("q", &yes), Ok(true));
        assert_eq!(rule.evaluate("q", &no), Ok(false));
        assert_eq!(rule.evaluate("q", &AnswerValue::Number(0.0)), Ok(false));
        assert!(rule.evaluate("q", &odd).is_err());
    }

    #[test]
    fn test_any_source_counts_for_water() {
        let rule = AnswerRule::AnyExcept {
            negatives: vec!["Not Available".to_string()],
        };
        for source in ["Pipe-borne", "Borehole", "Well", "Stream"] {
            let answer = AnswerValue::Text(source.to_string());
            assert_eq!(rule.evaluate("water_source", &answer), Ok(true));
        }
        let missing = AnswerValue::Text("not available".to_string());
        assert_eq!(rule.evaluate("water_source", &missing), Ok(false));
    }
}
