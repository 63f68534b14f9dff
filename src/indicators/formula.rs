//! Per-submission formula evaluation and the running tally folded up the tree.

use std::collections::{BTreeMap, BTreeSet};

use crate::hierarchy::EntityId;
use crate::indicators::registry::{FormulaKind, IndicatorDefinition};
use crate::indicators::types::{AnswerError, Component, Contribution, Measurement, Outcome};
use crate::indicators::utility::pct;
use crate::submission::{AnswerValue, Submission};

/// What one submission adds to the tally.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Evaluation {
    pub numerator: f64,
    pub denominator: f64,
    pub components: Vec<(String, Component)>,
    pub labels: Vec<String>,
    /// The submission qualifies an entity for a distinct count.
    pub qualifies: bool,
}

/// Evaluates one submission against a definition.
///
/// Any invalid or missing input rejects the whole submission so a partial
/// reading never skews an average.
pub fn evaluate(
    definition: &IndicatorDefinition,
    submission: &Submission,
) -> Result<Evaluation, AnswerError> {
    match definition.kind {
        FormulaKind::Ratio => evaluate_ratio(definition, submission),
        FormulaKind::WeightedAverage => evaluate_weighted(definition, submission),
        FormulaKind::Sum => evaluate_sum(definition, submission),
        FormulaKind::DistinctCount => evaluate_distinct(definition, submission),
    }
}

fn evaluate_ratio(
    definition: &IndicatorDefinition,
    submission: &Submission,
) -> Result<Evaluation, AnswerError> {
    let mut evaluation = Evaluation::default();

    for input in &definition.inputs {
        let Some(answer) = submission.answer(input) else {
            continue;
        };
        let positive = definition.answer_rule.evaluate(input, answer)?;
        let numerator = if positive { 1.0 } else { 0.0 };

        evaluation.numerator += numerator;
        evaluation.denominator += 1.0;
        evaluation.components.push((
            input.clone(),
            Component {
                numerator,
                denominator: 1.0,
            },
        ));
        if let AnswerValue::Text(text) = answer {
            evaluation.labels.push(text.trim().to_string());
        }
    }

    if evaluation.denominator == 0.0 {
        return Err(AnswerError::missing(&definition.inputs.join(", ")));
    }

    Ok(evaluation)
}

fn evaluate_weighted(
    definition: &IndicatorDefinition,
    submission: &Submission,
) -> Result<Evaluation, AnswerError> {
    let mut evaluation = Evaluation::default();

    for (input, weight) in definition.weighted_inputs() {
        let answer = submission
            .answer(input)
            .ok_or_else(|| AnswerError::missing(input))?;
        let score = answer
            .as_number()
            .ok_or_else(|| AnswerError::invalid(input, answer, "expected a numeric rating"))?;
        if !(0.0..=definition.scale_max).contains(&score) {
            return Err(AnswerError::invalid(
                input,
                answer,
                format!("outside 0..={}", definition.scale_max),
            ));
        }

        evaluation.numerator += weight * score;
        evaluation.components.push((
            input.to_string(),
            Component {
                numerator: score,
                denominator: 1.0,
            },
        ));
    }

    evaluation.denominator = 1.0;
    Ok(evaluation)
}

fn evaluate_sum(
    definition: &IndicatorDefinition,
    submission: &Submission,
) -> Result<Evaluation, AnswerError> {
    let mut evaluation = Evaluation::default();

    for input in &definition.inputs {
        let answer = submission
            .answer(input)
            .ok_or_else(|| AnswerError::missing(input))?;
        let amount = answer
            .as_number()
            .filter(|amount| *amount >= 0.0)
            .ok_or_else(|| AnswerError::invalid(input, answer, "expected a non-negative number"))?;

        evaluation.numerator += amount;
        evaluation.components.push((
            input.clone(),
            Component {
                numerator: amount,
                denominator: 1.0,
            },
        ));
    }

    evaluation.denominator = 1.0;
    Ok(evaluation)
}

fn evaluate_distinct(
    definition: &IndicatorDefinition,
    submission: &Submission,
) -> Result<Evaluation, AnswerError> {
    let mut qualifies = true;
    for input in &definition.inputs {
        let answer = submission
            .answer(input)
            .ok_or_else(|| AnswerError::missing(input))?;
        qualifies &= definition.answer_rule.evaluate(input, answer)?;
    }

    Ok(Evaluation {
        numerator: if qualifies { 1.0 } else { 0.0 },
        qualifies,
        ..Evaluation::default()
    })
}

/// Running totals for one entity's subtree.
///
/// Merging is associative and commutative: numerators and denominators add,
/// reached entities union.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tally {
    pub numerator: f64,
    pub denominator: f64,
    pub components: BTreeMap<String, Component>,
    pub reached: BTreeSet<EntityId>,
    /// Entities of the surveyed level inside the subtree (distinct counts).
    pub eligible: usize,
    pub detail: Vec<Contribution>,
}

impl Tally {
    /// Adds a submission, or records why it was left out.
    pub fn record(&mut self, definition: &IndicatorDefinition, submission: &Submission) {
        let outcome = match evaluate(definition, submission) {
            Ok(evaluation) => {
                self.numerator += evaluation.numerator;
                self.denominator += evaluation.denominator;
                for (input, component) in evaluation.components {
                    self.components
                        .entry(input)
                        .or_default()
                        .add(component.numerator, component.denominator);
                }
                if evaluation.qualifies {
                    self.reached.insert(submission.entity_id.clone());
                }
                Outcome::Counted {
                    numerator: evaluation.numerator,
                    denominator: evaluation.denominator,
                    labels: evaluation.labels,
                }
            }
            Err(reason) => {
                tracing::debug!(
                    submission = %submission.id,
                    indicator = %definition.key,
                    %reason,
                    "Submission excluded"
                );
                Outcome::Excluded { reason }
            }
        };

        self.detail.push(Contribution {
            submission_id: submission.id.clone(),
            entity_id: submission.entity_id.clone(),
            submitted_at: submission.submitted_at,
            outcome,
        });
    }

    pub fn merge(&mut self, other: Tally) {
        self.numerator += other.numerator;
        self.denominator += other.denominator;
        for (input, component) in other.components {
            self.components
                .entry(input)
                .or_default()
                .add(component.numerator, component.denominator);
        }
        self.reached.extend(other.reached);
        self.eligible += other.eligible;
        self.detail.extend(other.detail);
    }

    /// Drill-down entries in submission order.
    pub fn sorted_detail(&self) -> Vec<Contribution> {
        let mut detail = self.detail.clone();
        detail.sort_by(|a, b| {
            a.submitted_at
                .cmp(&b.submitted_at)
                .then_with(|| a.submission_id.cmp(&b.submission_id))
        });
        detail
    }

    /// Divides once, at this level, over the summed totals.
    pub fn measure(&self, definition: &IndicatorDefinition) -> Measurement {
        let (numerator, denominator) = match definition.kind {
            FormulaKind::DistinctCount => (self.reached.len() as f64, self.eligible as f64),
            _ => (self.numerator, self.denominator),
        };

        let (value, percentage) = match definition.kind {
            FormulaKind::Ratio => {
                let percentage = pct(numerator, denominator);
                (percentage.map(|p| p / 100.0), percentage)
            }
            FormulaKind::WeightedAverage => {
                let value = (denominator > 0.0).then(|| numerator / denominator);
                (value, value.map(|v| v / definition.scale_max * 100.0))
            }
            FormulaKind::Sum => ((denominator > 0.0).then_some(numerator), None),
            FormulaKind::DistinctCount => {
                let percentage = pct(numerator, denominator);
                (percentage.map(|_| numerator), percentage)
            }
        };

        Measurement {
            numerator,
            denominator,
            value,
            percentage,
            components: self.components.clone(),
        }
    }
}
