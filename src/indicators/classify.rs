//! Threshold classification into the status vocabulary.
//!
//! Every function here is pure. Absent data always maps to
//! [`Status::NoData`], never to a negative status.

use crate::error::EngineError;
use crate::indicators::registry::{IndicatorDefinition, Registry, Threshold};
use crate::indicators::types::{Measurement, Status};
use crate::submission::AnswerValue;

/// Availability of a set of binary sub-items.
///
/// | Positive / answered | Status     |
/// |---------------------|------------|
/// | all                 | Adequate   |
/// | none                | Inadequate |
/// | some                | Partial    |
/// | nothing answered    | NoData     |
pub fn availability(positive: f64, answered: f64) -> Status {
    match (positive, answered) {
        (_, answered) if answered <= 0.0 => Status::NoData,
        (positive, answered) if positive >= answered => Status::Adequate,
        (positive, _) if positive <= 0.0 => Status::Inadequate,
        _ => Status::Partial,
    }
}

/// Scored-quality split at a fixed cut line; the cut itself meets the standard.
pub fn cut(value: f64, threshold: f64) -> Status {
    if value >= threshold {
        Status::MeetsStandard
    } else {
        Status::BelowStandard
    }
}

/// Overall security rating from per-sub-item availability.
///
/// Sub-items without data are ignored. All adequate is Excellent, all
/// inadequate is Poor; otherwise Good when adequate items (partials counting
/// half) make up at least half of the rated items, Average below that.
pub fn security_rating(items: &[Status]) -> Status {
    let rated: Vec<Status> = items
        .iter()
        .copied()
        .filter(|status| !status.is_no_data())
        .collect();
    if rated.is_empty() {
        return Status::NoData;
    }

    let count = |wanted: Status| rated.iter().filter(|status| **status == wanted).count();
    let adequate = count(Status::Adequate);
    let partial = count(Status::Partial);
    let inadequate = count(Status::Inadequate);

    if adequate == rated.len() {
        Status::Excellent
    } else if inadequate == rated.len() {
        Status::Poor
    } else if 2 * adequate + partial >= rated.len() {
        Status::Good
    } else {
        Status::Average
    }
}

/// Classifies an aggregated measurement with the definition's threshold table.
pub fn classify(definition: &IndicatorDefinition, measurement: &Measurement) -> Status {
    if measurement.value.is_none() {
        return Status::NoData;
    }

    match &definition.threshold {
        Threshold::Unrated => Status::Unrated,
        Threshold::Availability => availability(measurement.numerator, measurement.denominator),
        Threshold::Cut { value } => match definition
            .kind
            .headline(measurement.value, measurement.percentage)
        {
            Some(measure) => cut(measure, *value),
            None => Status::NoData,
        },
        Threshold::SecurityRating => {
            let items: Vec<Status> = definition
                .inputs
                .iter()
                .map(|input| match measurement.components.get(input) {
                    Some(component) => availability(component.numerator, component.denominator),
                    None => Status::NoData,
                })
                .collect();
            security_rating(&items)
        }
    }
}

/// Classifies a single raw answer, e.g. one furniture item or one rating.
pub fn classify_answer(
    definition: &IndicatorDefinition,
    question: &str,
    answer: Option<&AnswerValue>,
) -> Status {
    let Some(answer) = answer else {
        return Status::NoData;
    };

    match &definition.threshold {
        Threshold::Unrated => Status::Unrated,
        Threshold::Availability | Threshold::SecurityRating => {
            match definition.answer_rule.evaluate(question, answer) {
                Ok(true) => Status::Adequate,
                Ok(false) => Status::Inadequate,
                Err(_) => Status::NoData,
            }
        }
        Threshold::Cut { value } => match answer.as_number() {
            Some(score) if (0.0..=definition.scale_max).contains(&score) => cut(score, *value),
            _ => Status::NoData,
        },
    }
}

/// Registry-keyed front end to the classification functions.
pub struct Classifier<'r> {
    registry: &'r Registry,
}

impl<'r> Classifier<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self { registry }
    }

    pub fn classify(&self, key: &str, measurement: &Measurement) -> Result<Status, EngineError> {
        Ok(classify(self.registry.get(key)?, measurement))
    }

    pub fn classify_answer(
        &self,
        key: &str,
        question: &str,
        answer: Option<&AnswerValue>,
    ) -> Result<Status, EngineError> {
        Ok(classify_answer(self.registry.get(key)?, question, answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::types::Component;

    fn rated(value: f64) -> Measurement {
        Measurement {
            numerator: value,
            denominator: 1.0,
            value: Some(value),
            percentage: Some(value / 5.0 * 100.0),
            ..Measurement::default()
        }
    }

    #[test]
    fn test_availability_boundaries() {
        assert_eq!(availability(3.0, 3.0), Status::Adequate);
        assert_eq!(availability(0.0, 3.0), Status::Inadequate);
        assert_eq!(availability(1.0, 3.0), Status::Partial);
        assert_eq!(availability(0.0, 0.0), Status::NoData);
    }

    #[test]
    fn test_cut_is_monotonic() {
        let mut previous = Status::BelowStandard;
        for step in 0..=50 {
            let status = cut(step as f64 / 10.0, 3.5);
            assert!(!(previous == Status::MeetsStandard && status == Status::BelowStandard));
            previous = status;
        }
        assert_eq!(cut(3.4, 3.5), Status::BelowStandard);
        assert_eq!(cut(3.5, 3.5), Status::MeetsStandard);
        assert_eq!(cut(3.6, 3.5), Status::MeetsStandard);
    }

    #[test]
    fn test_security_rating_levels() {
        use Status::*;
        assert_eq!(security_rating(&[Adequate, Adequate]), Excellent);
        assert_eq!(security_rating(&[Adequate, Partial, Inadequate]), Good);
        assert_eq!(security_rating(&[Partial, Inadequate, Inadequate]), Average);
        assert_eq!(security_rating(&[Inadequate, Inadequate]), Poor);
        assert_eq!(security_rating(&[NoData, NoData]), NoData);
    }

    #[test]
    fn test_teacher_skills_meets_standard() {
        let registry = Registry::builtin();
        let classifier = Classifier::new(&registry);

        assert_eq!(
            classifier.classify("teacherSkills", &rated(3.6)).unwrap(),
            Status::MeetsStandard
        );
        assert_eq!(
            classifier.classify("teacherSkills", &rated(3.2)).unwrap(),
            Status::BelowStandard
        );
    }

    #[test]
    fn test_empty_measurement_is_no_data() {
        let registry = Registry::builtin();
        for definition in registry.iter() {
            assert_eq!(classify(definition, &Measurement::default()), Status::NoData);
        }
    }

    #[test]
    fn test_security_from_components() {
        let registry = Registry::builtin();
        let security = registry.get("security").unwrap();
        let mut measurement = Measurement {
            numerator: 5.0,
            denominator: 8.0,
            value: Some(5.0 / 8.0),
            percentage: Some(62.5),
            ..Measurement::default()
        };
        let items = [
            ("fence_wall", 2.0),
            ("gate", 2.0),
            ("security_personnel", 1.0),
            ("lighting", 0.0),
        ];
        for (input, positive) in items {
            measurement.components.insert(
                input.to_string(),
                Component {
                    numerator: positive,
                    denominator: 2.0,
                },
            );
        }

        // Adequate, Adequate, Partial, Inadequate
        assert_eq!(classify(security, &measurement), Status::Good);
    }

    #[test]
    fn test_classify_raw_answers() {
        let registry = Registry::builtin();
        let classifier = Classifier::new(&registry);
        let borehole = AnswerValue::Text("Borehole".to_string());
        let none = AnswerValue::Text("Not Available".to_string());

        assert_eq!(
            classifier
                .classify_answer("waterSource", "water_source", Some(&borehole))
                .unwrap(),
            Status::Adequate
        );
        assert_eq!(
            classifier
                .classify_answer("waterSource", "water_source", Some(&none))
                .unwrap(),
            Status::Inadequate
        );
        assert_eq!(
            classifier
                .classify_answer("teacherSkills", "group_work", Some(&AnswerValue::Number(7.0)))
                .unwrap(),
            Status::NoData
        );
        assert_eq!(
            classifier.classify_answer("furniture", "desks", None).unwrap(),
            Status::NoData
        );
    }

    #[test]
    fn test_unknown_key_fails() {
        let registry = Registry::builtin();
        let classifier = Classifier::new(&registry);
        assert!(classifier.classify("nope", &rated(4.0)).is_err());
    }
}
