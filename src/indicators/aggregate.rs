use crate::error::EngineError;
use crate::hierarchy::{EntityId, NodeId};
use crate::indicators::classify::classify;
use crate::indicators::formula::Tally;
use crate::indicators::registry::{FormulaKind, IndicatorDefinition, Registry};
use crate::indicators::types::IndicatorResult;
use crate::snapshot::Snapshot;
use crate::submission::ItineraryId;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Results of one `compute` call: the scope entity and all its descendants.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    pub itinerary_id: ItineraryId,
    pub indicator_key: String,
    pub scope: EntityId,
    pub results: BTreeMap<EntityId, IndicatorResult>,
}

impl ResultSet {
    pub fn get(&self, entity: &EntityId) -> Option<&IndicatorResult> {
        self.results.get(entity)
    }

    /// The result for the scope entity itself.
    pub fn scope_result(&self) -> Option<&IndicatorResult> {
        self.results.get(&self.scope)
    }
}

/// Folds submissions bottom-up over the hierarchy held by a snapshot.
pub struct Aggregator<'a> {
    registry: &'a Registry,
    snapshot: &'a Snapshot,
}

impl<'a> Aggregator<'a> {
    pub fn new(registry: &'a Registry, snapshot: &'a Snapshot) -> Self {
        Self { registry, snapshot }
    }

    /// Computes `indicator_key` for `scope` and every descendant.
    ///
    /// Schools are evaluated from their own submissions. Every other level
    /// adds its own submissions (district surveys) to the summed child
    /// totals and divides once, which gives the same figure as pooling the
    /// raw submissions of the whole subtree. A child without eligible
    /// submissions contributes nothing and never blocks its parent.
    #[tracing::instrument(skip(self), fields(itinerary = %self.snapshot.itinerary_id()))]
    pub fn compute(&self, indicator_key: &str, scope: &EntityId) -> Result<ResultSet, EngineError> {
        let definition = self.registry.get(indicator_key)?;
        let hierarchy = self.snapshot.hierarchy();
        let root = hierarchy
            .node_id(scope)
            .ok_or_else(|| EngineError::EntityNotFound { id: scope.clone() })?;

        let mut pending: HashMap<NodeId, Tally> = HashMap::new();
        let mut results = BTreeMap::new();

        for node in hierarchy.post_order(root) {
            let mut tally = self.own_tally(definition, node);
            for child in hierarchy.children(node) {
                if let Some(child_tally) = pending.remove(child) {
                    tally.merge(child_tally);
                }
            }

            let result = self.finish(definition, node, &tally);
            debug!(
                entity = %result.entity_id,
                numerator = result.numerator,
                denominator = result.denominator,
                status = %result.status,
                "Indicator computed"
            );
            results.insert(result.entity_id.clone(), result);
            pending.insert(node, tally);
        }

        info!(
            indicator = indicator_key,
            scope = %scope,
            entities = results.len(),
            "Aggregation complete"
        );

        Ok(ResultSet {
            itinerary_id: self.snapshot.itinerary_id().clone(),
            indicator_key: indicator_key.to_string(),
            scope: scope.clone(),
            results,
        })
    }

    fn own_tally(&self, definition: &IndicatorDefinition, node: NodeId) -> Tally {
        let mut tally = Tally::default();
        for submission in self.snapshot.submissions_for(node, definition.category) {
            tally.record(definition, submission);
        }

        let entity = self.snapshot.hierarchy().entity(node);
        if definition.kind == FormulaKind::DistinctCount && entity.kind == definition.category.level() {
            tally.eligible += 1;
        }

        tally
    }

    fn finish(&self, definition: &IndicatorDefinition, node: NodeId, tally: &Tally) -> IndicatorResult {
        let entity = self.snapshot.hierarchy().entity(node);
        let measurement = tally.measure(definition);
        let status = classify(definition, &measurement);

        IndicatorResult {
            entity_id: entity.id.clone(),
            entity_name: entity.name.clone(),
            entity_kind: entity.kind,
            itinerary_id: self.snapshot.itinerary_id().clone(),
            indicator_key: definition.key.clone(),
            kind: definition.kind,
            numerator: measurement.numerator,
            denominator: measurement.denominator,
            value: measurement.value,
            percentage: measurement.percentage,
            components: measurement.components,
            status,
            detail: tally.sorted_detail(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{EntityKind, EntityRecord, Hierarchy};
    use crate::indicators::types::Status;
    use crate::submission::{AnswerValue, Category, Submission};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn hierarchy() -> Arc<Hierarchy> {
        Arc::new(
            Hierarchy::build(vec![
                EntityRecord::new("r1", EntityKind::Region, "Volta", None),
                EntityRecord::new("d1", EntityKind::District, "Ho", Some("r1")),
                EntityRecord::new("c1", EntityKind::Circuit, "North", Some("d1")),
                EntityRecord::new("c2", EntityKind::Circuit, "South", Some("d1")),
                EntityRecord::new("a", EntityKind::School, "School A", Some("c1")),
                EntityRecord::new("b", EntityKind::School, "School B", Some("c1")),
                EntityRecord::new("e", EntityKind::School, "School E", Some("c2")),
            ])
            .unwrap(),
        )
    }

    fn attendance(id: &str, school: &str, student: &str, teacher: &str) -> Submission {
        Submission {
            id: id.to_string(),
            entity_id: school.into(),
            itinerary_id: "t1".into(),
            category: Category::SchoolOutput,
            answers: [
                ("student_attendance", student),
                ("teacher_attendance", teacher),
            ]
            .into_iter()
            .map(|(key, value)| (key.to_string(), AnswerValue::Text(value.to_string())))
            .collect(),
            submitted_at: Utc.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap(),
        }
    }

    fn snapshot() -> Snapshot {
        Snapshot::new(
            "t1".into(),
            hierarchy(),
            vec![
                attendance("a1", "a", "yes", "no"),
                attendance("a2", "a", "yes", "no"),
                attendance("b1", "b", "yes", "yes"),
            ],
        )
    }

    #[test]
    fn test_teacher_attendance_rolls_up_by_summing() {
        let registry = Registry::builtin();
        let snapshot = snapshot();
        let results = Aggregator::new(&registry, &snapshot)
            .compute("teacherAttendance", &"c1".into())
            .unwrap();

        let school_a = results.get(&"a".into()).unwrap();
        let school_b = results.get(&"b".into()).unwrap();
        let circuit = results.scope_result().unwrap();

        assert_eq!(school_a.percentage, Some(0.0));
        assert_eq!(school_b.percentage, Some(100.0));
        assert_eq!((circuit.numerator, circuit.denominator), (1.0, 3.0));
        assert!((circuit.percentage.unwrap() - 33.333).abs() < 0.01);
        assert_eq!(circuit.detail.len(), 3);
    }

    #[test]
    fn test_empty_child_contributes_nothing() {
        let registry = Registry::builtin();
        let snapshot = snapshot();
        let results = Aggregator::new(&registry, &snapshot)
            .compute("teacherAttendance", &"d1".into())
            .unwrap();

        let empty = results.get(&"c2".into()).unwrap();
        let district = results.scope_result().unwrap();

        assert_eq!(empty.percentage, None);
        assert_eq!(empty.status, Status::NoData);
        assert_eq!((district.numerator, district.denominator), (1.0, 3.0));
        assert_eq!(results.results.len(), 6);
    }

    #[test]
    fn test_schools_reached_counts_each_school_once() {
        let registry = Registry::builtin();
        let snapshot = snapshot();
        let results = Aggregator::new(&registry, &snapshot)
            .compute("schoolsReached", &"r1".into())
            .unwrap();

        let region = results.scope_result().unwrap();
        assert_eq!(region.value, Some(2.0));
        assert_eq!(region.denominator, 3.0);
        assert!((region.percentage.unwrap() - 66.666).abs() < 0.01);
    }

    #[test]
    fn test_unknown_indicator_is_fatal() {
        let registry = Registry::builtin();
        let snapshot = snapshot();
        let err = Aggregator::new(&registry, &snapshot)
            .compute("attendance", &"r1".into())
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownIndicator { .. }));
    }

    #[test]
    fn test_unknown_scope_is_entity_not_found() {
        let registry = Registry::builtin();
        let snapshot = snapshot();
        let err = Aggregator::new(&registry, &snapshot)
            .compute("teacherAttendance", &"nowhere".into())
            .unwrap_err();
        assert!(matches!(err, EngineError::EntityNotFound { .. }));
    }

    #[test]
    fn test_compute_is_idempotent() {
        let registry = Registry::builtin();
        let snapshot = snapshot();
        let aggregator = Aggregator::new(&registry, &snapshot);

        let first = aggregator.compute("studentAttendance", &"r1".into()).unwrap();
        let second = aggregator.compute("studentAttendance", &"r1".into()).unwrap();
        assert_eq!(first, second);
    }
}
