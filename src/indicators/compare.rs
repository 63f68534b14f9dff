//! Cross-entity breakdowns and historical trends over stored results.
//!
//! Nothing here recomputes an indicator: both views read the
//! [`IndicatorResult`]s already held in a [`ResultStore`].

use chrono::NaiveDate;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use crate::error::EngineError;
use crate::hierarchy::{EntityId, EntityKind, Hierarchy};
use crate::indicators::aggregate::ResultSet;
use crate::indicators::types::{IndicatorResult, Status};
use crate::submission::{Itinerary, ItineraryId};

/// Computed results keyed by itinerary and indicator.
#[derive(Debug, Clone, Default)]
pub struct ResultStore {
    itineraries: Vec<Itinerary>,
    results: HashMap<(ItineraryId, String), BTreeMap<EntityId, IndicatorResult>>,
}

impl ResultStore {
    /// Creates a store over an itinerary catalogue, kept in chronological order.
    pub fn new(mut itineraries: Vec<Itinerary>) -> Self {
        itineraries.sort_by(|a, b| a.starts_on.cmp(&b.starts_on).then_with(|| a.id.cmp(&b.id)));
        Self {
            itineraries,
            results: HashMap::new(),
        }
    }

    /// Adds a result set. Results for the same entity are replaced, which is
    /// harmless because recomputation over the same snapshot is idempotent.
    pub fn insert(&mut self, set: ResultSet) {
        self.results
            .entry((set.itinerary_id, set.indicator_key))
            .or_default()
            .extend(set.results);
    }

    pub fn get(
        &self,
        itinerary: &ItineraryId,
        indicator_key: &str,
        entity: &EntityId,
    ) -> Option<&IndicatorResult> {
        self.results
            .get(&(itinerary.clone(), indicator_key.to_string()))
            .and_then(|results| results.get(entity))
    }

    pub fn contains(&self, itinerary: &ItineraryId, indicator_key: &str, entity: &EntityId) -> bool {
        self.get(itinerary, indicator_key, entity).is_some()
    }

    /// Catalogue entries, oldest first.
    pub fn itineraries(&self) -> &[Itinerary] {
        &self.itineraries
    }

    pub fn itinerary(&self, id: &ItineraryId) -> Option<&Itinerary> {
        self.itineraries.iter().find(|itinerary| &itinerary.id == id)
    }
}

/// One child of the compared parent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakdownRow {
    pub entity_id: EntityId,
    pub entity_name: String,
    pub entity_kind: EntityKind,
    pub value: Option<f64>,
    pub status: Status,
}

/// One itinerary of a trend series.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub itinerary_id: ItineraryId,
    pub label: String,
    pub starts_on: NaiveDate,
    pub value: Option<f64>,
    pub status: Status,
}

pub struct Comparator<'a> {
    store: &'a ResultStore,
    hierarchy: &'a Hierarchy,
}

impl<'a> Comparator<'a> {
    pub fn new(store: &'a ResultStore, hierarchy: &'a Hierarchy) -> Self {
        Self { store, hierarchy }
    }

    /// Ranks the children of `parent` by their headline value, highest first.
    ///
    /// Ties break on name, then id. Children without a value come last.
    pub fn breakdown(
        &self,
        itinerary: &ItineraryId,
        indicator_key: &str,
        parent: &EntityId,
    ) -> Result<Vec<BreakdownRow>, EngineError> {
        let node = self
            .hierarchy
            .node_id(parent)
            .ok_or_else(|| EngineError::EntityNotFound { id: parent.clone() })?;

        let mut rows: Vec<BreakdownRow> = self
            .hierarchy
            .children(node)
            .iter()
            .map(|child| {
                let entity = self.hierarchy.entity(*child);
                let result = self.store.get(itinerary, indicator_key, &entity.id);
                BreakdownRow {
                    entity_id: entity.id.clone(),
                    entity_name: entity.name.clone(),
                    entity_kind: entity.kind,
                    value: result.and_then(IndicatorResult::headline),
                    status: result.map_or(Status::NoData, |result| result.status),
                }
            })
            .collect();

        rows.sort_by(|a, b| {
            descending(a.value, b.value)
                .then_with(|| a.entity_name.cmp(&b.entity_name))
                .then_with(|| a.entity_id.cmp(&b.entity_id))
        });

        Ok(rows)
    }

    /// The last `limit` itineraries holding a result for `entity`, oldest first.
    ///
    /// Fewer stored itineraries give fewer points; the series is never padded.
    pub fn trend(&self, indicator_key: &str, entity: &EntityId, limit: usize) -> Vec<TrendPoint> {
        let mut points: Vec<TrendPoint> = self
            .store
            .itineraries()
            .iter()
            .rev()
            .filter_map(|itinerary| {
                let result = self.store.get(&itinerary.id, indicator_key, entity)?;
                Some(TrendPoint {
                    itinerary_id: itinerary.id.clone(),
                    label: itinerary.label.clone(),
                    starts_on: itinerary.starts_on,
                    value: result.headline(),
                    status: result.status,
                })
            })
            .take(limit)
            .collect();

        points.reverse();
        points
    }
}

fn descending(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::EntityRecord;
    use crate::indicators::registry::FormulaKind;

    fn hierarchy() -> Hierarchy {
        Hierarchy::build(vec![
            EntityRecord::new("r1", EntityKind::Region, "Volta", None),
            EntityRecord::new("d1", EntityKind::District, "Ho", Some("r1")),
            EntityRecord::new("c1", EntityKind::Circuit, "Kpando", Some("d1")),
            EntityRecord::new("c2", EntityKind::Circuit, "Agotime", Some("d1")),
            EntityRecord::new("c3", EntityKind::Circuit, "Sokode", Some("d1")),
            EntityRecord::new("c4", EntityKind::Circuit, "Adaklu", Some("d1")),
        ])
        .unwrap()
    }

    fn itinerary(id: &str, month: u32) -> Itinerary {
        Itinerary {
            id: id.into(),
            label: format!("Term {month}"),
            starts_on: NaiveDate::from_ymd_opt(2024, month, 1).unwrap(),
        }
    }

    fn result(itinerary: &str, entity: &str, name: &str, percentage: Option<f64>) -> IndicatorResult {
        IndicatorResult {
            entity_id: entity.into(),
            entity_name: name.to_string(),
            entity_kind: EntityKind::Circuit,
            itinerary_id: itinerary.into(),
            indicator_key: "lessonPlans".to_string(),
            kind: FormulaKind::Ratio,
            numerator: percentage.unwrap_or(0.0),
            denominator: if percentage.is_some() { 100.0 } else { 0.0 },
            value: percentage.map(|p| p / 100.0),
            percentage,
            components: BTreeMap::new(),
            status: if percentage.is_some() {
                Status::Unrated
            } else {
                Status::NoData
            },
            detail: Vec::new(),
        }
    }

    fn set(itinerary: &str, results: Vec<IndicatorResult>) -> ResultSet {
        ResultSet {
            itinerary_id: itinerary.into(),
            indicator_key: "lessonPlans".to_string(),
            scope: "d1".into(),
            results: results
                .into_iter()
                .map(|result| (result.entity_id.clone(), result))
                .collect(),
        }
    }

    #[test]
    fn test_breakdown_orders_by_value_then_name() {
        let hierarchy = hierarchy();
        let mut store = ResultStore::new(vec![itinerary("t1", 1)]);
        store.insert(set(
            "t1",
            vec![
                result("t1", "c1", "Kpando", Some(50.0)),
                result("t1", "c2", "Agotime", Some(80.0)),
                result("t1", "c3", "Sokode", Some(50.0)),
                result("t1", "c4", "Adaklu", None),
            ],
        ));

        let rows = Comparator::new(&store, &hierarchy)
            .breakdown(&"t1".into(), "lessonPlans", &"d1".into())
            .unwrap();
        let names: Vec<&str> = rows.iter().map(|row| row.entity_name.as_str()).collect();

        assert_eq!(names, vec!["Agotime", "Kpando", "Sokode", "Adaklu"]);
        assert_eq!(rows[3].status, Status::NoData);
        assert_eq!(rows[3].value, None);
    }

    #[test]
    fn test_breakdown_unknown_parent() {
        let hierarchy = hierarchy();
        let store = ResultStore::default();
        let err = Comparator::new(&store, &hierarchy)
            .breakdown(&"t1".into(), "lessonPlans", &"d9".into())
            .unwrap_err();
        assert!(matches!(err, EngineError::EntityNotFound { .. }));
    }

    #[test]
    fn test_trend_is_chronological_and_limited() {
        let hierarchy = hierarchy();
        let mut store = ResultStore::new(vec![
            itinerary("t3", 9),
            itinerary("t1", 1),
            itinerary("t2", 5),
        ]);
        for (id, value) in [("t1", 40.0), ("t2", 55.0), ("t3", 70.0)] {
            store.insert(set(id, vec![result(id, "c1", "Kpando", Some(value))]));
        }
        let comparator = Comparator::new(&store, &hierarchy);

        let all = comparator.trend("lessonPlans", &"c1".into(), 5);
        let values: Vec<Option<f64>> = all.iter().map(|point| point.value).collect();
        assert_eq!(values, vec![Some(40.0), Some(55.0), Some(70.0)]);

        let recent = comparator.trend("lessonPlans", &"c1".into(), 2);
        let labels: Vec<&str> = recent.iter().map(|point| point.label.as_str()).collect();
        assert_eq!(labels, vec!["Term 5", "Term 9"]);
    }

    #[test]
    fn test_trend_skips_itineraries_without_results() {
        let hierarchy = hierarchy();
        let mut store = ResultStore::new(vec![itinerary("t1", 1), itinerary("t2", 5)]);
        store.insert(set("t2", vec![result("t2", "c1", "Kpando", Some(20.0))]));

        let points = Comparator::new(&store, &hierarchy).trend("lessonPlans", &"c1".into(), 5);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].itinerary_id, ItineraryId::from("t2"));
    }
}
