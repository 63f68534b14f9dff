//! Labeled report rows and their JSON output.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;

use crate::hierarchy::{EntityId, EntityKind};
use crate::indicators::aggregate::ResultSet;
use crate::indicators::registry::Registry;
use crate::indicators::types::IndicatorResult;
use crate::indicators::utility::round_to;
use crate::submission::{Category, ItineraryId};

/// One (entity, indicator) line, ready for a table or an export.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub entity_id: EntityId,
    pub entity_name: String,
    pub entity_kind: EntityKind,
    pub indicator_key: String,
    pub indicator_label: String,
    pub category: Category,
    pub numerator: f64,
    pub denominator: f64,
    pub value: Option<f64>,
    pub percentage: Option<f64>,
    pub status: String,
    /// Submissions left out because of bad answers.
    pub excluded: usize,
}

impl ReportRow {
    pub fn from_result(registry: &Registry, result: &IndicatorResult) -> Self {
        let definition = registry.get(&result.indicator_key).ok();
        Self {
            entity_id: result.entity_id.clone(),
            entity_name: result.entity_name.clone(),
            entity_kind: result.entity_kind,
            indicator_key: result.indicator_key.clone(),
            indicator_label: definition
                .map(|definition| definition.label.clone())
                .unwrap_or_else(|| result.indicator_key.clone()),
            category: definition.map_or(Category::SchoolOutput, |definition| definition.category),
            numerator: result.numerator,
            denominator: result.denominator,
            value: result.value.map(|value| round_to(value, 3)),
            percentage: result.percentage.map(|percentage| round_to(percentage, 1)),
            status: result.status.label().to_string(),
            excluded: result.excluded().count(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub itinerary_id: ItineraryId,
    pub scope: EntityId,
    pub generated_at: DateTime<Utc>,
    pub rows: Vec<ReportRow>,
}

impl Report {
    /// Flattens result sets into rows ordered by level, entity name, then
    /// indicator key.
    pub fn build(
        registry: &Registry,
        itinerary_id: ItineraryId,
        scope: EntityId,
        sets: &[ResultSet],
    ) -> Self {
        let mut rows: Vec<ReportRow> = sets
            .iter()
            .flat_map(|set| set.results.values())
            .map(|result| ReportRow::from_result(registry, result))
            .collect();
        rows.sort_by(|a, b| {
            a.entity_kind
                .cmp(&b.entity_kind)
                .then_with(|| a.entity_name.cmp(&b.entity_name))
                .then_with(|| a.entity_id.cmp(&b.entity_id))
                .then_with(|| a.indicator_key.cmp(&b.indicator_key))
        });

        Self {
            itinerary_id,
            scope,
            generated_at: Utc::now(),
            rows,
        }
    }
}

/// Writes a value as pretty-printed JSON followed by a newline.
pub fn write_json(mut writer: impl Write, value: &impl Serialize) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, value)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::registry::FormulaKind;
    use crate::indicators::types::Status;
    use std::collections::BTreeMap;

    fn result(entity: &str, kind: EntityKind, key: &str) -> IndicatorResult {
        IndicatorResult {
            entity_id: entity.into(),
            entity_name: entity.to_uppercase(),
            entity_kind: kind,
            itinerary_id: "t1".into(),
            indicator_key: key.to_string(),
            kind: FormulaKind::Ratio,
            numerator: 1.0,
            denominator: 3.0,
            value: Some(1.0 / 3.0),
            percentage: Some(100.0 / 3.0),
            components: BTreeMap::new(),
            status: Status::Unrated,
            detail: Vec::new(),
        }
    }

    fn set(key: &str) -> ResultSet {
        ResultSet {
            itinerary_id: "t1".into(),
            indicator_key: key.to_string(),
            scope: "c1".into(),
            results: [
                result("s1", EntityKind::School, key),
                result("c1", EntityKind::Circuit, key),
            ]
            .into_iter()
            .map(|result| (result.entity_id.clone(), result))
            .collect(),
        }
    }

    #[test]
    fn test_rows_are_labeled_and_rounded() {
        let registry = Registry::builtin();
        let row = ReportRow::from_result(&registry, &result("s1", EntityKind::School, "lessonPlans"));

        assert_eq!(row.indicator_label, "Lesson plans");
        assert_eq!(row.category, Category::SchoolOutput);
        assert_eq!(row.percentage, Some(33.3));
        assert_eq!(row.value, Some(0.333));
        assert_eq!(row.status, "Unrated");
    }

    #[test]
    fn test_report_orders_top_level_first() {
        let registry = Registry::builtin();
        let report = Report::build(
            &registry,
            "t1".into(),
            "c1".into(),
            &[set("lessonPlans"), set("developmentPlans")],
        );

        let order: Vec<(&str, &str)> = report
            .rows
            .iter()
            .map(|row| (row.entity_id.as_str(), row.indicator_key.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("c1", "developmentPlans"),
                ("c1", "lessonPlans"),
                ("s1", "developmentPlans"),
                ("s1", "lessonPlans"),
            ]
        );
    }

    #[test]
    fn test_write_json_camel_case() {
        let registry = Registry::builtin();
        let report = Report::build(&registry, "t1".into(), "c1".into(), &[set("lessonPlans")]);
        let mut buffer = Vec::new();
        write_json(&mut buffer, &report).unwrap();

        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("\"itineraryId\": \"t1\""));
        assert!(text.contains("\"indicatorLabel\": \"Lesson plans\""));
        assert!(text.ends_with('\n'));
    }
}
