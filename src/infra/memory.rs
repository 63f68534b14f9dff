//! In-memory source, for embedding the engine and for tests.

use anyhow::Result;
use async_trait::async_trait;

use crate::hierarchy::{EntityId, EntityRecord};
use crate::services::source::{
    HierarchyProvider, SubmissionSource, filter_submissions, scoped_records, subtree_ids,
};
use crate::submission::{Category, Itinerary, ItineraryId, Submission};

#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    entities: Vec<EntityRecord>,
    itineraries: Vec<Itinerary>,
    submissions: Vec<Submission>,
}

impl MemorySource {
    pub fn new(
        entities: Vec<EntityRecord>,
        itineraries: Vec<Itinerary>,
        submissions: Vec<Submission>,
    ) -> Self {
        Self {
            entities,
            itineraries,
            submissions,
        }
    }
}

#[async_trait]
impl SubmissionSource for MemorySource {
    async fn fetch_itineraries(&self) -> Result<Vec<Itinerary>> {
        Ok(self.itineraries.clone())
    }

    async fn fetch_submissions(
        &self,
        itinerary: &ItineraryId,
        scope: Option<&EntityId>,
        category: Option<Category>,
    ) -> Result<Vec<Submission>> {
        let within = scope.map(|scope| subtree_ids(&self.entities, scope));
        let submissions = self
            .submissions
            .iter()
            .filter(|submission| &submission.itinerary_id == itinerary)
            .cloned()
            .collect();
        Ok(filter_submissions(submissions, within.as_ref(), category))
    }
}

#[async_trait]
impl HierarchyProvider for MemorySource {
    async fn fetch_hierarchy(&self, scope: Option<&EntityId>) -> Result<Vec<EntityRecord>> {
        Ok(scoped_records(&self.entities, scope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::EntityKind;
    use chrono::{TimeZone, Utc};

    fn submission(id: &str, entity: &str, itinerary: &str, category: Category) -> Submission {
        Submission {
            id: id.to_string(),
            entity_id: entity.into(),
            itinerary_id: itinerary.into(),
            category,
            answers: Default::default(),
            submitted_at: Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_fetch_filters_by_itinerary_scope_and_category() {
        let source = MemorySource::new(
            vec![
                EntityRecord::new("r1", EntityKind::Region, "Volta", None),
                EntityRecord::new("d1", EntityKind::District, "Ho", Some("r1")),
                EntityRecord::new("d2", EntityKind::District, "Keta", Some("r1")),
                EntityRecord::new("c1", EntityKind::Circuit, "North", Some("d1")),
                EntityRecord::new("c2", EntityKind::Circuit, "South", Some("d2")),
                EntityRecord::new("s1", EntityKind::School, "Adaklu", Some("c1")),
                EntityRecord::new("s2", EntityKind::School, "Anloga", Some("c2")),
            ],
            Vec::new(),
            vec![
                submission("a", "s1", "t1", Category::SchoolOutput),
                submission("b", "s2", "t1", Category::SchoolOutput),
                submission("c", "s1", "t2", Category::SchoolOutput),
                submission("d", "s1", "t1", Category::ConsolidatedChecklist),
            ],
        );

        let scoped = source
            .fetch_submissions(&"t1".into(), Some(&"d1".into()), Some(Category::SchoolOutput))
            .await
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].id, "a");

        let all = source.fetch_submissions(&"t1".into(), None, None).await.unwrap();
        assert_eq!(all.len(), 3);

        let tree = source.fetch_hierarchy(Some(&"c1".into())).await.unwrap();
        assert_eq!(tree.len(), 4);
    }
}
