//! Traits for the external collaborators the engine reads from.

use anyhow::Result;
use std::collections::HashSet;

use crate::hierarchy::{EntityId, EntityRecord};
use crate::submission::{Category, Itinerary, ItineraryId, Submission};

/// Supplies raw survey submissions and the reporting-cycle catalogue.
#[async_trait::async_trait]
pub trait SubmissionSource: Send + Sync {
    /// Returns every known itinerary, in any order.
    async fn fetch_itineraries(&self) -> Result<Vec<Itinerary>>;

    /// Returns the submissions of one itinerary, optionally narrowed to the
    /// subtree of `scope` and to one survey category.
    async fn fetch_submissions(
        &self,
        itinerary: &ItineraryId,
        scope: Option<&EntityId>,
        category: Option<Category>,
    ) -> Result<Vec<Submission>>;
}

/// Supplies the region → district → circuit → school tree.
#[async_trait::async_trait]
pub trait HierarchyProvider: Send + Sync {
    /// Returns the entities under `scope` together with the chain of
    /// ancestors above it, or the whole tree when `scope` is `None`.
    async fn fetch_hierarchy(&self, scope: Option<&EntityId>) -> Result<Vec<EntityRecord>>;
}

/// Ids of `scope` and every entity below it, from flat records.
///
/// Returns an empty set when `scope` is not among the records.
pub fn subtree_ids(records: &[EntityRecord], scope: &EntityId) -> HashSet<EntityId> {
    let mut ids = HashSet::new();
    if !records.iter().any(|record| &record.id == scope) {
        return ids;
    }
    ids.insert(scope.clone());

    // Records arrive in any order, so repeat until no new child is found.
    loop {
        let before = ids.len();
        for record in records {
            if let Some(parent) = &record.parent_id {
                if ids.contains(parent) && !ids.contains(&record.id) {
                    ids.insert(record.id.clone());
                }
            }
        }
        if ids.len() == before {
            return ids;
        }
    }
}

/// The records a scoped hierarchy fetch returns: the subtree of `scope`
/// plus its ancestors, so the result still validates as a tree.
pub fn scoped_records(records: &[EntityRecord], scope: Option<&EntityId>) -> Vec<EntityRecord> {
    let Some(scope) = scope else {
        return records.to_vec();
    };

    let mut keep = subtree_ids(records, scope);
    let mut cursor = records
        .iter()
        .find(|record| &record.id == scope)
        .and_then(|record| record.parent_id.clone());
    // A parent cycle ends the walk; the hierarchy build rejects it.
    while let Some(parent) = cursor {
        if !keep.insert(parent.clone()) {
            break;
        }
        cursor = records
            .iter()
            .find(|record| record.id == parent)
            .and_then(|record| record.parent_id.clone());
    }

    records
        .iter()
        .filter(|record| keep.contains(&record.id))
        .cloned()
        .collect()
}

/// Keeps submissions inside `scope` and of `category`, when given.
pub fn filter_submissions(
    submissions: Vec<Submission>,
    within: Option<&HashSet<EntityId>>,
    category: Option<Category>,
) -> Vec<Submission> {
    submissions
        .into_iter()
        .filter(|submission| within.is_none_or(|ids| ids.contains(&submission.entity_id)))
        .filter(|submission| category.is_none_or(|category| submission.category == category))
        .collect()
}
