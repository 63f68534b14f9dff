//! Immutable per-itinerary view of submissions, indexed by hierarchy node.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::hierarchy::{EntityId, EntityKind, Hierarchy, NodeId};
use crate::submission::{Category, ItineraryId, Submission};

/// Why a fetched submission was left out of the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum Rejection {
    UnknownEntity,
    WrongLevel {
        expected: EntityKind,
        actual: EntityKind,
    },
    OtherItinerary {
        found: ItineraryId,
    },
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedSubmission {
    pub submission_id: String,
    pub entity_id: EntityId,
    pub rejection: Rejection,
}

/// Submissions for one itinerary, checked against the hierarchy once.
#[derive(Debug, Clone)]
pub struct Snapshot {
    itinerary_id: ItineraryId,
    hierarchy: Arc<Hierarchy>,
    by_node: HashMap<NodeId, Vec<Submission>>,
    accepted: usize,
    rejected: Vec<RejectedSubmission>,
}

impl Snapshot {
    /// Indexes submissions by entity.
    ///
    /// A submission must belong to `itinerary_id`, name an entity in the
    /// hierarchy at the level its category expects, and carry an id not seen
    /// before. Anything else is rejected and reported, not counted.
    pub fn new(
        itinerary_id: ItineraryId,
        hierarchy: Arc<Hierarchy>,
        submissions: Vec<Submission>,
    ) -> Self {
        let mut by_node: HashMap<NodeId, Vec<Submission>> = HashMap::new();
        let mut rejected = Vec::new();
        let mut seen = HashSet::new();
        let mut accepted = 0;

        for submission in submissions {
            let placement = if submission.itinerary_id != itinerary_id {
                Err(Rejection::OtherItinerary {
                    found: submission.itinerary_id.clone(),
                })
            } else if seen.contains(&submission.id) {
                Err(Rejection::Duplicate)
            } else {
                match hierarchy.node_id(&submission.entity_id) {
                    None => Err(Rejection::UnknownEntity),
                    Some(node) => {
                        let expected = submission.category.level();
                        let actual = hierarchy.entity(node).kind;
                        if expected == actual {
                            Ok(node)
                        } else {
                            Err(Rejection::WrongLevel { expected, actual })
                        }
                    }
                }
            };

            match placement {
                Ok(node) => {
                    seen.insert(submission.id.clone());
                    by_node.entry(node).or_default().push(submission);
                    accepted += 1;
                }
                Err(rejection) => {
                    warn!(
                        submission = %submission.id,
                        entity = %submission.entity_id,
                        ?rejection,
                        "Submission rejected"
                    );
                    rejected.push(RejectedSubmission {
                        submission_id: submission.id,
                        entity_id: submission.entity_id,
                        rejection,
                    });
                }
            }
        }

        for submissions in by_node.values_mut() {
            submissions.sort_by(|a, b| {
                a.submitted_at
                    .cmp(&b.submitted_at)
                    .then_with(|| a.id.cmp(&b.id))
            });
        }

        debug!(
            itinerary = %itinerary_id,
            accepted,
            rejected = rejected.len(),
            "Snapshot built"
        );

        Self {
            itinerary_id,
            hierarchy,
            by_node,
            accepted,
            rejected,
        }
    }

    pub fn itinerary_id(&self) -> &ItineraryId {
        &self.itinerary_id
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    /// Submissions attributed directly to `node` for one survey.
    pub fn submissions_for(
        &self,
        node: NodeId,
        category: Category,
    ) -> impl Iterator<Item = &Submission> {
        self.by_node
            .get(&node)
            .into_iter()
            .flatten()
            .filter(move |submission| submission.category == category)
    }

    /// Number of accepted submissions.
    pub fn len(&self) -> usize {
        self.accepted
    }

    pub fn is_empty(&self) -> bool {
        self.accepted == 0
    }

    pub fn rejected(&self) -> &[RejectedSubmission] {
        &self.rejected
    }
}
