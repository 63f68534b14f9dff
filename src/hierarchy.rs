//! Region → district → circuit → school tree.
//!
//! The tree is held as an arena of nodes with indexed child arrays. It is
//! validated once when built: every non-region entity must name a parent that
//! is present and exactly one level above it, which also rules out cycles.
//! A record that breaks the rule is left out together with everything below
//! it; the rest of the tree stays usable.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Identifier of an entity in the geographic hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Level of an entity. Ordered from the top of the tree down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Region,
    District,
    Circuit,
    School,
}

impl EntityKind {
    /// The level a parent of this kind must have, `None` for regions.
    pub fn parent_kind(self) -> Option<EntityKind> {
        match self {
            EntityKind::Region => None,
            EntityKind::District => Some(EntityKind::Region),
            EntityKind::Circuit => Some(EntityKind::District),
            EntityKind::School => Some(EntityKind::Circuit),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Region => "region",
            EntityKind::District => "district",
            EntityKind::Circuit => "circuit",
            EntityKind::School => "school",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flat entity record as supplied by a hierarchy provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub id: EntityId,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<EntityId>,
}

impl EntityRecord {
    pub fn new(id: &str, kind: EntityKind, name: &str, parent_id: Option<&str>) -> Self {
        Self {
            id: EntityId::from(id),
            kind,
            name: name.to_string(),
            parent_id: parent_id.map(EntityId::from),
        }
    }
}

/// A validated entity inside a [`Hierarchy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub name: String,
    pub parent_id: Option<EntityId>,
    pub child_ids: Vec<EntityId>,
}

/// Index of a node in the hierarchy arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct Node {
    entity: Entity,
    children: Vec<NodeId>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum HierarchyError {
    #[error("entity '{id}' appears more than once")]
    Duplicate { id: EntityId },

    #[error("region '{id}' must not have a parent")]
    RegionWithParent { id: EntityId },

    #[error("{kind} '{id}' has no parent")]
    MissingParent { id: EntityId, kind: EntityKind },

    #[error("entity '{id}' names unknown parent '{parent}'")]
    UnknownParent { id: EntityId, parent: EntityId },

    #[error("{kind} '{id}' cannot sit under {parent_kind} '{parent}'")]
    LevelMismatch {
        id: EntityId,
        kind: EntityKind,
        parent: EntityId,
        parent_kind: EntityKind,
    },

    #[error("{kind} '{id}' sits under rejected entity '{parent}'")]
    RejectedParent {
        id: EntityId,
        kind: EntityKind,
        parent: EntityId,
    },
}

/// An entity record left out of the hierarchy, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedEntity {
    pub entity_id: EntityId,
    pub kind: EntityKind,
    pub rejection: HierarchyError,
}

/// Read-only entity tree for one report request.
#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    nodes: Vec<Node>,
    index: HashMap<EntityId, NodeId>,
    rejected: Vec<RejectedEntity>,
}

impl Hierarchy {
    /// Builds and validates the tree from flat records.
    ///
    /// Only a repeated id fails the build. A record with a missing, unknown
    /// or misplaced parent is rejected along with its descendants, so sibling
    /// subtrees still compute. Children are ordered by name then id so
    /// traversal is deterministic regardless of the order the provider
    /// returned them in.
    pub fn build(mut records: Vec<EntityRecord>) -> Result<Self, HierarchyError> {
        let mut kinds = HashMap::with_capacity(records.len());
        for record in &records {
            if kinds.insert(record.id.clone(), record.kind).is_some() {
                return Err(HierarchyError::Duplicate {
                    id: record.id.clone(),
                });
            }
        }

        // Linking top-down sees every parent before its children.
        records.sort_by_key(|record| record.kind);

        let mut nodes: Vec<Node> = Vec::with_capacity(records.len());
        let mut index = HashMap::with_capacity(records.len());
        let mut rejected = Vec::new();

        for record in records {
            match link(&record, &kinds, &index) {
                Ok(parent) => {
                    let node = NodeId(nodes.len());
                    if let Some(parent) = parent {
                        nodes[parent.0].children.push(node);
                    }
                    index.insert(record.id.clone(), node);
                    nodes.push(Node {
                        entity: Entity {
                            id: record.id,
                            kind: record.kind,
                            name: record.name,
                            parent_id: record.parent_id,
                            child_ids: Vec::new(),
                        },
                        children: Vec::new(),
                    });
                }
                Err(rejection) => {
                    warn!(entity = %record.id, kind = %record.kind, %rejection, "Entity rejected");
                    rejected.push(RejectedEntity {
                        entity_id: record.id,
                        kind: record.kind,
                        rejection,
                    });
                }
            }
        }

        for position in 0..nodes.len() {
            let mut children = std::mem::take(&mut nodes[position].children);
            children.sort_by(|a, b| {
                let (a, b) = (&nodes[a.0].entity, &nodes[b.0].entity);
                a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id))
            });
            let child_ids = children
                .iter()
                .map(|child| nodes[child.0].entity.id.clone())
                .collect();
            nodes[position].entity.child_ids = child_ids;
            nodes[position].children = children;
        }

        Ok(Self {
            nodes,
            index,
            rejected,
        })
    }

    /// Records left out of the tree, in level order.
    pub fn rejected(&self) -> &[RejectedEntity] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_id(&self, id: &EntityId) -> Option<NodeId> {
        self.index.get(id).copied()
    }

    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.node_id(id).map(|node| self.entity(node))
    }

    pub fn entity(&self, node: NodeId) -> &Entity {
        &self.nodes[node.0].entity
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.nodes[node.0].children
    }

    /// Nodes of the subtree rooted at `root`, every child before its parent.
    pub fn post_order(&self, root: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![(root, false)];

        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                order.push(node);
                continue;
            }
            stack.push((node, true));
            for child in self.children(node).iter().rev() {
                stack.push((*child, false));
            }
        }

        order
    }
}

/// The accepted parent of `record`, `None` for a region.
fn link(
    record: &EntityRecord,
    kinds: &HashMap<EntityId, EntityKind>,
    index: &HashMap<EntityId, NodeId>,
) -> Result<Option<NodeId>, HierarchyError> {
    let id = record.id.clone();
    match (record.kind.parent_kind(), &record.parent_id) {
        (None, None) => Ok(None),
        (None, Some(_)) => Err(HierarchyError::RegionWithParent { id }),
        (Some(_), None) => Err(HierarchyError::MissingParent {
            id,
            kind: record.kind,
        }),
        (Some(expected), Some(parent)) => {
            let parent_kind = *kinds.get(parent).ok_or_else(|| HierarchyError::UnknownParent {
                id: id.clone(),
                parent: parent.clone(),
            })?;
            if parent_kind != expected {
                return Err(HierarchyError::LevelMismatch {
                    id,
                    kind: record.kind,
                    parent: parent.clone(),
                    parent_kind,
                });
            }
            match index.get(parent) {
                Some(node) => Ok(Some(*node)),
                None => Err(HierarchyError::RejectedParent {
                    id,
                    kind: record.kind,
                    parent: parent.clone(),
                }),
            }
        }
    }
}
