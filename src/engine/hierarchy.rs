use std::collections::{BTreeMap, BTreeSet};

use crate::limits::MAX_HIERARCHY_DEPTH;
use crate::model::LocationConfig;

use super::EngineError;

/// Precomputed parent/child adjacency for a validated location forest.
///
/// Parent links are plain ids, never owning references, so traversal is
/// index lookup and acyclicity is established once at build time.
pub struct HierarchyIndex {
    parents: BTreeMap<String, String>,
    children: BTreeMap<String, Vec<String>>,
}

impl HierarchyIndex {
    /// Validate the forest and build the adjacency index.
    ///
    /// Rejects self-parents, dangling parents, cycles, and chains deeper
    /// than [`MAX_HIERARCHY_DEPTH`]. Duplicate ids are caught before the
    /// config map is built, so they cannot reach this point.
    pub(crate) fn build(configs: &BTreeMap<String, LocationConfig>) -> Result<Self, EngineError> {
        let mut parents = BTreeMap::new();
        let mut children: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for (id, config) in configs {
            let Some(parent_id) = &config.parent_id else {
                continue;
            };
            if parent_id == id {
                return Err(EngineError::HierarchyCycle(id.clone()));
            }
            if !configs.contains_key(parent_id) {
                return Err(EngineError::UnknownParent {
                    id: id.clone(),
                    parent_id: parent_id.clone(),
                });
            }
            parents.insert(id.clone(), parent_id.clone());
            children.entry(parent_id.clone()).or_default().push(id.clone());
        }

        // Walk every ancestor chain once to reject cycles and over-deep trees.
        for id in configs.keys() {
            let mut visited = BTreeSet::new();
            visited.insert(id.as_str());
            let mut current = parents.get(id);
            let mut depth = 0usize;
            while let Some(ancestor) = current {
                depth += 1;
                if depth > MAX_HIERARCHY_DEPTH {
                    return Err(EngineError::LimitExceeded("hierarchy too deep"));
                }
                if !visited.insert(ancestor.as_str()) {
                    return Err(EngineError::HierarchyCycle(ancestor.clone()));
                }
                current = parents.get(ancestor);
            }
        }

        Ok(Self { parents, children })
    }

    pub fn parent(&self, id: &str) -> Option<&str> {
        self.parents.get(id).map(String::as_str)
    }

    pub fn children(&self, id: &str) -> &[String] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every ancestor of `id`, nearest first.
    pub fn ancestors<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a str> {
        std::iter::successors(self.parent(id), |current| self.parent(current))
    }
}
