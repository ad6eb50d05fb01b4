//! Version inheritance graph and its transitive closure.

use std::collections::{BTreeMap, HashSet};

use crate::errors::traversal_error;
use crate::StrataError;

#[derive(Debug, Clone)]
struct VersionNode {
    id: String,
    parent_id: Option<String>,
    parent: Option<usize>,
}

/// One `(version, ancestor, depth)` fact of the closure; depth 1 is the
/// direct parent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClosureEdge {
    pub version_id: String,
    pub ancestor_version_id: String,
    pub depth: usize,
}

/// Arena of version nodes with index-based parent pointers.
#[derive(Debug, Clone, Default)]
pub struct VersionGraph {
    nodes: Vec<VersionNode>,
    index: BTreeMap<String, usize>,
}

impl VersionGraph {
    /// Builds the graph from `(version_id, inherits_from_version_id)` pairs.
    /// Parents that are not themselves versions are kept as dangling ids.
    pub fn from_descriptors<I>(descriptors: I) -> Self
    where
        I: IntoIterator<Item = (String, Option<String>)>,
    {
        let mut graph = Self::default();
        for (id, parent_id) in descriptors {
            match graph.index.get(&id) {
                Some(existing) => graph.nodes[*existing].parent_id = parent_id,
                None => {
                    graph.index.insert(id.clone(), graph.nodes.len());
                    graph.nodes.push(VersionNode {
                        id,
                        parent_id,
                        parent: None,
                    });
                }
            }
        }
        for position in 0..graph.nodes.len() {
            let parent = graph.nodes[position]
                .parent_id
                .as_ref()
                .and_then(|parent_id| graph.index.get(parent_id))
                .copied();
            graph.nodes[position].parent = parent;
        }
        graph
    }

    pub fn contains(&self, version_id: &str) -> bool {
        self.index.contains_key(version_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|node| node.id.as_str())
    }

    pub fn parent_id(&self, version_id: &str) -> Option<&str> {
        let node = &self.nodes[*self.index.get(version_id)?];
        node.parent_id.as_deref()
    }

    /// Direct children of `version_id`.
    pub fn children(&self, version_id: &str) -> Vec<&str> {
        let Some(target) = self.index.get(version_id).copied() else {
            return Vec::new();
        };
        self.nodes
            .iter()
            .filter(|node| node.parent == Some(target))
            .map(|node| node.id.as_str())
            .collect()
    }

    /// Ancestors of `version_id`, nearest first, with their depth.
    pub fn ancestors(
        &self,
        version_id: &str,
        max_depth: usize,
    ) -> Result<Vec<(String, usize)>, StrataError> {
        let Some(start) = self.index.get(version_id).copied() else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        let mut visited = HashSet::from([start]);
        let mut cursor = self.nodes[start].parent;
        let mut depth = 1;
        while let Some(position) = cursor {
            if !visited.insert(position) {
                return Err(traversal_error(&format!(
                    "version inheritance cycle detected while resolving `{version_id}` at `{}`",
                    self.nodes[position].id
                )));
            }
            if depth > max_depth {
                return Err(traversal_error(&format!(
                    "version `{version_id}` exceeds the maximum inheritance depth of {max_depth}"
                )));
            }
            out.push((self.nodes[position].id.clone(), depth));
            cursor = self.nodes[position].parent;
            depth += 1;
        }
        Ok(out)
    }

    /// The transitive closure over every version, computed once per
    /// resolution pass.
    pub fn closure(&self, max_depth: usize) -> Result<Vec<ClosureEdge>, StrataError> {
        let mut edges = Vec::new();
        for node in &self.nodes {
            for (ancestor_version_id, depth) in self.ancestors(&node.id, max_depth)? {
                edges.push(ClosureEdge {
                    version_id: node.id.clone(),
                    ancestor_version_id,
                    depth,
                });
            }
        }
        Ok(edges)
    }

    /// Whether pointing `version_id` at `new_parent_id` would close a loop.
    pub fn would_create_cycle(&self, version_id: &str, new_parent_id: &str) -> bool {
        if version_id == new_parent_id {
            return true;
        }
        let mut visited = HashSet::new();
        let mut cursor = self.index.get(new_parent_id).copied();
        while let Some(position) = cursor {
            if self.nodes[position].id == version_id || !visited.insert(position) {
                return true;
            }
            cursor = self.nodes[position].parent;
        }
        false
    }
}
