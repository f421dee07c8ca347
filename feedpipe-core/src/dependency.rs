//! Dependency ordering of feeds.
//!
//! Nodes are every id mentioned in the manifest, as a feed or as a
//! `depends_on` target; a parent that is not itself a feed is still a node.
//! Kahn's algorithm picks ready nodes in first-mention order, so the result
//! is deterministic and unrelated feeds keep their manifest order.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

use thiserror::Error;

use crate::manifest::Feed;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("dependency cycle among feeds: {}", .feeds.join(", "))]
pub struct DependencyCycleError {
    /// Feeds that could not be ordered, in first-mention order.
    pub feeds: Vec<String>,
}

/// `parent -> child` graph over feed ids.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<String>,
    index: HashMap<String, usize>,
    children: Vec<BTreeSet<usize>>,
}

impl DependencyGraph {
    pub fn from_feeds(feeds: &[Feed]) -> Self {
        let mut graph = Self::default();
        for feed in feeds {
            let child = graph.add_node(&feed.id);
            for parent in &feed.depends_on {
                let parent = graph.add_node(parent);
                graph.children[parent].insert(child);
            }
        }
        graph
    }

    fn add_node(&mut self, id: &str) -> usize {
        if let Some(&i) = self.index.get(id) {
            return i;
        }
        let i = self.nodes.len();
        self.nodes.push(id.to_string());
        self.index.insert(id.to_string(), i);
        self.children.push(BTreeSet::new());
        i
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// One topological order of every node.
    pub fn topological_order(&self) -> Result<Vec<&str>, DependencyCycleError> {
        let mut in_degree = vec![0usize; self.nodes.len()];
        for children in &self.children {
            for &c in children {
                in_degree[c] += 1;
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(self.nodes[node].as_str());
            for &child in &self.children[node] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    ready.push(Reverse(child));
                }
            }
        }

        if order.len() != self.nodes.len() {
            let feeds = in_degree
                .iter()
                .enumerate()
                .filter(|(_, &d)| d > 0)
                .map(|(i, _)| self.nodes[i].clone())
                .collect();
            return Err(DependencyCycleError { feeds });
        }

        Ok(order)
    }
}

/// Project `feeds` onto a topological order of their dependency graph.
pub fn resolve_order(feeds: &[Feed]) -> Result<Vec<&Feed>, DependencyCycleError> {
    let graph = DependencyGraph::from_feeds(feeds);
    let position: HashMap<&str, usize> = graph
        .topological_order()?
        .into_iter()
        .enumerate()
        .map(|(i, id)| (id, i))
        .collect();

    let mut ordered: Vec<&Feed> = feeds.iter().collect();
    ordered.sort_by_key(|f| position.get(f.id.as_str()).copied().unwrap_or(usize::MAX));
    Ok(ordered)
}
