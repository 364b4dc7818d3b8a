//! Shared fixtures for graph BDD scenarios.

use std::collections::HashMap;
use std::sync::Arc;

use bulwark::resource::VOLUME_RESOURCE_TYPE;
use bulwark::{GraphError, GraphNode, Resource};
use rstest::fixture;

#[derive(Clone, Debug, Default)]
pub struct GraphContext {
    pub edges: HashMap<String, Vec<String>>,
    pub start: Vec<String>,
    pub outcome: Option<Result<Vec<Arc<GraphNode>>, GraphError>>,
}

impl GraphContext {
    pub fn dependencies_of(&self, resource: &Resource) -> Vec<Resource> {
        self.edges
            .get(&resource.id)
            .map(|children| children.iter().map(|id| volume(id)).collect())
            .unwrap_or_default()
    }
}

#[fixture]
pub fn graph_context() -> GraphContext {
    GraphContext::default()
}

pub fn volume(id: &str) -> Resource {
    Resource::new(VOLUME_RESOURCE_TYPE, id, id)
}

/// Splits `"a, b"` into ids, treating an empty string as no ids.
pub fn parse_ids(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Parses `"a->b, a->c"` into an adjacency table preserving edge order.
pub fn parse_edges(list: &str) -> HashMap<String, Vec<String>> {
    let mut edges: HashMap<String, Vec<String>> = HashMap::new();
    for edge in parse_ids(list) {
        if let Some((from, to)) = edge.split_once("->") {
            edges
                .entry(from.trim().to_owned())
                .or_default()
                .push(to.trim().to_owned());
        }
    }
    edges
}

pub fn ids(nodes: &[Arc<GraphNode>]) -> Vec<String> {
    nodes.iter().map(|node| node.value.id.clone()).collect()
}
