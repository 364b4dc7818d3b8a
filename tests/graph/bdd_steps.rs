//! BDD step definitions for graph construction.

use std::sync::Arc;

use bulwark::{GraphError, GraphNode, build_graph, walk_unique};
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{GraphContext, ids, parse_edges, parse_ids, volume};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn built(graph_context: &GraphContext) -> Result<&[Arc<GraphNode>], StepError> {
    match &graph_context.outcome {
        Some(Ok(forest)) => Ok(forest),
        Some(Err(err)) => Err(StepError::Assertion(format!(
            "expected a forest, build failed: {err}"
        ))),
        None => Err(StepError::Assertion(String::from("graph was not built"))),
    }
}

#[given("the dependencies \"{edges}\"")]
fn dependencies(mut graph_context: GraphContext, edges: String) -> GraphContext {
    graph_context.edges = parse_edges(&edges);
    graph_context
}

#[given("the start resources \"{start}\"")]
fn start_resources(mut graph_context: GraphContext, start: String) -> GraphContext {
    graph_context.start = parse_ids(&start);
    graph_context
}

#[when("the graph is built")]
fn build(mut graph_context: GraphContext) -> GraphContext {
    let start: Vec<_> = graph_context.start.iter().map(|id| volume(id)).collect();
    let lookup = graph_context.clone();
    graph_context.outcome = Some(build_graph(&start, |resource| {
        lookup.dependencies_of(resource)
    }));
    graph_context
}

#[then("the roots are \"{roots}\"")]
fn roots_are(graph_context: &GraphContext, roots: String) -> Result<(), StepError> {
    let actual = ids(built(graph_context)?);
    let expected = parse_ids(&roots);
    if actual == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected roots {expected:?}, got {actual:?}"
        )))
    }
}

#[then("\"{child}\" is shared by \"{first}\" and \"{second}\"")]
fn shared_child(
    graph_context: &GraphContext,
    child: String,
    first: String,
    second: String,
) -> Result<(), StepError> {
    let forest = built(graph_context)?;
    let find_child = |parent: &str| {
        forest
            .iter()
            .find(|node| node.value.id == parent)
            .and_then(|node| node.children.iter().find(|dep| dep.value.id == child))
            .cloned()
            .ok_or_else(|| StepError::Assertion(format!("{parent} has no child {child}")))
    };
    let via_first = find_child(&first)?;
    let via_second = find_child(&second)?;
    if Arc::ptr_eq(&via_first, &via_second) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "{child} is duplicated under {first} and {second}"
        )))
    }
}

#[then("building fails with a loop at \"{id}\"")]
fn loop_detected(graph_context: &GraphContext, id: String) -> Result<(), StepError> {
    match &graph_context.outcome {
        Some(Err(GraphError::LoopDetected { resource })) if resource.id == id => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a loop at {id}, got {other:?}"
        ))),
    }
}

#[then("the walk order is \"{order}\"")]
fn walk_order(graph_context: &GraphContext, order: String) -> Result<(), StepError> {
    let actual = ids(&walk_unique(built(graph_context)?));
    let expected = parse_ids(&order);
    if actual == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected walk {expected:?}, got {actual:?}"
        )))
    }
}
