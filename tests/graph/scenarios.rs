//! BDD scenarios for graph construction.

use rstest_bdd_macros::scenario;

use super::test_helpers::{GraphContext, graph_context};

#[scenario(
    path = "tests/features/graph.feature",
    name = "Shared dependencies are built once"
)]
fn scenario_shared_dependencies(graph_context: GraphContext) {
    drop(graph_context);
}

#[scenario(
    path = "tests/features/graph.feature",
    name = "A start resource that another start resource depends on is not a root"
)]
fn scenario_root_filtering(graph_context: GraphContext) {
    drop(graph_context);
}

#[scenario(
    path = "tests/features/graph.feature",
    name = "An empty start set builds an empty forest"
)]
fn scenario_empty_start(graph_context: GraphContext) {
    drop(graph_context);
}

#[scenario(
    path = "tests/features/graph.feature",
    name = "A self dependency is rejected"
)]
fn scenario_self_loop(graph_context: GraphContext) {
    drop(graph_context);
}

#[scenario(
    path = "tests/features/graph.feature",
    name = "A longer cycle is rejected"
)]
fn scenario_cycle(graph_context: GraphContext) {
    drop(graph_context);
}

#[scenario(
    path = "tests/features/graph.feature",
    name = "Nodes are walked dependencies first"
)]
fn scenario_walk_order(graph_context: GraphContext) {
    drop(graph_context);
}
