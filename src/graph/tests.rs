//! Unit tests for dependency graph construction.

use std::collections::HashMap;
use std::sync::Arc;

use rstest::rstest;

use super::*;
use crate::resource::{SERVER_RESOURCE_TYPE, SHARE_RESOURCE_TYPE, VOLUME_RESOURCE_TYPE};

fn res(id: &str) -> Resource {
    Resource::new(VOLUME_RESOURCE_TYPE, id, id)
}

/// Dependency function backed by an adjacency table keyed by id.
fn deps(edges: &[(&str, &[&str])]) -> impl FnMut(&Resource) -> Vec<Resource> {
    let table: HashMap<String, Vec<Resource>> = edges
        .iter()
        .map(|(from, to)| ((*from).to_owned(), to.iter().map(|id| res(id)).collect()))
        .collect();
    move |resource| table.get(&resource.id).cloned().unwrap_or_default()
}

fn root_ids(forest: &[Arc<GraphNode>]) -> Vec<String> {
    forest.iter().map(|node| node.value.id.clone()).collect()
}

fn child<'a>(node: &'a GraphNode, position: usize) -> &'a Arc<GraphNode> {
    node.children
        .get(position)
        .unwrap_or_else(|| panic!("{} has no child at {position}", node.value.id))
}

#[rstest]
fn empty_start_set_builds_empty_forest() {
    let forest = build_graph(&[], deps(&[])).expect("empty build");
    assert!(forest.is_empty());
}

#[rstest]
fn isolated_resource_is_root_and_leaf() {
    let forest = build_graph(&[res("a")], deps(&[])).expect("build");
    assert_eq!(root_ids(&forest), vec!["a"]);
    assert!(forest.iter().all(|node| node.is_leaf()));
}

#[rstest]
fn shared_child_is_excluded_from_roots() {
    let forest = build_graph(&[res("a"), res("b")], deps(&[("a", &["c"]), ("b", &["c"])]))
        .expect("build");
    assert_eq!(root_ids(&forest), vec!["a", "b"]);
}

#[rstest]
fn shared_child_is_a_single_instance() {
    let forest = build_graph(&[res("a"), res("b")], deps(&[("a", &["c"]), ("b", &["c"])]))
        .expect("build");
    let [a, b] = forest.as_slice() else {
        panic!("expected two roots, got {}", forest.len());
    };
    assert!(Arc::ptr_eq(child(a, 0), child(b, 0)));
}

#[rstest]
fn diamond_below_single_root_is_deduplicated() {
    let forest = build_graph(
        &[res("top")],
        deps(&[
            ("top", &["left", "right"]),
            ("left", &["base"]),
            ("right", &["base"]),
        ]),
    )
    .expect("build");
    let [top] = forest.as_slice() else {
        panic!("expected one root");
    };
    let left = child(top, 0);
    let right = child(top, 1);
    assert!(Arc::ptr_eq(child(left, 0), child(right, 0)));
    assert_eq!(walk_unique(&forest).len(), 4);
}

#[rstest]
fn start_resource_reachable_from_another_is_dropped() {
    let forest = build_graph(
        &[res("c"), res("a")],
        deps(&[("a", &["b"]), ("b", &["c"])]),
    )
    .expect("build");
    assert_eq!(root_ids(&forest), vec!["a"]);
    let b = child(&forest[0], 0);
    assert_eq!(child(b, 0).value.id, "c");
}

#[rstest]
fn children_keep_dependency_function_order() {
    let forest = build_graph(&[res("a")], deps(&[("a", &["z", "m", "b"])])).expect("build");
    let ids: Vec<_> = forest[0]
        .children
        .iter()
        .map(|node| node.value.id.as_str())
        .collect();
    assert_eq!(ids, vec!["z", "m", "b"]);
}

#[rstest]
fn self_loop_is_detected() {
    let err = build_graph(&[res("a")], deps(&[("a", &["a"])])).expect_err("loop");
    assert_eq!(
        err,
        GraphError::LoopDetected {
            resource: res("a").key()
        }
    );
}

#[rstest]
#[case(&[("a", &["b"][..]), ("b", &["a"][..])])]
#[case(&[("a", &["b"][..]), ("b", &["c"][..]), ("c", &["a"][..])])]
#[case(&[("a", &["b", "c"][..]), ("c", &["d"][..]), ("d", &["c"][..])])]
fn reachable_cycles_are_detected(#[case] edges: &[(&str, &[&str])]) {
    let result = build_graph(&[res("a")], deps(edges));
    assert!(
        matches!(result, Err(GraphError::LoopDetected { .. })),
        "unexpected build outcome: {result:?}"
    );
}

#[rstest]
fn unreachable_cycle_is_ignored() {
    let forest = build_graph(&[res("a")], deps(&[("x", &["y"]), ("y", &["x"])])).expect("build");
    assert_eq!(root_ids(&forest), vec!["a"]);
}

#[rstest]
fn duplicate_start_entries_yield_one_root() {
    let forest = build_graph(&[res("a"), res("a")], deps(&[])).expect("build");
    assert_eq!(root_ids(&forest), vec!["a"]);
}

#[rstest]
fn identity_includes_resource_type() {
    let server = Resource::new(SERVER_RESOURCE_TYPE, "1", "vm");
    let share = Resource::new(SHARE_RESOURCE_TYPE, "1", "data");
    let share_for_server = share.clone();
    let forest = build_graph(&[server.clone()], move |resource: &Resource| {
        if resource.kind == SERVER_RESOURCE_TYPE {
            vec![share_for_server.clone()]
        } else {
            Vec::new()
        }
    })
    .expect("same id with different type is not a loop");
    assert_eq!(forest[0].value, server);
    assert_eq!(forest[0].children[0].value, share);
}

#[rstest]
fn discovery_failure_aborts_build() {
    let result = try_build_graph(&[res("a")], |resource: &Resource| {
        if resource.id == "a" {
            Ok(vec![res("b")])
        } else {
            Err("service unavailable")
        }
    });
    assert_eq!(
        result,
        Err(GraphError::Discovery {
            resource: res("b").key(),
            message: String::from("service unavailable"),
        })
    );
}

#[rstest]
fn deep_chain_does_not_overflow() {
    let depth = 50_000_usize;
    let forest = build_graph(&[res("0")], move |resource: &Resource| {
        let position: usize = resource.id.parse().unwrap_or(depth);
        if position + 1 < depth {
            vec![res(&(position + 1).to_string())]
        } else {
            Vec::new()
        }
    })
    .expect("deep build");
    assert_eq!(walk_unique(&forest).len(), depth);
}

#[rstest]
fn walk_unique_emits_dependencies_first() {
    let forest = build_graph(
        &[res("a"), res("b")],
        deps(&[("a", &["c", "d"]), ("b", &["d", "e"]), ("d", &["f"])]),
    )
    .expect("build");
    let order: Vec<_> = walk_unique(&forest)
        .iter()
        .map(|node| node.value.id.clone())
        .collect();
    assert_eq!(order, vec!["c", "f", "d", "a", "e", "b"]);
}
