//! BDD scenarios for protection flows.

use rstest_bdd_macros::scenario;

use super::test_helpers::{FlowContext, flow_context};

#[scenario(
    path = "tests/features/protection_flow.feature",
    name = "Protecting a share records its snapshot"
)]
fn scenario_protect_share(flow_context: FlowContext) {
    drop(flow_context);
}

#[scenario(
    path = "tests/features/protection_flow.feature",
    name = "A failing snapshot marks the checkpoint as errored"
)]
fn scenario_snapshot_failure(flow_context: FlowContext) {
    drop(flow_context);
}

#[scenario(
    path = "tests/features/protection_flow.feature",
    name = "Deleting a protected checkpoint removes the snapshot"
)]
fn scenario_delete_checkpoint(flow_context: FlowContext) {
    drop(flow_context);
}

#[scenario(
    path = "tests/features/protection_flow.feature",
    name = "A share the service cannot reach aborts the protect flow"
)]
fn scenario_unreachable_service(flow_context: FlowContext) {
    drop(flow_context);
}
