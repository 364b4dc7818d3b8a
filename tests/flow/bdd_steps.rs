//! BDD step definitions for protection flows.

use std::convert::Infallible;

use bulwark::plugin::share::SNAPSHOT_ID_KEY;
use bulwark::{
    CheckpointStatus, FlowReport, OperationKind, Parameters, RequestContext, Resource,
};
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{FlowContext, share};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
    #[error(transparent)]
    Bank(#[from] bulwark::BankError),
}

fn no_dependencies(_: &Resource) -> Result<Vec<Resource>, Infallible> {
    Ok(Vec::new())
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new()
        .unwrap_or_else(|err| panic!("tokio runtime should start: {err}"))
}

fn report(flow_context: &FlowContext) -> Result<&FlowReport, StepError> {
    flow_context
        .report
        .as_ref()
        .ok_or_else(|| StepError::Assertion(String::from("no flow has run")))
}

#[given("a share \"{id}\" that becomes available")]
fn available_share(mut flow_context: FlowContext, id: String) -> FlowContext {
    flow_context.service = flow_context
        .service
        .with_share(&id, ["creating", "available"]);
    flow_context.shares.push(share(&id));
    flow_context
}

#[given("the next snapshot is named \"{id}\"")]
fn next_snapshot(mut flow_context: FlowContext, id: String) -> FlowContext {
    flow_context.service = flow_context.service.next_snapshot_id(&id);
    flow_context
}

#[given("new snapshots end in error")]
fn failing_snapshots(mut flow_context: FlowContext) -> FlowContext {
    flow_context.service = flow_context
        .service
        .created_snapshot_statuses(["creating", "error"]);
    flow_context
}

#[given("the share service refuses connections")]
fn refusing_service(mut flow_context: FlowContext) -> FlowContext {
    flow_context.service = flow_context.service.refusing_connections();
    flow_context
}

#[when("the shares are protected")]
fn protect(mut flow_context: FlowContext) -> FlowContext {
    let flow = flow_context.flow();
    let outcome = runtime().block_on(flow.protect(
        flow_context.bank(),
        &flow_context.shares,
        no_dependencies,
        &RequestContext::new("user", "project"),
        &Parameters::new(),
    ));
    let (checkpoint, report) =
        outcome.unwrap_or_else(|err| panic!("protect flow should run: {err}"));
    flow_context.checkpoint_id = Some(checkpoint.id().to_owned());
    flow_context.report = Some(report);
    flow_context
}

#[when("the checkpoint is deleted")]
fn delete(mut flow_context: FlowContext) -> FlowContext {
    let flow = flow_context.flow();
    let checkpoint = flow_context
        .checkpoint()
        .unwrap_or_else(|| panic!("a checkpoint should exist before deleting"));
    let outcome = runtime().block_on(flow.run(
        OperationKind::Delete,
        &checkpoint,
        &flow_context.shares,
        no_dependencies,
        &RequestContext::new("user", "project"),
        &Parameters::new(),
    ));
    flow_context.report =
        Some(outcome.unwrap_or_else(|err| panic!("delete flow should run: {err}")));
    flow_context
}

#[then("the flow succeeds")]
fn flow_succeeds(flow_context: &FlowContext) -> Result<(), StepError> {
    let report = report(flow_context)?;
    if report.is_success() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected success, got {:?}",
            report.execution
        )))
    }
}

#[then("the flow fails at \"{stage}\" for \"{id}\"")]
fn flow_fails(flow_context: &FlowContext, stage: String, id: String) -> Result<(), StepError> {
    let report = report(flow_context)?;
    let failure = report
        .execution
        .first_failure()
        .ok_or_else(|| StepError::Assertion(String::from("expected a failed node")))?;
    let failed_stage = failure.stage.map(|value| value.as_str());
    if failure.resource.id == id && failed_stage == Some(stage.as_str()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {id} to fail at {stage}, got {failure}"
        )))
    }
}

#[then("the checkpoint status is \"{status}\"")]
fn checkpoint_status(flow_context: &FlowContext, status: String) -> Result<(), StepError> {
    let checkpoint = flow_context
        .checkpoint()
        .ok_or_else(|| StepError::Assertion(String::from("no checkpoint was created")))?;
    let stored: CheckpointStatus = runtime().block_on(checkpoint.status())?;
    if stored.to_string() == status {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected checkpoint status {status}, got {stored}"
        )))
    }
}

#[then("share \"{id}\" records snapshot \"{snapshot}\"")]
fn records_snapshot(
    flow_context: &FlowContext,
    id: String,
    snapshot: String,
) -> Result<(), StepError> {
    let checkpoint = flow_context
        .checkpoint()
        .ok_or_else(|| StepError::Assertion(String::from("no checkpoint was created")))?;
    let section = checkpoint.resource_section(&share(&id))?;
    let stored = runtime().block_on(section.get(SNAPSHOT_ID_KEY))?;
    if stored == snapshot.as_bytes() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected snapshot {snapshot}, found {}",
            String::from_utf8_lossy(&stored)
        )))
    }
}

#[then("snapshot \"{id}\" no longer exists")]
fn snapshot_gone(flow_context: &FlowContext, id: String) -> Result<(), StepError> {
    if flow_context.service.has_snapshot(&id) {
        Err(StepError::Assertion(format!("snapshot {id} still exists")))
    } else {
        Ok(())
    }
}
