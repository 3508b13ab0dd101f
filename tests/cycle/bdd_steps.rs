//! BDD step definitions for lease cycles and deployment.

use baton::handoff::{AgentIdentity, HandoffRecord, HandoffStore};
use baton::test_support::CommandReaction;
use baton::{CycleStatus, DeployOrchestrator, EnvironmentSource, LeaseCycle};
use chrono::Utc;
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use super::test_helpers::{CAPTURE_ATTEMPTS, CycleContext, CycleResult};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("an empty handoff store")]
fn empty_store(cycle_context: CycleContext) -> CycleContext {
    cycle_context
}

#[given("a handoff record naming \"{image}\"")]
fn record_naming(cycle_context: CycleContext, image: String) -> Result<CycleContext, StepError> {
    let agent = AgentIdentity {
        name: String::from("default"),
        display_name: String::from("Proactive Engineer"),
    };
    cycle_context
        .store
        .write(&HandoffRecord::deployed(image, "sbx-0", &agent, Utc::now()))
        .map_err(|err| StepError::Assertion(err.to_string()))?;
    Ok(cycle_context)
}

#[given("the gateway reports ready")]
fn gateway_ready(cycle_context: CycleContext) -> CycleContext {
    cycle_context.backend.push_probe_output("1\n");
    cycle_context
}

#[given("every capture attempt fails")]
fn capture_fails(cycle_context: CycleContext) -> CycleContext {
    cycle_context.backend.fail_snapshots(CAPTURE_ATTEMPTS);
    cycle_context
}

#[given("the payload launch cannot be issued")]
fn launch_unreachable(cycle_context: CycleContext) -> CycleContext {
    cycle_context
        .backend
        .react_to("nohup", CommandReaction::Error);
    cycle_context
}

#[when("a lease cycle runs")]
fn run_cycle(cycle_context: CycleContext) -> Result<CycleContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let cycle = LeaseCycle::new(cycle_context.backend.clone(), cycle_context.store.clone());
    let result = runtime.block_on(cycle.run(&cycle_context.config, &CancellationToken::new()));

    cycle_context.record_outcome(match result {
        Ok(outcome) => match outcome.status {
            CycleStatus::Completed => CycleResult::Completed,
            CycleStatus::Degraded(_) => CycleResult::Degraded,
        },
        Err(err) => CycleResult::Failed(err.to_string()),
    });
    Ok(cycle_context)
}

#[when("the agent is deployed")]
fn deploy_agent(cycle_context: CycleContext) -> Result<CycleContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let plan = cycle_context
        .deploy_config
        .plan(cycle_context.config.clone(), |name| {
            (name == "BOT_TOKEN").then(|| String::from("xoxb"))
        })
        .map_err(|err| StepError::Assertion(err.to_string()))?;
    let orchestrator =
        DeployOrchestrator::new(cycle_context.backend.clone(), cycle_context.store.clone());
    let result = runtime.block_on(orchestrator.deploy(&plan, &CancellationToken::new()));

    cycle_context.record_outcome(match result {
        Ok(_) => CycleResult::Deployed,
        Err(err) => CycleResult::Failed(err.to_string()),
    });
    Ok(cycle_context)
}

#[then("the environment started from \"{source}\"")]
fn started_from(cycle_context: &CycleContext, source: String) -> Result<(), StepError> {
    let expected = if source == "blank" {
        EnvironmentSource::Blank
    } else {
        EnvironmentSource::Image(source)
    };
    let created = cycle_context.backend.created_from();
    if created == vec![expected.clone()] {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected one environment from {expected}, got {created:?}"
        )))
    }
}

#[then("the cycle completes")]
fn cycle_completes(cycle_context: &CycleContext) -> Result<(), StepError> {
    expect_outcome(cycle_context, &CycleResult::Completed)
}

#[then("the cycle is degraded")]
fn cycle_degraded(cycle_context: &CycleContext) -> Result<(), StepError> {
    expect_outcome(cycle_context, &CycleResult::Degraded)
}

#[then("the cycle fails")]
fn cycle_fails(cycle_context: &CycleContext) -> Result<(), StepError> {
    match cycle_context.outcome() {
        Some(CycleResult::Failed(_)) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a failed cycle, got {other:?}"
        ))),
    }
}

#[then("the handoff record names \"{image}\"")]
fn record_names(cycle_context: &CycleContext, image: String) -> Result<(), StepError> {
    let record = current_record(cycle_context)?;
    if record.snapshot_id == image {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected record to name {image}, got {}",
            record.snapshot_id
        )))
    }
}

#[then("the previous image is \"{image}\"")]
fn previous_image(cycle_context: &CycleContext, image: String) -> Result<(), StepError> {
    let record = current_record(cycle_context)?;
    if record.previous() == Some(image.as_str()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected previous image {image}, got {:?}",
            record.previous()
        )))
    }
}

#[then("the handoff record has no previous image")]
fn no_previous_image(cycle_context: &CycleContext) -> Result<(), StepError> {
    let record = current_record(cycle_context)?;
    match record.previous() {
        None => Ok(()),
        Some(previous) => Err(StepError::Assertion(format!(
            "expected a fresh record, found previous image {previous}"
        ))),
    }
}

#[then("the environment is destroyed")]
fn environment_destroyed(cycle_context: &CycleContext) -> Result<(), StepError> {
    if cycle_context.backend.destroy_calls() == 1 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected one destroy call, got {}",
            cycle_context.backend.destroy_calls()
        )))
    }
}

#[then("the environment is kept")]
fn environment_kept(cycle_context: &CycleContext) -> Result<(), StepError> {
    if cycle_context.backend.destroy_calls() == 0 {
        Ok(())
    } else {
        Err(StepError::Assertion(String::from(
            "environment should be left running for the next cycle",
        )))
    }
}

fn expect_outcome(cycle_context: &CycleContext, expected: &CycleResult) -> Result<(), StepError> {
    match cycle_context.outcome() {
        Some(ref actual) if actual == expected => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected {expected:?}, got {other:?}"
        ))),
    }
}

fn current_record(cycle_context: &CycleContext) -> Result<HandoffRecord, StepError> {
    cycle_context
        .store
        .record()
        .ok_or_else(|| StepError::Assertion(String::from("no handoff record written")))
}
