//! BDD scenarios for the lease cycle.

use rstest_bdd_macros::scenario;

use super::test_helpers::{CycleContext, cycle_context};

#[scenario(
    path = "tests/features/keepalive.feature",
    name = "First cycle starts blank and records its image"
)]
fn scenario_first_cycle(cycle_context: CycleContext) {
    let _ = cycle_context;
}

#[scenario(
    path = "tests/features/keepalive.feature",
    name = "Steady state resumes from the recorded image"
)]
fn scenario_steady_state(cycle_context: CycleContext) {
    let _ = cycle_context;
}

#[scenario(
    path = "tests/features/keepalive.feature",
    name = "Failed capture keeps the previous record"
)]
fn scenario_capture_failure(cycle_context: CycleContext) {
    let _ = cycle_context;
}

#[scenario(
    path = "tests/features/keepalive.feature",
    name = "Launch failure destroys the environment and persists nothing"
)]
fn scenario_launch_failure(cycle_context: CycleContext) {
    let _ = cycle_context;
}

#[scenario(
    path = "tests/features/keepalive.feature",
    name = "Deployment records a fresh image"
)]
fn scenario_deploy(cycle_context: CycleContext) {
    let _ = cycle_context;
}
