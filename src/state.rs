//! The phase-transition guard table. `advance` is the only place allowed to
//! change `PipelineState.phase`; callers persist the state in the same
//! function that calls `advance` so a crash never leaves a trigger fired
//! without its resulting phase durable on disk.

use crate::error::PipelineError;
use crate::models::{Phase, PipelineState, Trigger};

/// Apply `trigger` to `state.phase`, mutating it in place if the transition
/// is legal. Returns an error naming the offending (trigger, phase) pair
/// otherwise — the driver treats this as an invariant violation, not a
/// recoverable condition.
pub fn advance(state: &mut PipelineState, trigger: Trigger) -> Result<(), PipelineError> {
    use Phase::*;
    use Trigger::*;

    let next = match (&state.phase, &trigger) {
        (Init, ArchitectStarted) => ArchitectRunning,
        (ArchitectRunning, ArchitectDone) => ArchitectReview,
        (ArchitectRunning, RetryArchitect) => ArchitectRunning,
        (ArchitectReview, ApproveArchitect) => ContractsRegistering,
        (ContractsRegistering, ContractsRegistered) => BuildersRunning,
        (BuildersRunning, BuildersFinished) => BuildersComplete,
        (BuildersComplete, StartIntegration) => Integrating,
        (Integrating, IntegrationDone) => QualityGate,
        (QualityGate, GatePassed) => Complete,
        (QualityGate, GateFailed) => FixPass,
        (QualityGate, SkipToComplete) => Complete,
        (FixPass, FixDone) => BuildersRunning,
        (_, Abort) => Failed,
        (current, trig) => {
            return Err(PipelineError::Invariant(format!(
                "illegal transition: trigger {:?} is not valid from phase {}",
                trig, current
            )));
        }
    };

    state.previous_phase = Some(state.phase);
    if !state.completed_phases.contains(&state.phase) {
        state.completed_phases.push(state.phase);
    }
    state.phase = next;
    state.updated_at = chrono::Utc::now();
    Ok(())
}

</content>
