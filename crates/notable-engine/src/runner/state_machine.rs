//! Note state machine with validated transitions.
//!
//! Enforces the allowed status transitions of the note lifecycle:
//! Pending/Active -> Running -> Completed/Failed, Failed -> Pending (retry).

use notable_core::types::NoteStatus;

use crate::error::RunError;

/// Validate that a status transition is allowed.
///
/// Valid transitions:
/// - Pending -> Running, Active -> Running
/// - Running -> Completed, Running -> Failed
/// - Failed -> Pending (retry)
/// - Completed -> Pending (explicit re-run)
/// - Pending -> Active, Pending -> Bypassed
/// - Pending <-> PendingRefinement
/// - Pending/Active -> Dormant, Dormant -> Pending
pub fn validate_transition(from: NoteStatus, to: NoteStatus) -> Result<(), RunError> {
    use NoteStatus::*;

    let valid = matches!(
        (from, to),
        (Pending, Running)
            | (Active, Running)
            | (Running, Completed)
            | (Running, Failed)
            | (Failed, Pending)
            | (Completed, Pending)
            | (Pending, Active)
            | (Pending, Bypassed)
            | (Pending, PendingRefinement)
            | (PendingRefinement, Pending)
            | (Pending, Dormant)
            | (Active, Dormant)
            | (Dormant, Pending)
    );

    if valid {
        Ok(())
    } else {
        Err(RunError::InvalidTransition(from, to))
    }
}
