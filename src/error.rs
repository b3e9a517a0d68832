use thiserror::Error;

/// Recoverable error classes that handlers report to users or the moderator.
///
/// None of these are fatal to the process: validation errors are echoed back
/// inline, delivery errors are reported once and never retried, consistency
/// errors abandon the current rotation cycle only.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed user input.
    #[error("{0}")]
    Validation(String),

    /// An outbound notify/announce/edit could not be delivered.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// Stored state disagrees with itself, e.g. a roster name without a
    /// matching participant record.
    #[error("inconsistent state: {0}")]
    Consistency(String),

    /// The service is stopped and participant-facing actions are rejected.
    #[error("the service is currently stopped")]
    Inactive,
}
