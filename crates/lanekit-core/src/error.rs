//! Error handling for LaneKit
//!
//! Errors raised while talking to feeder controllers. Each crate above
//! this one keeps its own `thiserror` enum and wraps [`HardwareError`]
//! where it needs to.

use thiserror::Error;

/// Hardware error type
///
/// Represents failures of the feeder controller seam: the controller is
/// not attached yet, a command was refused, or a wait expired.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HardwareError {
    /// No controller object has been attached to the hardware service
    #[error("Controller for unit {unit} is not ready")]
    NotReady {
        /// The hardware unit name.
        unit: String,
    },

    /// Controller refused or failed a command
    #[error("Command {command} failed: {reason}")]
    CommandFailed {
        /// The command that was sent.
        command: String,
        /// The reason reported by the controller.
        reason: String,
    },

    /// Controller operation timed out
    #[error("Controller operation timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// Spool bay index outside what the controller reports
    #[error("Spool index {index} is out of range")]
    InvalidSpoolIndex {
        /// The requested bay index.
        index: usize,
    },
}
