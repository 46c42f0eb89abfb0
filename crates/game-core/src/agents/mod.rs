//! The three parties on the channel: the stateless receiver, the
//! spoof-check analyzer it leans on, and the persistent eavesdropper.
//! The transmitter is the human at the terminal.

use std::{error::Error, fmt};

pub mod eavesdropper;
pub mod receiver;
pub mod spoofcheck;

pub use eavesdropper::{Eavesdropper, TurnEvent};
pub use receiver::{FiringDecision, Receiver};
pub use spoofcheck::SpoofChecker;

/// A required setup step was skipped. Fatal: callers must not treat this as
/// a retryable turn failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreconditionError(pub &'static str);

impl fmt::Display for PreconditionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "precondition violated: {}", self.0)
    }
}

impl Error for PreconditionError {}
