//! Run status shared between the controller and the driver loop.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Lifecycle state of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Stopped or never started
    None,
    /// Monitoring spreads
    Processing,
    /// Legs of a hedge are in flight
    Ordering,
    /// Unrecoverable inconsistency; the driver stops
    Error,
}

impl Status {
    fn as_u8(self) -> u8 {
        match self {
            Status::None => 0,
            Status::Processing => 1,
            Status::Ordering => 2,
            Status::Error => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Status::Processing,
            2 => Status::Ordering,
            3 => Status::Error,
            _ => Status::None,
        }
    }

    /// Whether the driver should keep running cycles.
    pub fn is_running(self) -> bool {
        matches!(self, Status::Processing | Status::Ordering)
    }

    /// Whether `self -> to` is a legal move.
    pub fn can_transition(self, to: Status) -> bool {
        matches!(
            (self, to),
            (Status::None, Status::Processing)
                | (Status::Processing, Status::Ordering)
                | (Status::Ordering, Status::Processing)
                | (Status::Processing, Status::Error)
                | (Status::Ordering, Status::Error)
                | (_, Status::None)
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::None => "none",
            Status::Processing => "processing",
            Status::Ordering => "ordering",
            Status::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TransitionError {
    /// The move is not part of the state machine.
    #[error("Illegal status transition: {from} -> {to}")]
    Illegal { from: Status, to: Status },

    /// Another task changed the status first.
    #[error("Status changed concurrently: expected {expected}, found {actual}")]
    Conflict { expected: Status, actual: Status },
}

/// Cloneable atomic handle on the run status.
#[derive(Debug, Clone, Default)]
pub struct StatusHandle {
    inner: Arc<AtomicU8>,
}

impl StatusHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Status {
        Status::from_u8(self.inner.load(Ordering::SeqCst))
    }

    /// Move `from -> to`, failing if the move is illegal or the status is no
    /// longer `from`.
    pub fn transition(&self, from: Status, to: Status) -> Result<(), TransitionError> {
        if !from.can_transition(to) {
            return Err(TransitionError::Illegal { from, to });
        }

        self.inner
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|actual| TransitionError::Conflict {
                expected: from,
                actual: Status::from_u8(actual),
            })
    }

    /// Move the current status to Error.
    pub fn fail(&self) -> Result<(), TransitionError> {
        let current = self.get();
        self.transition(current, Status::Error)
    }

    /// Force None from any state, returning the previous status.
    pub fn reset(&self) -> Status {
        Status::from_u8(self.inner.swap(Status::None.as_u8(), Ordering::SeqCst))
    }
}
