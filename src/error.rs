//! Error types surfaced by the regulator.
//!
//! Every terminal state of a regulated call settles the caller's future with exactly one of:
//! the upstream's own response, a [`RegulatorError::QueueFull`] backpressure signal, or the
//! final transport error.

use thiserror::Error;

/// Unified error type returned by [`Regulator::execute`](crate::Regulator::execute).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegulatorError<E> {
    /// The wait queue was at capacity; the request was never attempted.
    #[error("regulator queue full ({queued} queued, max {max})")]
    QueueFull { queued: usize, max: usize },
    /// The transport failed and retries (if any) were exhausted.
    #[error("transport error: {0}")]
    Transport(#[source] E),
}

impl<E> RegulatorError<E> {
    /// Check if this error is a backpressure rejection.
    pub fn is_queue_full(&self) -> bool {
        matches!(self, Self::QueueFull { .. })
    }

    /// Check if this error wraps a transport error.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Extract the transport error, if present.
    pub fn into_transport(self) -> Option<E> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }

    /// Borrow the transport error, if present.
    pub fn as_transport(&self) -> Option<&E> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }

    /// Queue occupancy at rejection time as `(queued, max)`.
    pub fn queue_capacity(&self) -> Option<(usize, usize)> {
        match self {
            Self::QueueFull { queued, max } => Some((*queued, *max)),
            _ => None,
        }
    }
}
