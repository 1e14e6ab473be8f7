//! Cancellation reasons and well-known fault codes.
//!
//! A cancellation request carries an integer error code and an opaque detail
//! blob. The blob is never interpreted by this crate; it travels unchanged
//! from the requester to the operation's profiling status.

use core::fmt;

/// Well-known error codes recorded in operation status.
pub mod faults {
    /// The operation was cancelled through the operation table.
    pub const CANCELLED: i32 = 1;
    /// A precondition event was poisoned before the operation could start.
    pub const POISONED_PRECONDITION: i32 = 2;
    /// The operation was torn down outside of its normal state machine.
    pub const TERMINATED_EARLY: i32 = 3;
    /// An async work item was dropped without reporting completion.
    pub const WORK_ITEM_LEAKED: i32 = 4;
}

/// The reason attached to a cancellation request.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct CancelReason {
    /// Error code recorded in the cancelled operation's status.
    pub error_code: i32,
    /// Opaque reason payload supplied by the requester.
    pub details: Vec<u8>,
}

impl CancelReason {
    /// Creates a reason with the given code and detail bytes.
    #[must_use]
    pub fn new(error_code: i32, details: impl Into<Vec<u8>>) -> Self {
        Self {
            error_code,
            details: details.into(),
        }
    }

    /// Creates a table-issued cancellation carrying the requester's payload.
    #[must_use]
    pub fn cancelled(details: impl Into<Vec<u8>>) -> Self {
        Self::new(faults::CANCELLED, details)
    }

    /// Returns true if this reason came through the table's cancel path.
    #[must_use]
    pub const fn is_table_cancel(&self) -> bool {
        self.error_code == faults::CANCELLED
    }
}

impl fmt::Debug for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelReason")
            .field("error_code", &self.error_code)
            .field("details_len", &self.details.len())
            .finish()
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.error_code {
            faults::CANCELLED => "cancelled",
            faults::POISONED_PRECONDITION => "poisoned precondition",
            faults::TERMINATED_EARLY => "terminated early",
            faults::WORK_ITEM_LEAKED => "work item leaked",
            _ => "error",
        };
        write!(f, "{label} (code {})", self.error_code)?;
        if !self.details.is_empty() {
            write!(f, ", {} detail bytes", self.details.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_uses_table_code() {
        let reason = CancelReason::cancelled(b"user abort".to_vec());
        assert!(reason.is_table_cancel());
        assert_eq!(reason.details, b"user abort");
    }

    #[test]
    fn display_names_known_codes() {
        let reason = CancelReason::new(faults::POISONED_PRECONDITION, Vec::new());
        assert_eq!(reason.to_string(), "poisoned precondition (code 2)");

        let reason = CancelReason::new(99, vec![1, 2, 3]);
        assert_eq!(reason.to_string(), "error (code 99), 3 detail bytes");
    }

    #[test]
    fn debug_hides_payload_bytes() {
        let reason = CancelReason::cancelled(vec![0xFF; 64]);
        let text = format!("{reason:?}");
        assert!(text.contains("details_len: 64"));
    }
}
