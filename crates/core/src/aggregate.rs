//! Aggregate contract for event-sourced billing models.

use crate::error::{DomainError, DomainResult};

/// Identity and version of an aggregate root.
pub trait AggregateRoot {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Number of records applied so far. For an event-sourced aggregate this
    /// equals the sequence number of the last record in its stream.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation attached to an append.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Append unconditionally.
    Any,
    /// The stream must not exist yet.
    NoStream,
    /// The stream must currently end at exactly this sequence number.
    Exact(u64),
}

impl ExpectedVersion {
    /// Expectation matching a stream that was read at `version`.
    ///
    /// Version `0` means "nothing was read", which is the same as `NoStream`.
    pub fn read_at(version: u64) -> Self {
        if version == 0 {
            ExpectedVersion::NoStream
        } else {
            ExpectedVersion::Exact(version)
        }
    }

    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::NoStream => actual == 0,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "stale stream version (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}

/// Decide/evolve split used by every aggregate in the workspace.
///
/// `handle` inspects current state and returns the records a command produces,
/// without mutating anything. `apply` folds one record into state and bumps
/// the version by one. Neither may perform IO.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    fn apply(&mut self, event: &Self::Event);

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_at_zero_requires_an_empty_stream() {
        let expected = ExpectedVersion::read_at(0);
        assert_eq!(expected, ExpectedVersion::NoStream);
        assert!(expected.matches(0));
        assert!(!expected.matches(1));
    }

    #[test]
    fn exact_version_mismatch_is_a_conflict() {
        let err = ExpectedVersion::read_at(3).check(4).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert!(ExpectedVersion::Any.check(42).is_ok());
    }
}
