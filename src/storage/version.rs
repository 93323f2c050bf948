//! The version gate.
//!
//! | policy      | existing field              | new field |
//! |-------------|-----------------------------|-----------|
//! | `None`      | version + 1                 | 1         |
//! | `Match(v)`  | v == 0 or v == current -> +1 | 1         |
//! | `Abs(v)`    | version = v                 | v         |
//! | `Gt(v)`     | v > current -> version = v  | v         |

use crate::error::{HashError, Result};

/// How a write treats the field's version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionPolicy {
    #[default]
    None,
    /// Compare-and-set; `0` disables the comparison
    Match(u64),
    /// Force the version
    Abs(u64),
    /// Force the version if strictly greater than the current one
    Gt(u64),
}

impl VersionPolicy {
    /// Rejects malformed policies before any state is read.
    pub fn validate(self) -> Result<Self> {
        match self {
            VersionPolicy::Abs(0) | VersionPolicy::Gt(0) => Err(HashError::Syntax),
            policy => Ok(policy),
        }
    }

    /// Checks the policy against an existing field's version.
    ///
    /// New fields are never checked.
    pub fn check(self, current: Option<u64>) -> Result<()> {
        let Some(current) = current else {
            return Ok(());
        };
        match self {
            VersionPolicy::Match(v) if v != 0 && v != current => Err(HashError::VersionConflict),
            VersionPolicy::Gt(v) if v <= current => Err(HashError::VersionConflict),
            _ => Ok(()),
        }
    }

    /// The version a field holds after a successful write.
    ///
    /// `current` is 0 for a field the write creates.
    pub fn next(self, current: u64) -> u64 {
        match self {
            VersionPolicy::None | VersionPolicy::Match(_) => current.wrapping_add(1),
            VersionPolicy::Abs(v) | VersionPolicy::Gt(v) => v,
        }
    }

    /// Validates, checks and computes the next version in one step.
    pub fn apply(self, current: Option<u64>) -> Result<u64> {
        let policy = self.validate()?;
        policy.check(current)?;
        Ok(policy.next(current.unwrap_or(0)))
    }
}
