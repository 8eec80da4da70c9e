//! Record versions for optimistic concurrency.
//!
//! Every stored aggregate carries a [`Version`]. Writers send back the version they
//! read; the repository only accepts the write when it still matches.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Write counter of one record.
///
/// `0` on creation, `+1` per accepted update. An update carrying any other
/// value than the stored one is a conflict and writes nothing.
///
/// ```
/// use microservices_core::version::Version;
///
/// let created = Version::INITIAL;
/// assert_eq!(created.next().value(), 1);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// Version of a record that was never updated.
    pub const INITIAL: Self = Self(0);

    /// Wrap a stored counter.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw counter.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Version after one more accepted update.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Whether the record was never updated.
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn updates_count_up_from_zero() {
        let mut version = Version::INITIAL;
        assert!(version.is_initial());
        for expected in 1..=3 {
            version = version.next();
            assert_eq!(version.value(), expected);
        }
        assert!(!version.is_initial());
        assert!(Version::INITIAL < version);
    }

    #[test]
    fn json_is_a_bare_number() {
        assert_eq!(serde_json::to_string(&Version::new(7)).unwrap(), "7");
        assert_eq!(serde_json::from_str::<Version>("3").unwrap(), Version::new(3));
    }
}
