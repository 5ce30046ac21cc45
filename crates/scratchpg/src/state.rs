//! Lifecycle states of a managed instance.
//!
//! States are totally ordered so the controller can ask "has the instance
//! progressed at least this far?". The ordering is defined by
//! [`InstanceState::rank`] rather than by declaration order:
//!
//! ```text
//! NotPresent(0) < Present(1) < Uninitialized(2) < Initialized(3)
//!     < ServerStarted(4) < Defunct(5)
//! ```
//!
//! `Uninitialized` is the state a freshly configured instance starts in.
//! `NotPresent` and `Present` are only entered while the working directory is
//! being materialised: `Present` once a generated directory exists,
//! `NotPresent` when a caller-supplied directory turns out to be missing.

use std::cmp::Ordering;
use std::fmt;

/// Position of an instance in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceState {
    /// A caller-supplied working directory is missing or unreadable.
    NotPresent,
    /// A generated working directory has been created.
    Present,
    /// Configured but not yet initialised. The starting state.
    Uninitialized,
    /// The data directory and server configuration are in place.
    Initialized,
    /// The database server process is running.
    ServerStarted,
    /// Torn down. Terminal; the instance can never be started again.
    Defunct,
}

impl InstanceState {
    /// Numeric rank used for every ordering comparison between states.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::NotPresent => 0,
            Self::Present => 1,
            Self::Uninitialized => 2,
            Self::Initialized => 3,
            Self::ServerStarted => 4,
            Self::Defunct => 5,
        }
    }

    /// Returns `true` when `self` has progressed at least as far as `other`.
    #[must_use]
    pub const fn is_at_least(self, other: Self) -> bool {
        self.rank() >= other.rank()
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::NotPresent => "not_present",
            Self::Present => "present",
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::ServerStarted => "server_started",
            Self::Defunct => "defunct",
        }
    }
}

impl Ord for InstanceState {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for InstanceState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const LIFECYCLE: [InstanceState; 6] = [
        InstanceState::NotPresent,
        InstanceState::Present,
        InstanceState::Uninitialized,
        InstanceState::Initialized,
        InstanceState::ServerStarted,
        InstanceState::Defunct,
    ];

    #[test]
    fn states_are_strictly_ordered() {
        for pair in LIFECYCLE.windows(2) {
            let [earlier, later] = pair else {
                panic!("windows(2) yields pairs");
            };
            assert!(earlier < later, "{earlier} should precede {later}");
            assert_eq!(earlier.rank() + 1, later.rank());
        }
    }

    #[rstest]
    #[case(InstanceState::Defunct, InstanceState::ServerStarted, true)]
    #[case(InstanceState::Uninitialized, InstanceState::Present, true)]
    #[case(InstanceState::Present, InstanceState::Initialized, false)]
    #[case(InstanceState::Initialized, InstanceState::Initialized, true)]
    fn is_at_least_follows_rank(
        #[case] state: InstanceState,
        #[case] threshold: InstanceState,
        #[case] expected: bool,
    ) {
        assert_eq!(state.is_at_least(threshold), expected);
    }

    #[test]
    fn display_uses_snake_case() {
        assert_eq!(InstanceState::ServerStarted.to_string(), "server_started");
    }
}
