//! Request priority levels.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Priority of a call waiting for admission to the upstream target.
///
/// Variants are declared from most to least urgent, so the derived `Ord`
/// sorts `Critical < High < Normal < Low`. Use [`Priority::outranks`] when
/// the question is "which one is served first" to avoid reasoning about the
/// inverted comparison.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    /// Console tickets and power operations.
    Critical,
    /// Interactive listings (VM list, VM info).
    High,
    /// First-time loads such as initial thumbnails.
    #[default]
    Normal,
    /// Background refreshes.
    Low,
}

impl Priority {
    /// All levels, most urgent first.
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    /// Index into per-priority tables (0 = most urgent).
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Returns true when `self` must be served before `other`.
    #[must_use]
    pub fn outranks(self, other: Priority) -> bool {
        self < other
    }

    /// Upper-case label used in status snapshots and logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Normal => "NORMAL",
            Self::Low => "LOW",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
