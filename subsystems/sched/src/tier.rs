//! # Scheduling Tiers
//!
//! A tier is the coarse QoS class of a thread: it decides both the priority
//! band the thread competes in and the deadline parameters its root bucket
//! is scheduled with.
//!
//! Tiers form a closed set. [`Tier::AboveUi`] is special: it is a
//! fixed-priority class whose unbound root bucket is preferred by direct
//! priority comparison against [`Tier::Foreground`] before the hierarchy
//! falls back to earliest-deadline selection (the two bands overlap
//! numerically). All per-tier magnitudes (WCEL, warp, quantum, ageout) live
//! in [`crate::config::SchedConfig`], not here.

use core::fmt;

/// Number of scheduling tiers.
pub const TIER_COUNT: usize = 6;

/// Coarse QoS scheduling class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Tier {
    /// Fixed-priority class above the UI band; never timeshared.
    AboveUi = 0,
    /// Foreground timeshare work.
    Foreground = 1,
    /// User-interactive timeshare work.
    Interactive = 2,
    /// Default timeshare work.
    Default = 3,
    /// Utility (long-running, user-visible) work.
    Utility = 4,
    /// Background (not user-visible) work.
    Background = 5,
}

impl Tier {
    /// All tiers, highest first.
    pub const ALL: [Tier; TIER_COUNT] = [
        Tier::AboveUi,
        Tier::Foreground,
        Tier::Interactive,
        Tier::Default,
        Tier::Utility,
        Tier::Background,
    ];

    /// Dense index of this tier, 0 = highest.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Tier from a dense index.
    ///
    /// # Panics
    ///
    /// Panics if `index >= TIER_COUNT`; tier indices are internal and a bad
    /// one is an accounting bug.
    pub fn from_index(index: usize) -> Self {
        Self::ALL[index]
    }

    /// Whether this tier is the fixed-priority class.
    pub const fn is_fixed(self) -> bool {
        matches!(self, Tier::AboveUi)
    }

    /// Whether `self` is a strictly higher class than `other`.
    pub const fn is_above(self, other: Tier) -> bool {
        (self as u8) < (other as u8)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::AboveUi => "above-ui",
            Tier::Foreground => "foreground",
            Tier::Interactive => "interactive",
            Tier::Default => "default",
            Tier::Utility => "utility",
            Tier::Background => "background",
        };
        f.write_str(name)
    }
}

static_assertions::const_assert_eq!(Tier::ALL.len(), TIER_COUNT);
