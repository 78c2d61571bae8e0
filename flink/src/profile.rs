//! Two-outcome branch profiles.
//!
//! Each conditional branch site owns one profile in the unit's profile
//! table. The counters bias speculation only; correctness never depends on
//! them, so relaxed saturating updates are enough.

use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Default)]
pub struct BranchProfile {
    taken: AtomicU32,
    not_taken: AtomicU32,
}

impl BranchProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the observed condition and hand it back.
    pub fn record(&self, cond: bool) -> bool {
        let counter = if cond { &self.taken } else { &self.not_taken };
        let count = counter.load(Ordering::Relaxed);
        if count < u32::MAX {
            counter.store(count + 1, Ordering::Relaxed);
        }
        cond
    }

    pub fn taken(&self) -> u32 {
        self.taken.load(Ordering::Relaxed)
    }

    pub fn not_taken(&self) -> u32 {
        self.not_taken.load(Ordering::Relaxed)
    }

    /// The outcome this site leans towards, if it leans at all.
    pub fn bias(&self) -> Option<bool> {
        let taken = self.taken();
        let not_taken = self.not_taken();
        if taken == not_taken {
            None
        } else {
            Some(taken > not_taken)
        }
    }
}

#[cfg(test)]
mod profile_tests {
    use super::*;

    #[test]
    fn record_returns_the_condition_unchanged() {
        let profile = BranchProfile::new();
        assert!(profile.record(true));
        assert!(!profile.record(false));
    }

    #[test]
    fn counters_and_bias_track_outcomes() {
        let profile = BranchProfile::new();
        profile.record(true);
        profile.record(true);
        profile.record(false);
        assert_eq!(profile.taken(), 2);
        assert_eq!(profile.not_taken(), 1);
        assert_eq!(profile.bias(), Some(true));
    }
}
