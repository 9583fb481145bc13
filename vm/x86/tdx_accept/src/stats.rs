// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Acceptance statistics.
//!
//! These counters are diagnostic only. Nothing in the acceptor reads them back.

use crate::level::MAX_PAGE_LEVELS;
use crate::level::PageLevel;
use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;

/// The statistics sink used when the caller does not provide one.
pub static ACCEPT_STATS: AcceptStats = AcceptStats::new();

/// Running counters shared by every acceptor that reports into them.
#[derive(Debug)]
pub struct AcceptStats {
    duplicates: AtomicU64,
    accepted: [AtomicU64; MAX_PAGE_LEVELS],
    size_mismatch_fallbacks: AtomicU64,
    busy_retries: AtomicU64,
}

/// A point-in-time copy of [`AcceptStats`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct AcceptStatsSnapshot {
    /// Pages the TDX module reported as already accepted.
    pub duplicates: u64,
    /// Pages newly accepted, indexed by level.
    pub accepted: [u64; MAX_PAGE_LEVELS],
    /// Pages that had to be split into smaller pages.
    pub size_mismatch_fallbacks: u64,
    /// TDCALLs reissued because of operand contention.
    pub busy_retries: u64,
}

impl AcceptStats {
    /// Returns a zeroed set of counters.
    pub const fn new() -> Self {
        Self {
            duplicates: AtomicU64::new(0),
            accepted: [const { AtomicU64::new(0) }; MAX_PAGE_LEVELS],
            size_mismatch_fallbacks: AtomicU64::new(0),
            busy_retries: AtomicU64::new(0),
        }
    }

    /// Records a page that was found to be already accepted, returning the
    /// new total.
    pub fn record_duplicate(&self) -> u64 {
        self.duplicates.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// The number of pages found to be already accepted.
    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    pub(crate) fn record_accepted(&self, level: PageLevel) {
        if let Some(counter) = self.accepted.get(level.index()) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_fallback(&self) {
        self.size_mismatch_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_busy_retry(&self) {
        self.busy_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies out the current counter values.
    pub fn snapshot(&self) -> AcceptStatsSnapshot {
        let mut accepted = [0; MAX_PAGE_LEVELS];
        for (value, counter) in accepted.iter_mut().zip(&self.accepted) {
            *value = counter.load(Ordering::Relaxed);
        }
        AcceptStatsSnapshot {
            duplicates: self.duplicates(),
            accepted,
            size_mismatch_fallbacks: self.size_mismatch_fallbacks.load(Ordering::Relaxed),
            busy_retries: self.busy_retries.load(Ordering::Relaxed),
        }
    }
}

impl Default for AcceptStats {
    fn default() -> Self {
        Self::new()
    }
}
