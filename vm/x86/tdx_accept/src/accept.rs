// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Accepting runs of pages with TDG.MEM.PAGE.ACCEPT.

use crate::error::AcceptPagesError;
use crate::error::ReturnStatus;
use crate::level::GranularityMap;
use crate::level::PageLevel;
use crate::stats::ACCEPT_STATS;
use crate::stats::AcceptStats;
use crate::tdcall::AcceptStatus;
use crate::tdcall::Tdcall;
use crate::tdcall::tdcall_accept_page;

/// The number of times a page reported as busy is retried before giving up.
pub const MAX_BUSY_RETRIES: u32 = 3;

/// Width of a guest physical address. Bits at and above this must be clear.
pub const GPA_WIDTH: u32 = 52;

const GPA_LIMIT: u64 = 1 << GPA_WIDTH;

/// Accepts guest memory through a [`Tdcall`] implementation.
///
/// Acceptance is idempotent, so a range that failed part way can simply be
/// accepted again. Pages accepted before a failure stay accepted.
pub struct PageAcceptor<'a, T> {
    tdcall: T,
    map: GranularityMap<'a>,
    stats: &'a AcceptStats,
}

impl<'a, T: Tdcall> PageAcceptor<'a, T> {
    /// Returns an acceptor using 4K and 2MB pages that reports into
    /// [`ACCEPT_STATS`].
    pub fn new(tdcall: T) -> Self {
        Self {
            tdcall,
            map: GranularityMap::TDX,
            stats: &ACCEPT_STATS,
        }
    }

    /// Uses `map` for the set of acceptable page sizes.
    pub fn with_granularity(mut self, map: GranularityMap<'a>) -> Self {
        self.map = map;
        self
    }

    /// Reports statistics into `stats`.
    pub fn with_stats(mut self, stats: &'a AcceptStats) -> Self {
        self.stats = stats;
        self
    }

    /// The granularity map in use.
    pub fn granularity(&self) -> GranularityMap<'a> {
        self.map
    }

    /// The statistics sink in use.
    pub fn stats(&self) -> &'a AcceptStats {
        self.stats
    }

    /// Returns the underlying [`Tdcall`] implementation.
    pub fn into_inner(self) -> T {
        self.tdcall
    }

    /// Accepts `count` pages of `page_size` bytes starting at `start`.
    ///
    /// A page the TDX module cannot accept at `page_size` is accepted as pages
    /// of the next smaller size instead. Any failure stops the walk; nothing
    /// past the failing page is touched and nothing before it is undone.
    pub fn accept_pages(
        &mut self,
        start: u64,
        count: u64,
        page_size: u64,
    ) -> Result<(), AcceptPagesError> {
        self.validate_gpa(start)?;

        let Some(level) = self.map.level_of(page_size) else {
            tracing::error!(page_size, "unsupported page size for accept");
            return Err(AcceptPagesError::UnsupportedPageSize { page_size });
        };

        let in_bounds = count
            .checked_mul(page_size)
            .and_then(|len| start.checked_add(len))
            .is_some_and(|end| end <= GPA_LIMIT);
        if !in_bounds {
            tracing::error!(gpa = start, count, page_size, "accept range overflows");
            return Err(AcceptPagesError::RangeOverflow {
                gpa: start,
                count,
                page_size,
            });
        }

        self.accept_run(start, count, level, page_size)
    }

    /// Accepts the single page of `page_size` bytes at `gpa`.
    pub fn accept_page(&mut self, gpa: u64, page_size: u64) -> Result<(), AcceptPagesError> {
        self.accept_pages(gpa, 1, page_size)
    }

    /// Like [`Self::accept_pages`], but reports the flattened firmware status.
    pub fn accept_pages_status(&mut self, start: u64, count: u64, page_size: u64) -> ReturnStatus {
        self.accept_pages(start, count, page_size).into()
    }

    pub(crate) fn validate_gpa(&self, gpa: u64) -> Result<(), AcceptPagesError> {
        if gpa >= GPA_LIMIT {
            tracing::error!(gpa, "accept address has reserved bits set");
            return Err(AcceptPagesError::ReservedAddressBits { gpa });
        }
        if gpa & (self.map.smallest_size() - 1) != 0 {
            tracing::error!(gpa, "accept address is not page aligned");
            return Err(AcceptPagesError::UnalignedAddress { gpa });
        }
        Ok(())
    }

    /// Accepts an already validated run of pages.
    pub(crate) fn accept_run(
        &mut self,
        start: u64,
        count: u64,
        level: PageLevel,
        page_size: u64,
    ) -> Result<(), AcceptPagesError> {
        for index in 0..count {
            self.accept_one(start + index * page_size, level)?;
        }
        Ok(())
    }

    fn accept_one(&mut self, gpa: u64, level: PageLevel) -> Result<(), AcceptPagesError> {
        for attempt in 0..=MAX_BUSY_RETRIES {
            match AcceptStatus::from(tdcall_accept_page(&mut self.tdcall, gpa, level)) {
                AcceptStatus::Success => {
                    self.stats.record_accepted(level);
                    return Ok(());
                }
                AcceptStatus::AlreadyAccepted => {
                    let total = self.stats.record_duplicate();
                    tracing::warn!(gpa, %level, total, "page already accepted");
                    return Ok(());
                }
                AcceptStatus::SizeMismatch => return self.accept_split(gpa, level),
                AcceptStatus::OperandBusy => {
                    if attempt < MAX_BUSY_RETRIES {
                        self.stats.record_busy_retry();
                        tracing::debug!(gpa, %level, attempt, "page busy, retrying accept");
                    }
                }
                AcceptStatus::Other(result) => {
                    tracing::error!(gpa, %level, ?result, "failed to accept page");
                    return Err(AcceptPagesError::TdCall { gpa, level, result });
                }
            }
        }

        tracing::error!(gpa, %level, "page still busy, giving up on accept");
        Err(AcceptPagesError::OperandBusy {
            gpa,
            level,
            attempts: MAX_BUSY_RETRIES + 1,
        })
    }

    /// Accepts the page at `gpa` as pages of the next smaller level.
    fn accept_split(&mut self, gpa: u64, level: PageLevel) -> Result<(), AcceptPagesError> {
        let Some(fallback) = self.map.fallback(level) else {
            tracing::error!(gpa, %level, "page size mismatch at the smallest level");
            return Err(AcceptPagesError::SizeMismatchAtSmallestLevel { gpa });
        };

        tracing::warn!(
            gpa,
            %level,
            fallback_level = %fallback.level,
            "page cannot be accepted at this level, splitting"
        );
        self.stats.record_fallback();
        self.accept_run(gpa, fallback.count, fallback.level, fallback.page_size)
    }
}

/// Accepts `count` pages of `page_size` bytes starting at `start` with a
/// one-off [`PageAcceptor`].
pub fn accept_pages(
    tdcall: impl Tdcall,
    start: u64,
    count: u64,
    page_size: u64,
) -> Result<(), AcceptPagesError> {
    PageAcceptor::new(tdcall).accept_pages(start, count, page_size)
}
