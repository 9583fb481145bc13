// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Accepting arbitrary page-aligned byte ranges.
//!
//! A range is planned as runs of the largest page size that fits at each
//! position: small pages up to the first large page boundary, large pages
//! through the middle, and small pages for whatever is left at the end.

use crate::accept::GPA_WIDTH;
use crate::accept::PageAcceptor;
use crate::error::AcceptPagesError;
use crate::level::GranularityMap;
use crate::level::PageLevel;
use crate::tdcall::Tdcall;
use core::ops::Range;

/// A run of same-sized pages to accept.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AcceptChunk {
    /// The address of the first page.
    pub start: u64,
    /// The number of pages.
    pub count: u64,
    /// The level of every page in the run.
    pub level: PageLevel,
    /// The size of every page in the run.
    pub page_size: u64,
}

impl AcceptChunk {
    /// The address just past the run, saturating at the top of the address
    /// space.
    pub fn end(&self) -> u64 {
        self.count
            .checked_mul(self.page_size)
            .and_then(|len| self.start.checked_add(len))
            .unwrap_or(u64::MAX)
    }
}

/// Iterator returned by [`split_range`].
#[derive(Debug, Clone)]
pub struct SplitRange<'a> {
    map: GranularityMap<'a>,
    cursor: u64,
    end: u64,
}

/// Plans how `range` is covered with pages from `map`.
///
/// The range must be aligned to the smallest page size in `map`. If it is
/// not, iteration stops at the first position no page size fits.
pub fn split_range(map: GranularityMap<'_>, range: Range<u64>) -> SplitRange<'_> {
    SplitRange {
        map,
        cursor: range.start,
        end: range.end.max(range.start),
    }
}

impl Iterator for SplitRange<'_> {
    type Item = AcceptChunk;

    fn next(&mut self) -> Option<AcceptChunk> {
        if self.cursor >= self.end {
            return None;
        }
        let remaining = self.end - self.cursor;
        let (level, page_size) = self
            .map
            .levels()
            .rev()
            .find(|&(_, size)| self.cursor % size == 0 && size <= remaining)?;

        // Stop at the next boundary where a larger page could begin. There is
        // none if that boundary is past the top of the address space.
        let limit = self
            .map
            .page_size(PageLevel(level.0 + 1))
            .and_then(|larger| (self.cursor / larger + 1).checked_mul(larger))
            .map_or(self.end, |boundary| boundary.min(self.end));

        let chunk = AcceptChunk {
            start: self.cursor,
            count: (limit - self.cursor) / page_size,
            level,
            page_size,
        };
        self.cursor = chunk.end();
        Some(chunk)
    }
}

impl<T: Tdcall> PageAcceptor<'_, T> {
    /// Accepts every page in `range` using the largest page sizes that fit.
    ///
    /// Both ends must be aligned to the smallest page size. The same fallback,
    /// retry and partial failure rules as [`PageAcceptor::accept_pages`] apply
    /// to every run.
    pub fn accept_range(&mut self, range: Range<u64>) -> Result<(), AcceptPagesError> {
        let map = self.granularity();
        let page_size = map.smallest_size();

        if range.end < range.start || range.end > 1 << GPA_WIDTH {
            tracing::error!(
                start = range.start,
                end = range.end,
                "invalid range for accept"
            );
            return Err(AcceptPagesError::RangeOverflow {
                gpa: range.start,
                count: range.end.wrapping_sub(range.start) / page_size,
                page_size,
            });
        }
        self.validate_gpa(range.start)?;
        if range.end % page_size != 0 {
            tracing::error!(end = range.end, "accept range end is not page aligned");
            return Err(AcceptPagesError::UnalignedAddress { gpa: range.end });
        }

        for chunk in split_range(map, range) {
            tracing::debug!(
                start = chunk.start,
                count = chunk.count,
                level = %chunk.level,
                "accepting pages"
            );
            self.accept_run(chunk.start, chunk.count, chunk.level, chunk.page_size)?;
        }
        Ok(())
    }
}
