// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Acceptance of private memory in a TDX guest.
//!
//! Memory assigned to a trust domain starts out unaccepted and must be accepted
//! with TDG.MEM.PAGE.ACCEPT before the guest touches it. [`PageAcceptor`] walks
//! a range of pages, issuing one accept per page and handling the statuses the
//! TDX module uses to push back:
//!
//! * a page that is already accepted is counted and skipped,
//! * a page that cannot be accepted at the requested size is split into pages
//!   of the next smaller size,
//! * a page whose secure EPT entry is contended is retried a bounded number of
//!   times.
//!
//! Any other outcome stops the walk. Pages accepted up to that point stay
//! accepted, and accepting the same range again is always safe.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

mod accept;
mod error;
pub mod level;
mod range;
pub mod stats;
pub mod tdcall;

#[cfg(test)]
mod test_tdcall;

pub use accept::GPA_WIDTH;
pub use accept::MAX_BUSY_RETRIES;
pub use accept::PageAcceptor;
pub use accept::accept_pages;
pub use error::AcceptPagesError;
pub use error::ReturnStatus;
pub use level::GranularityMap;
pub use level::PageLevel;
pub use range::AcceptChunk;
pub use range::SplitRange;
pub use range::split_range;
pub use stats::ACCEPT_STATS;
pub use stats::AcceptStats;
pub use tdcall::Tdcall;
