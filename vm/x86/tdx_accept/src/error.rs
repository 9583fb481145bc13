// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Errors returned when accepting pages.

use crate::level::PageLevel;
use crate::tdcall::TdCallResult;
use thiserror::Error;

/// Error accepting pages.
///
/// Every variant is an invalid-parameter class failure, see
/// [`AcceptPagesError::status`]. Failures after the first TDCALL leave the
/// pages accepted so far in the accepted state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum AcceptPagesError {
    /// The start address is not 4K aligned.
    #[error("gpa {gpa:#x} is not page aligned")]
    UnalignedAddress {
        /// The offending address.
        gpa: u64,
    },
    /// The start address has bits set above the guest physical address width.
    #[error("gpa {gpa:#x} has reserved high bits set")]
    ReservedAddressBits {
        /// The offending address.
        gpa: u64,
    },
    /// The page size is not one of the supported granularities.
    #[error("page size {page_size:#x} is not supported")]
    UnsupportedPageSize {
        /// The requested page size.
        page_size: u64,
    },
    /// The requested range wraps or extends past the guest physical address
    /// width.
    #[error("{count} pages of size {page_size:#x} at gpa {gpa:#x} overflow the address space")]
    RangeOverflow {
        /// The start of the range.
        gpa: u64,
        /// The number of pages requested.
        count: u64,
        /// The page size requested.
        page_size: u64,
    },
    /// The TDX module reported a size mismatch for a page at the smallest level.
    #[error("gpa {gpa:#x} cannot be accepted at the smallest page level")]
    SizeMismatchAtSmallestLevel {
        /// The page that could not be accepted.
        gpa: u64,
    },
    /// The page stayed busy through every retry.
    #[error("gpa {gpa:#x} at level {level} still busy after {attempts} attempts")]
    OperandBusy {
        /// The page that could not be accepted.
        gpa: u64,
        /// The level the page was being accepted at.
        level: PageLevel,
        /// The number of TDCALLs issued for the page.
        attempts: u32,
    },
    /// The TDX module returned an unexpected status.
    #[error("tdcall failed with {result:?} accepting gpa {gpa:#x} at level {level}")]
    TdCall {
        /// The page that could not be accepted.
        gpa: u64,
        /// The level the page was being accepted at.
        level: PageLevel,
        /// The status returned by the TDX module.
        result: TdCallResult,
    },
}

impl AcceptPagesError {
    /// Returns the flattened status that firmware callers expect.
    pub fn status(&self) -> ReturnStatus {
        ReturnStatus::INVALID_PARAMETER
    }

    /// Returns true if the error was detected before any TDCALL was issued.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::UnalignedAddress { .. }
                | Self::ReservedAddressBits { .. }
                | Self::UnsupportedPageSize { .. }
                | Self::RangeOverflow { .. }
        )
    }
}

/// A firmware style return status.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReturnStatus(pub u64);

impl ReturnStatus {
    /// The operation completed.
    pub const SUCCESS: Self = Self(0);
    /// A parameter was incorrect.
    pub const INVALID_PARAMETER: Self = Self(0x8000_0000_0000_0002);

    /// Returns true for [`Self::SUCCESS`].
    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS
    }
}

impl From<AcceptPagesError> for ReturnStatus {
    fn from(err: AcceptPagesError) -> Self {
        err.status()
    }
}

impl From<Result<(), AcceptPagesError>> for ReturnStatus {
    fn from(result: Result<(), AcceptPagesError>) -> Self {
        match result {
            Ok(()) => Self::SUCCESS,
            Err(err) => err.status(),
        }
    }
}
