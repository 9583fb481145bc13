// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The TDCALL boundary used to accept pages.
//!
//! Everything that knows how a TDG.MEM.PAGE.ACCEPT is encoded on the wire, or
//! how its completion status is classified, lives here. The acceptor itself
//! only sees an [`AcceptStatus`].

use crate::level::PageLevel;
use bitfield_struct::bitfield;

/// A TDCALL leaf number, passed in RAX.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TdCallLeaf(pub u64);

impl TdCallLeaf {
    /// TDG.MEM.PAGE.ACCEPT
    pub const MEM_PAGE_ACCEPT: Self = Self(6);
}

/// Register inputs to a TDCALL.
#[expect(missing_docs)] // Named after the registers they are passed in.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TdcallInput {
    /// The leaf, in RAX.
    pub leaf: TdCallLeaf,
    pub rcx: u64,
    pub rdx: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
}

/// Register outputs of a TDCALL.
#[expect(missing_docs)] // Named after the registers they are returned in.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TdcallOutput {
    /// The completion status, in RAX.
    pub rax: TdCallResult,
    pub rcx: u64,
    pub rdx: u64,
    pub r8: u64,
    pub r10: u64,
    pub r11: u64,
}

/// Something that can issue a TDCALL to the TDX module.
///
/// A single call is atomic and blocking from the caller's point of view.
pub trait Tdcall {
    /// Issues a TDCALL with the given register inputs.
    fn tdcall(&mut self, input: TdcallInput) -> TdcallOutput;
}

impl<T: Tdcall + ?Sized> Tdcall for &mut T {
    fn tdcall(&mut self, input: TdcallInput) -> TdcallOutput {
        (**self).tdcall(input)
    }
}

/// The 64-bit completion status returned in RAX.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct TdCallResult {
    /// Operand identifier or other per-call detail.
    pub details: u16,
    /// Additional status information for some codes.
    pub extended: u16,
    /// The completion status code. Bit 31 is the error bit.
    pub code: u32,
}

impl TdCallResult {
    /// TDX_SUCCESS
    pub const SUCCESS: Self = Self::from_bits(0);
    /// TDX_PAGE_ALREADY_ACCEPTED
    pub const PAGE_ALREADY_ACCEPTED: Self = Self::from_bits(0x0000_0B0A_0000_0000);
    /// TDX_PAGE_SIZE_MISMATCH
    pub const PAGE_SIZE_MISMATCH: Self = Self::from_bits(0xC000_0B0B_0000_0000);
    /// TDX_OPERAND_BUSY
    pub const OPERAND_BUSY: Self = Self::from_bits(0x8000_0200_0000_0000);

    const OPERAND_DETAILS_MASK: u64 = 0xffff;

    /// Returns the status with the operand details in the low 16 bits
    /// cleared, which is what distinguishes one class of status from another.
    pub const fn status_class(&self) -> u64 {
        self.into_bits() & !Self::OPERAND_DETAILS_MASK
    }

    /// Returns true if the error bit is set.
    pub const fn is_error(&self) -> bool {
        self.into_bits() & (1 << 63) != 0
    }
}

/// The outcome of one TDG.MEM.PAGE.ACCEPT, as the acceptor sees it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AcceptStatus {
    /// The page was accepted.
    Success,
    /// The page had already been accepted.
    AlreadyAccepted,
    /// The page cannot be accepted at the requested level.
    SizeMismatch,
    /// A secure EPT entry was contended by another acceptor.
    OperandBusy,
    /// Any other status.
    Other(TdCallResult),
}

impl From<TdCallResult> for AcceptStatus {
    fn from(result: TdCallResult) -> Self {
        if result == TdCallResult::SUCCESS {
            return Self::Success;
        }
        match result.status_class() {
            c if c == TdCallResult::PAGE_ALREADY_ACCEPTED.into_bits() => Self::AlreadyAccepted,
            c if c == TdCallResult::PAGE_SIZE_MISMATCH.into_bits() => Self::SizeMismatch,
            c if c == TdCallResult::OPERAND_BUSY.into_bits() => Self::OperandBusy,
            _ => Self::Other(result),
        }
    }
}

/// Issues TDG.MEM.PAGE.ACCEPT for the page at `gpa` with the given level.
///
/// The level is encoded in the low bits of RCX alongside the page-aligned GPA.
/// The remaining inputs are reserved and passed as zero.
pub fn tdcall_accept_page(tdcall: &mut impl Tdcall, gpa: u64, level: PageLevel) -> TdCallResult {
    let input = TdcallInput {
        leaf: TdCallLeaf::MEM_PAGE_ACCEPT,
        rcx: gpa | level.as_u64(),
        rdx: 0,
        r8: 0,
        r9: 0,
        r10: 0,
        r11: 0,
    };

    tdcall.tdcall(input).rax
}

/// Issues TDCALLs with the `tdcall` instruction.
#[cfg(target_arch = "x86_64")]
#[derive(Debug)]
pub struct TdcallInstruction(());

#[cfg(target_arch = "x86_64")]
impl TdcallInstruction {
    /// Returns a new instance.
    ///
    /// # Safety
    ///
    /// The caller must be running inside a TDX guest, where the `tdcall`
    /// instruction is defined.
    pub unsafe fn new() -> Self {
        Self(())
    }
}

#[cfg(target_arch = "x86_64")]
impl Tdcall for TdcallInstruction {
    fn tdcall(&mut self, input: TdcallInput) -> TdcallOutput {
        let rax: u64;
        let rcx;
        let rdx;
        let r8;
        let r10;
        let r11;

        // SAFETY: Constructing a TdcallInstruction guarantees we are in a TD,
        // and the TDX module defines which registers each leaf touches. All
        // argument registers are declared as clobbered.
        unsafe {
            core::arch::asm! {
                ".byte 0x66, 0x0f, 0x01, 0xcc", // tdcall
                inout("rax") input.leaf.0 => rax,
                inout("rcx") input.rcx => rcx,
                inout("rdx") input.rdx => rdx,
                inout("r8") input.r8 => r8,
                inout("r9") input.r9 => _,
                inout("r10") input.r10 => r10,
                inout("r11") input.r11 => r11,
            }
        }

        TdcallOutput {
            rax: rax.into(),
            rcx,
            rdx,
            r8,
            r10,
            r11,
        }
    }
}
