// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Software TDCALL implementations for tests.

use crate::level::GranularityMap;
use crate::level::PageLevel;
use crate::tdcall::TdCallLeaf;
use crate::tdcall::TdCallResult;
use crate::tdcall::Tdcall;
use crate::tdcall::TdcallInput;
use crate::tdcall::TdcallOutput;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Arc;

fn decode_accept(input: &TdcallInput) -> (u64, PageLevel) {
    assert_eq!(input.leaf, TdCallLeaf::MEM_PAGE_ACCEPT);
    assert_eq!((input.rdx, input.r8, input.r9), (0, 0, 0));
    (input.rcx & !0xfff, PageLevel((input.rcx & 0x7) as u8))
}

fn output(result: TdCallResult) -> TdcallOutput {
    TdcallOutput {
        rax: result,
        ..Default::default()
    }
}

/// Replays queued results in order, succeeding once the queue runs dry, and
/// records every accept it sees.
#[derive(Debug, Default)]
pub struct ScriptedTdcall {
    pub calls: Vec<(u64, PageLevel)>,
    script: VecDeque<TdCallResult>,
}

impl ScriptedTdcall {
    pub fn new(script: impl IntoIterator<Item = TdCallResult>) -> Self {
        Self {
            calls: Vec::new(),
            script: script.into_iter().collect(),
        }
    }
}

impl Tdcall for ScriptedTdcall {
    fn tdcall(&mut self, input: TdcallInput) -> TdcallOutput {
        self.calls.push(decode_accept(&input));
        output(self.script.pop_front().unwrap_or(TdCallResult::SUCCESS))
    }
}

#[derive(Debug, Default)]
struct TdState {
    /// Accepted pages, keyed by smallest page, with the level they were
    /// accepted at.
    pages: HashMap<u64, PageLevel>,
    /// Large pages whose secure EPT mapping is already split.
    split: HashSet<u64>,
    /// Remaining busy responses, keyed by page.
    busy: HashMap<u64, u32>,
    /// Guest writes, keyed by smallest page.
    contents: HashMap<u64, u8>,
    calls: Vec<(u64, PageLevel)>,
}

/// A shared, lock-protected model of the TDX module's view of guest memory.
///
/// Clones share state, so each thread can own one.
#[derive(Debug, Clone)]
pub struct SimulatedTd {
    map: GranularityMap<'static>,
    state: Arc<Mutex<TdState>>,
}

impl SimulatedTd {
    pub fn new(map: GranularityMap<'static>) -> Self {
        Self {
            map,
            state: Default::default(),
        }
    }

    /// Makes accepts of the large page at `gpa` fail with a size mismatch.
    pub fn split_large_page(&self, gpa: u64) {
        self.state.lock().split.insert(gpa);
    }

    /// Makes the next `count` accepts of `gpa` report operand busy.
    pub fn make_busy(&self, gpa: u64, count: u32) {
        self.state.lock().busy.insert(gpa, count);
    }

    pub fn is_accepted(&self, gpa: u64) -> bool {
        self.state.lock().pages.contains_key(&gpa)
    }

    pub fn accepted_count(&self) -> usize {
        self.state.lock().pages.len()
    }

    pub fn write(&self, gpa: u64, value: u8) {
        let mut state = self.state.lock();
        assert!(state.pages.contains_key(&gpa), "write to unaccepted page");
        state.contents.insert(gpa, value);
    }

    pub fn read(&self, gpa: u64) -> u8 {
        self.state.lock().contents.get(&gpa).copied().unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<(u64, PageLevel)> {
        self.state.lock().calls.clone()
    }

    fn accept(&self, gpa: u64, level: PageLevel) -> TdCallResult {
        let mut state = self.state.lock();
        state.calls.push((gpa, level));

        if let Some(remaining) = state.busy.get_mut(&gpa) {
            if *remaining > 0 {
                *remaining -= 1;
                return TdCallResult::OPERAND_BUSY;
            }
        }

        let Some(size) = self.map.page_size(level) else {
            return TdCallResult::from_bits(0xC000_0100_0000_0001);
        };
        let step = self.map.smallest_size();
        let pages: Vec<u64> = (gpa..gpa + size).step_by(step as usize).collect();

        if level > PageLevel::SMALLEST {
            if state.split.contains(&gpa) {
                return TdCallResult::PAGE_SIZE_MISMATCH;
            }
            let present = pages
                .iter()
                .filter(|&&page| state.pages.get(&page) == Some(&level))
                .count();
            if present == pages.len() {
                return TdCallResult::PAGE_ALREADY_ACCEPTED;
            }
            if pages.iter().any(|page| state.pages.contains_key(page)) {
                return TdCallResult::PAGE_SIZE_MISMATCH;
            }
        } else if state.pages.contains_key(&gpa) {
            return TdCallResult::PAGE_ALREADY_ACCEPTED;
        }

        for page in pages {
            state.pages.insert(page, level);
            state.contents.remove(&page);
        }
        TdCallResult::SUCCESS
    }
}

impl Tdcall for SimulatedTd {
    fn tdcall(&mut self, input: TdcallInput) -> TdcallOutput {
        let (gpa, level) = decode_accept(&input);
        output(self.accept(gpa, level))
    }
}
