// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Mapping between page sizes and TDX page levels.
//!
//! TDG.MEM.PAGE.ACCEPT names the granularity of the accept by its level in the
//! secure EPT, where level 0 is a 4K page. A [`GranularityMap`] is the ordered,
//! smallest-first chain of page sizes that the acceptor is allowed to use.

/// Number of bytes in a 4K page.
pub const X64_PAGE_SIZE: u64 = 0x1000;

/// Number of bytes in a 2MB large page.
pub const X64_LARGE_PAGE_SIZE: u64 = 0x200000;

/// Number of bytes in a 1GB page.
pub const X64_1GB_PAGE_SIZE: u64 = 0x40000000;

/// The maximum number of levels a [`GranularityMap`] may contain.
pub const MAX_PAGE_LEVELS: usize = 3;

static_assertions::const_assert_eq!(X64_LARGE_PAGE_SIZE / X64_PAGE_SIZE, 512);
static_assertions::const_assert_eq!(X64_1GB_PAGE_SIZE / X64_LARGE_PAGE_SIZE, 512);

/// A zero-based page level. Level 0 is the smallest page size in a map.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageLevel(pub u8);

impl PageLevel {
    /// The smallest page level.
    pub const SMALLEST: Self = Self(0);

    /// Returns the level as an index into per-level tables.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns the level as encoded in the low bits of a TDCALL GPA operand.
    pub const fn as_u64(self) -> u64 {
        self.0 as u64
    }
}

impl core::fmt::Display for PageLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// A page at one level re-expressed as a run of pages one level down.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Fallback {
    /// The smaller level.
    pub level: PageLevel,
    /// The page size at the smaller level.
    pub page_size: u64,
    /// The number of smaller pages covering the original page.
    pub count: u64,
}

/// A fixed, strictly ascending chain of supported page sizes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GranularityMap<'a> {
    sizes: &'a [u64],
}

const TDX_SIZES: [u64; 2] = [X64_PAGE_SIZE, X64_LARGE_PAGE_SIZE];
const TDX_SIZES_WITH_1G: [u64; 3] = [X64_PAGE_SIZE, X64_LARGE_PAGE_SIZE, X64_1GB_PAGE_SIZE];

impl GranularityMap<'static> {
    /// 4K pages at level 0 and 2MB pages at level 1.
    pub const TDX: GranularityMap<'static> = GranularityMap { sizes: &TDX_SIZES };

    /// The [`Self::TDX`] chain extended with 1GB pages at level 2.
    pub const TDX_WITH_1G: GranularityMap<'static> = GranularityMap {
        sizes: &TDX_SIZES_WITH_1G,
    };
}

impl<'a> GranularityMap<'a> {
    /// Builds a map from `sizes`, smallest first.
    ///
    /// Returns `None` unless the chain is non-empty, no longer than
    /// [`MAX_PAGE_LEVELS`], made of powers of two, and every size is a strict
    /// multiple of the one before it.
    pub const fn new(sizes: &'a [u64]) -> Option<Self> {
        if sizes.is_empty() || sizes.len() > MAX_PAGE_LEVELS {
            return None;
        }
        let mut i = 0;
        while i < sizes.len() {
            if !sizes[i].is_power_of_two() {
                return None;
            }
            // Powers of two in ascending order always divide each other.
            if i > 0 && sizes[i] <= sizes[i - 1] {
                return None;
            }
            i += 1;
        }
        Some(Self { sizes })
    }

    /// Returns the level of `page_size`, or `None` if it is not in the map.
    pub fn level_of(&self, page_size: u64) -> Option<PageLevel> {
        self.sizes
            .iter()
            .position(|&size| size == page_size)
            .map(|index| PageLevel(index as u8))
    }

    /// Returns the page size at `level`, or `None` if the level is out of range.
    pub fn page_size(&self, level: PageLevel) -> Option<u64> {
        self.sizes.get(level.index()).copied()
    }

    /// Returns the next smaller level, or `None` at level 0.
    pub fn smaller(&self, level: PageLevel) -> Option<PageLevel> {
        if level.index() == 0 || level.index() >= self.sizes.len() {
            return None;
        }
        Some(PageLevel(level.0 - 1))
    }

    /// Returns the number of pages of the next smaller level that tile one
    /// page at `level`.
    pub fn ratio(&self, level: PageLevel) -> Option<u64> {
        self.fallback(level).map(|fallback| fallback.count)
    }

    /// Describes how one page at `level` is re-expressed as pages of the next
    /// smaller level, or `None` at level 0.
    pub fn fallback(&self, level: PageLevel) -> Option<Fallback> {
        let smaller = self.smaller(level)?;
        let page_size = self.page_size(smaller)?;
        Some(Fallback {
            level: smaller,
            page_size,
            count: self.page_size(level)? / page_size,
        })
    }

    /// The largest level in the map.
    pub fn largest(&self) -> PageLevel {
        PageLevel((self.sizes.len() - 1) as u8)
    }

    /// The smallest page size in the map.
    pub fn smallest_size(&self) -> u64 {
        self.sizes[0]
    }

    /// Iterates over `(level, page_size)` pairs, smallest first.
    pub fn levels(&self) -> impl DoubleEndedIterator<Item = (PageLevel, u64)> + '_ {
        self.sizes
            .iter()
            .enumerate()
            .map(|(index, &size)| (PageLevel(index as u8), size))
    }
}

impl Default for GranularityMap<'static> {
    fn default() -> Self {
        Self::TDX
    }
}

#[cfg(test)]
mod tests {
    use super::Fallback;
    use super::GranularityMap;
    use super::PageLevel;
    use super::X64_1GB_PAGE_SIZE;
    use super::X64_LARGE_PAGE_SIZE;
    use super::X64_PAGE_SIZE;

    #[test]
    fn tdx_levels() {
        let map = GranularityMap::TDX;
        assert_eq!(map.level_of(X64_PAGE_SIZE), Some(PageLevel(0)));
        assert_eq!(map.level_of(X64_LARGE_PAGE_SIZE), Some(PageLevel(1)));
        assert_eq!(map.level_of(X64_1GB_PAGE_SIZE), None);
        assert_eq!(map.level_of(0x3000), None);
        assert_eq!(map.level_of(0), None);
        assert_eq!(map.largest(), PageLevel(1));
    }

    #[test]
    fn smaller_and_ratio() {
        let map = GranularityMap::TDX_WITH_1G;
        assert_eq!(map.smaller(PageLevel(0)), None);
        assert_eq!(map.smaller(PageLevel(1)), Some(PageLevel(0)));
        assert_eq!(map.smaller(PageLevel(2)), Some(PageLevel(1)));
        assert_eq!(map.smaller(PageLevel(3)), None);
        assert_eq!(map.ratio(PageLevel(0)), None);
        assert_eq!(map.ratio(PageLevel(1)), Some(512));
        assert_eq!(map.ratio(PageLevel(2)), Some(512));
        assert_eq!(
            map.fallback(PageLevel(1)),
            Some(Fallback {
                level: PageLevel(0),
                page_size: X64_PAGE_SIZE,
                count: 512,
            })
        );
    }

    #[test]
    fn custom_chain() {
        let sizes = [0x1000, 0x10000];
        let map = GranularityMap::new(&sizes).unwrap();
        assert_eq!(map.ratio(PageLevel(1)), Some(16));
        assert_eq!(map.page_size(PageLevel(1)), Some(0x10000));
        assert_eq!(map.page_size(PageLevel(2)), None);
    }

    #[test]
    fn rejects_bad_chains() {
        assert!(GranularityMap::new(&[]).is_none());
        assert!(GranularityMap::new(&[0x1000, 0x1000]).is_none());
        assert!(GranularityMap::new(&[0x200000, 0x1000]).is_none());
        assert!(GranularityMap::new(&[0x1000, 0x3000]).is_none());
        assert!(GranularityMap::new(&[0x1000, 0x2000, 0x4000, 0x8000]).is_none());
    }

    #[test]
    fn levels_iterate_smallest_first() {
        let mut levels = GranularityMap::TDX.levels();
        assert_eq!(levels.next(), Some((PageLevel(0), X64_PAGE_SIZE)));
        assert_eq!(levels.next(), Some((PageLevel(1), X64_LARGE_PAGE_SIZE)));
        assert_eq!(levels.next(), None);
    }
}
