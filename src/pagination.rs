//! Page math for topic views.
//!
//! Ordinals and page indices are 1-based. Contract violations (ordinal 0,
//! page 0) panic: clamping would silently send a reader to the wrong page.

use std::num::NonZeroUsize;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Maximum number of posts rendered per page. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct PageSize(NonZeroUsize);

impl PageSize {
    pub fn new(size: usize) -> Option<Self> {
        NonZeroUsize::new(size).map(Self)
    }

    pub fn get(self) -> usize {
        self.0.get()
    }
}

impl TryFrom<usize> for PageSize {
    type Error = &'static str;

    fn try_from(size: usize) -> Result<Self, Self::Error> {
        Self::new(size).ok_or("page size must be positive")
    }
}

impl From<PageSize> for usize {
    fn from(size: PageSize) -> usize {
        size.get()
    }
}

/// Page that holds the item at `ordinal`.
///
/// # Panics
/// When `ordinal` is 0.
pub fn page_for_ordinal(ordinal: usize, page_size: PageSize) -> usize {
    assert!(ordinal >= 1, "ordinals are 1-based, got {ordinal}");
    ordinal.div_ceil(page_size.get())
}

/// Number of pages needed for `total` items. Zero items means zero pages.
pub fn total_pages(total: usize, page_size: PageSize) -> usize {
    total.div_ceil(page_size.get())
}

/// Inclusive ordinal range shown on `page`, clipped to `total`.
///
/// A page past the end yields an empty range rather than an error; the view
/// shows an empty page.
///
/// # Panics
/// When `page` is 0.
pub fn range_for_page(page: usize, page_size: PageSize, total: usize) -> RangeInclusive<usize> {
    assert!(page >= 1, "pages are 1-based, got {page}");
    let size = page_size.get();
    let start = (page - 1).saturating_mul(size).saturating_add(1);
    let end = page.saturating_mul(size).min(total);
    if start > end {
        return empty_range();
    }
    start..=end
}

#[allow(clippy::reversed_empty_ranges)]
fn empty_range() -> RangeInclusive<usize> {
    1..=0
}

/// Zero-based `(offset, limit)` for slicing storage by an ordinal range.
pub fn window(range: &RangeInclusive<usize>) -> (usize, usize) {
    if range.is_empty() {
        return (0, 0);
    }
    (range.start() - 1, range.end() - range.start() + 1)
}

/// Derived page metadata sent along with a page of posts. Recomputed per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PageDescriptor {
    pub page: usize,
    pub page_size: usize,
    pub total_items: usize,
    pub total_pages: usize,
}

impl PageDescriptor {
    pub fn new(page: usize, page_size: PageSize, total_items: usize) -> Self {
        Self {
            page,
            page_size: page_size.get(),
            total_items,
            total_pages: total_pages(total_items, page_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size(n: usize) -> PageSize {
        PageSize::new(n).unwrap()
    }

    #[test]
    fn zero_page_size_is_unrepresentable() {
        assert!(PageSize::new(0).is_none());
        assert!(serde_json::from_str::<PageSize>("0").is_err());
        assert_eq!(serde_json::from_str::<PageSize>("15").unwrap().get(), 15);
    }

    #[test]
    fn forty_five_posts_twenty_per_page() {
        let ps = size(20);
        assert_eq!(page_for_ordinal(1, ps), 1);
        assert_eq!(page_for_ordinal(20, ps), 1);
        assert_eq!(page_for_ordinal(21, ps), 2);
        assert_eq!(page_for_ordinal(45, ps), 3);
        assert_eq!(total_pages(45, ps), 3);

        assert_eq!(range_for_page(3, ps, 45), 41..=45);
        assert!(range_for_page(4, ps, 45).is_empty());
    }

    #[test]
    fn shifting_by_one_page_moves_one_page() {
        for s in 1..=12 {
            let ps = size(s);
            for ordinal in 1..=100 {
                assert_eq!(
                    page_for_ordinal(ordinal, ps),
                    page_for_ordinal(ordinal + s, ps) - 1,
                    "size={s} ordinal={ordinal}"
                );
            }
        }
    }

    #[test]
    fn ranges_tile_the_whole_sequence() {
        for s in 1..=9 {
            let ps = size(s);
            for total in 0..=60 {
                let pages = total_pages(total, ps);
                let mut covered = Vec::new();
                for page in 1..=pages {
                    let r = range_for_page(page, ps, total);
                    assert!(!r.is_empty());
                    assert!(r.clone().count() <= s);
                    covered.extend(r);
                }
                assert_eq!(covered, (1..=total).collect::<Vec<_>>(), "size={s} total={total}");
                assert!(range_for_page(pages + 1, ps, total).is_empty());
            }
        }
    }

    #[test]
    fn ordinal_lands_inside_its_page_range() {
        let ps = size(7);
        for ordinal in 1..=50 {
            let page = page_for_ordinal(ordinal, ps);
            assert!(range_for_page(page, ps, 50).contains(&ordinal));
        }
    }

    #[test]
    fn window_maps_to_offset_and_limit() {
        assert_eq!(window(&range_for_page(3, size(20), 45)), (40, 5));
        assert_eq!(window(&range_for_page(1, size(20), 0)), (0, 0));
        assert_eq!(window(&range_for_page(9, size(20), 45)), (0, 0));
    }

    #[test]
    fn huge_page_index_does_not_overflow() {
        assert!(range_for_page(usize::MAX, size(20), 45).is_empty());
    }

    #[test]
    #[should_panic(expected = "1-based")]
    fn ordinal_zero_is_a_contract_violation() {
        page_for_ordinal(0, size(20));
    }

    #[test]
    #[should_panic(expected = "1-based")]
    fn page_zero_is_a_contract_violation() {
        range_for_page(0, size(20), 45);
    }

    #[test]
    fn descriptor_counts_pages() {
        let d = PageDescriptor::new(2, size(20), 45);
        assert_eq!(d.total_pages, 3);
        assert_eq!(d.page_size, 20);
    }
}
