//! Two-phase filter evaluation over a page
//!
//! Phase one narrows the candidate doc-ids with the page's level bitmaps and
//! trace bloom filter. Phase two checks every surviving candidate against the
//! full predicate, so results are exact however coarse the narrowing was.

use super::Filter;
use crate::page::Page;
use crate::Document;
use roaring::RoaringBitmap;

/// Filter evaluator
pub struct FilterEvaluator;

impl FilterEvaluator {
    /// Documents of `page` matching `filter`, in doc-id order
    pub fn apply(page: &Page, filter: &Filter) -> Vec<Document> {
        Self::matching_ids(page, filter)
            .iter()
            .filter_map(|id| page.doc(id))
            .cloned()
            .collect()
    }

    /// Doc-ids of `page` matching `filter`
    pub fn matching_ids(page: &Page, filter: &Filter) -> RoaringBitmap {
        Self::candidates(page, filter, &page.all_doc_ids())
            .iter()
            .filter(|id| page.doc(*id).map_or(false, |doc| filter.matches(doc)))
            .collect()
    }

    /// Phase one: a superset of the matching doc-ids
    pub fn candidates(page: &Page, filter: &Filter, within: &RoaringBitmap) -> RoaringBitmap {
        match filter {
            Filter::Level(code) => match page.level_bitmap(*code) {
                Some(bm) => within & bm,
                None => RoaringBitmap::new(),
            },
            Filter::Trace(id) => {
                if !page.maybe_contains_trace(id) {
                    return RoaringBitmap::new();
                }
                // Bloom only rules out; confirm by scanning
                let exact: RoaringBitmap = page
                    .docs()
                    .iter()
                    .enumerate()
                    .filter(|(_, doc)| doc.trace_id.as_deref() == Some(id.as_str()))
                    .map(|(i, _)| i as u32)
                    .collect();
                within & exact
            }
            // No trigram narrowing
            Filter::Regex(_) => within.clone(),
            Filter::And(left, right) => {
                let left = Self::candidates(page, left, within);
                if left.is_empty() {
                    return left;
                }
                left & Self::candidates(page, right, within)
            }
            Filter::Or(left, right) => {
                Self::candidates(page, left, within) | Self::candidates(page, right, within)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageConfig;

    /// Trace A: five docs, levels 20,10,30,20,20
    /// Trace B: five docs, levels 20,40,30,40,20; two bodies say "failed"
    fn fixture() -> Page {
        let mut page = Page::new(&PageConfig::default());
        let a_levels = [20, 10, 30, 20, 20];
        for (i, level) in a_levels.iter().enumerate() {
            page.append(Document::new(i as i64, *level, format!("A doc {}", i)).with_trace("A"));
        }
        let b = [
            (20, "B ok"),
            (40, "B request failed"),
            (30, "B retrying"),
            (40, "B job failed again"),
            (20, "B done"),
        ];
        for (i, (level, body)) in b.iter().enumerate() {
            page.append(Document::new(5 + i as i64, *level, *body).with_trace("B"));
        }
        page
    }

    fn count(page: &Page, filter: Filter) -> usize {
        FilterEvaluator::apply(page, &filter).len()
    }

    #[test]
    fn test_filter_fixture() {
        let page = fixture();
        assert_eq!(count(&page, Filter::level(30)), 2);
        assert_eq!(count(&page, Filter::trace("A")), 5);
        assert_eq!(count(&page, Filter::regex("failed").unwrap()), 2);
        assert_eq!(
            count(&page, Filter::and(Filter::trace("A"), Filter::level(20))),
            3
        );
        assert_eq!(
            count(&page, Filter::or(Filter::level(40), Filter::level(10))),
            3
        );
    }

    #[test]
    fn test_results_keep_doc_order() {
        let page = fixture();
        let docs = FilterEvaluator::apply(&page, &Filter::level(20));
        let times: Vec<_> = docs.iter().map(|d| d.ts_millis).collect();
        assert_eq!(times, vec![0, 3, 4, 5, 9]);
    }

    #[test]
    fn test_unknown_values_match_nothing() {
        let page = fixture();
        assert_eq!(count(&page, Filter::level(99)), 0);
        assert_eq!(count(&page, Filter::trace("C")), 0);
        assert_eq!(count(&page, Filter::regex("^never$").unwrap()), 0);
    }

    #[test]
    fn test_narrowing_is_a_superset() {
        let page = fixture();
        let all = page.all_doc_ids();
        let filter = Filter::and(Filter::regex("failed").unwrap(), Filter::level(40));
        let narrowed = FilterEvaluator::candidates(&page, &filter, &all);
        let exact = FilterEvaluator::matching_ids(&page, &filter);
        assert_eq!(narrowed.len(), 2);
        assert!(exact.is_subset(&narrowed));
        assert_eq!(exact.iter().collect::<Vec<_>>(), vec![6, 8]);
    }

    #[test]
    fn test_empty_page() {
        let page = Page::new(&PageConfig::default());
        assert!(FilterEvaluator::apply(&page, &Filter::regex(".*").unwrap()).is_empty());
    }
}
