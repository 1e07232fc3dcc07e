//! Log pages
//!
//! A page is the unit of buffering, sealing and persistence. Each page holds
//! a dense, append-only run of documents together with three indexes built
//! at append time:
//! - a trigram index mapping packed ASCII trigrams to doc-id bitmaps
//! - a level index mapping severity codes to doc-id bitmaps
//! - a bloom filter over trace ids

mod bloom;
mod codec;

pub use bloom::BloomFilter;
pub use codec::{PageCodec, PageHeader, HEADER_SIZE, PAGE_MAGIC, TRAILER_SIZE};

use crate::pool::AppendOnlyPage;
use crate::{Document, Lsn, TimeRange, Timestamp};
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Timestamp of a page that has no documents yet
pub const TS_UNSET: Timestamp = -1;

/// `max_doc_id` of a page that has no documents yet
pub const NO_DOC_ID: i32 = -1;

/// Page limits and index sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageConfig {
    /// Seal once `ts_end - ts_start` reaches this many milliseconds
    pub max_range_ms: i64,
    /// Seal once the estimated encoded size reaches this many bytes
    pub max_page_bytes: usize,
    /// Expected documents per page, used to size the bloom filter
    pub expected_docs: usize,
    /// Bloom filter bits per expected document
    pub bloom_bits_per_key: usize,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            max_range_ms: crate::config::PAGE_MAX_RANGE_MS,
            max_page_bytes: crate::config::PAGE_MAX_BYTES,
            expected_docs: crate::config::PAGE_EXPECTED_DOCS,
            bloom_bits_per_key: crate::config::BLOOM_BITS_PER_KEY,
        }
    }
}

/// Mutable, append-only page of log documents
#[derive(Debug, Clone)]
pub struct Page {
    ts_start: Timestamp,
    ts_end: Timestamp,
    max_doc_id: i32,
    trigram_index: BTreeMap<i32, RoaringBitmap>,
    level_index: BTreeMap<i32, RoaringBitmap>,
    trace_bloom: BloomFilter,
    docs: Vec<Document>,

    // Not persisted
    max_lsn: Lsn,
    approx_bytes: usize,
    max_range_ms: i64,
    max_page_bytes: usize,
}

impl Page {
    /// Create an empty page
    pub fn new(config: &PageConfig) -> Self {
        Self {
            ts_start: TS_UNSET,
            ts_end: TS_UNSET,
            max_doc_id: NO_DOC_ID,
            trigram_index: BTreeMap::new(),
            level_index: BTreeMap::new(),
            trace_bloom: BloomFilter::new(config.expected_docs, config.bloom_bits_per_key),
            docs: Vec::new(),
            max_lsn: Lsn::ZERO,
            approx_bytes: HEADER_SIZE + TRAILER_SIZE,
            max_range_ms: config.max_range_ms,
            max_page_bytes: config.max_page_bytes,
        }
    }

    /// Rebuild a sealed page from decoded parts
    pub(crate) fn from_parts(
        ts_start: Timestamp,
        ts_end: Timestamp,
        trigram_index: BTreeMap<i32, RoaringBitmap>,
        level_index: BTreeMap<i32, RoaringBitmap>,
        trace_bloom: BloomFilter,
        docs: Vec<Document>,
        encoded_len: usize,
    ) -> Self {
        let defaults = PageConfig::default();
        Self {
            ts_start,
            ts_end,
            max_doc_id: docs.len() as i32 - 1,
            trigram_index,
            level_index,
            trace_bloom,
            docs,
            max_lsn: Lsn::ZERO,
            approx_bytes: encoded_len,
            max_range_ms: defaults.max_range_ms,
            max_page_bytes: defaults.max_page_bytes,
        }
    }

    /// Append a document, returning its doc-id
    pub fn append(&mut self, doc: Document) -> i32 {
        let doc_id = self.max_doc_id + 1;
        let bit = doc_id as u32;

        if self.ts_start == TS_UNSET || doc.ts_millis < self.ts_start {
            self.ts_start = doc.ts_millis;
        }
        if self.ts_end == TS_UNSET || doc.ts_millis > self.ts_end {
            self.ts_end = doc.ts_millis;
        }

        if let Some(trace_id) = &doc.trace_id {
            self.trace_bloom.insert(trace_id);
        }
        self.level_index.entry(doc.level).or_default().insert(bit);
        for key in ascii_trigrams(&doc.body) {
            self.trigram_index.entry(key).or_default().insert(bit);
        }

        // size table slot + payload
        self.approx_bytes += 4 + doc.size();
        self.docs.push(doc);
        self.max_doc_id = doc_id;
        doc_id
    }

    /// Earliest document timestamp, or [`TS_UNSET`]
    pub fn ts_start(&self) -> Timestamp {
        self.ts_start
    }

    /// Latest document timestamp, or [`TS_UNSET`]
    pub fn ts_end(&self) -> Timestamp {
        self.ts_end
    }

    /// Highest assigned doc-id, or [`NO_DOC_ID`]
    pub fn max_doc_id(&self) -> i32 {
        self.max_doc_id
    }

    pub fn doc_count(&self) -> usize {
        self.docs.len()
    }

    pub fn docs(&self) -> &[Document] {
        &self.docs
    }

    pub fn doc(&self, doc_id: u32) -> Option<&Document> {
        self.docs.get(doc_id as usize)
    }

    pub fn trigram_index(&self) -> &BTreeMap<i32, RoaringBitmap> {
        &self.trigram_index
    }

    pub fn level_index(&self) -> &BTreeMap<i32, RoaringBitmap> {
        &self.level_index
    }

    pub fn trace_bloom(&self) -> &BloomFilter {
        &self.trace_bloom
    }

    /// Doc-ids carrying the given severity
    pub fn level_bitmap(&self, level: i32) -> Option<&RoaringBitmap> {
        self.level_index.get(&level)
    }

    /// Every doc-id in the page
    pub fn all_doc_ids(&self) -> RoaringBitmap {
        let mut bm = RoaringBitmap::new();
        if self.max_doc_id >= 0 {
            bm.insert_range(0..=self.max_doc_id as u32);
        }
        bm
    }

    pub fn maybe_contains_level(&self, level: i32) -> bool {
        self.level_index.contains_key(&level)
    }

    pub fn maybe_contains_trigram(&self, key: i32) -> bool {
        self.trigram_index.contains_key(&key)
    }

    /// Bloom check: `false` means the trace id was never appended
    pub fn maybe_contains_trace(&self, trace_id: &str) -> bool {
        self.trace_bloom.may_contain(trace_id)
    }
}

impl AppendOnlyPage for Page {
    type Record = Document;

    fn append(&mut self, record: Document) {
        Page::append(self, record);
    }

    fn is_full(&self) -> bool {
        if self.docs.is_empty() {
            return false;
        }
        let size_full = self.approx_bytes >= self.max_page_bytes;
        let time_full = self.ts_end - self.ts_start >= self.max_range_ms;
        size_full || time_full
    }

    fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    fn range(&self) -> Option<TimeRange> {
        if self.docs.is_empty() {
            None
        } else {
            Some(TimeRange::new(self.ts_start, self.ts_end))
        }
    }

    fn max_lsn(&self) -> Lsn {
        self.max_lsn
    }

    fn update_lsn(&mut self, lsn: Lsn) {
        self.max_lsn = self.max_lsn.max(lsn);
    }

    fn approx_bytes(&self) -> usize {
        self.approx_bytes
    }
}

/// Pack three 7-bit ASCII characters into a 21-bit trigram key
pub fn trigram_key(c0: u8, c1: u8, c2: u8) -> i32 {
    (c0 & 0x7f) as i32 | (((c1 & 0x7f) as i32) << 7) | (((c2 & 0x7f) as i32) << 14)
}

/// Trigram keys of every all-ASCII 3-character window in `text`.
///
/// Windows touching a non-ASCII character are skipped. A window over UTF-8
/// bytes is all-ASCII exactly when it covers three ASCII characters, so
/// sliding over bytes gives the same keys as sliding over characters.
pub fn ascii_trigrams(text: &str) -> impl Iterator<Item = i32> + '_ {
    text.as_bytes()
        .windows(3)
        .filter(|w| w.iter().all(|b| b.is_ascii()))
        .map(|w| trigram_key(w[0], w[1], w[2]))
}
