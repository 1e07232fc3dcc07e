//! Binary page format
//!
//! Layout (big-endian):
//! - `[0:8)` tsStart, `[8:16)` tsEnd, `[16:20)` maxDocId
//! - `[20:36)` lengths of the trigram, level, bloom and docs sections
//! - `[36:60)` six reserved int32 slots, written as zero
//! - `[60:80)` reserved, starting with the ASCII magic `LPv1`
//! - trigram section: repeated `{key:i32, len:i32, roaring bitmap}`
//! - level section: repeated `{level:i32, len:i32, roaring bitmap}`
//! - bloom section: `{len:i32, bloom filter}`
//! - docs section: `{count:i32, sizes:i32[count], encoded docs}`
//! - trailer: CRC32 of every preceding byte

use super::{BloomFilter, Page};
use crate::{Document, LogsError, Result, Timestamp};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use roaring::RoaringBitmap;
use std::collections::BTreeMap;

/// Fixed header size in bytes
pub const HEADER_SIZE: usize = 80;

/// CRC32 trailer size in bytes
pub const TRAILER_SIZE: usize = 4;

/// Magic stored at the start of the reserved header area
pub const PAGE_MAGIC: &[u8; 4] = b"LPv1";

const MAGIC_OFFSET: usize = 60;

/// Decoded fixed-size page header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub ts_start: Timestamp,
    pub ts_end: Timestamp,
    pub max_doc_id: i32,
    pub trigram_len: usize,
    pub level_len: usize,
    pub bloom_len: usize,
    pub docs_len: usize,
}

impl PageHeader {
    /// Parse the header from the first [`HEADER_SIZE`] bytes of a page
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(LogsError::TruncatedRead {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        if &bytes[MAGIC_OFFSET..MAGIC_OFFSET + 4] != PAGE_MAGIC {
            return Err(LogsError::InvalidFormat("Invalid page magic".into()));
        }

        let mut cursor = &bytes[..HEADER_SIZE];
        let ts_start = cursor.get_i64();
        let ts_end = cursor.get_i64();
        let max_doc_id = cursor.get_i32();
        let trigram_len = section_len(cursor.get_i32(), "trigram")?;
        let level_len = section_len(cursor.get_i32(), "level")?;
        let bloom_len = section_len(cursor.get_i32(), "bloom")?;
        let docs_len = section_len(cursor.get_i32(), "docs")?;

        Ok(Self {
            ts_start,
            ts_end,
            max_doc_id,
            trigram_len,
            level_len,
            bloom_len,
            docs_len,
        })
    }

    /// Length of the whole encoded page including header and trailer
    pub fn total_len(&self) -> usize {
        HEADER_SIZE
            + self.trigram_len
            + self.level_len
            + self.bloom_len
            + self.docs_len
            + TRAILER_SIZE
    }
}

/// Page serializer / deserializer
pub struct PageCodec;

impl PageCodec {
    /// Encode a page
    pub fn encode(page: &Page) -> Result<Bytes> {
        let trigrams = encode_bitmap_map(page.trigram_index())?;
        let levels = encode_bitmap_map(page.level_index())?;
        let bloom = encode_bloom(page.trace_bloom());
        let docs = encode_docs(page.docs())?;

        let mut buf = BytesMut::with_capacity(
            HEADER_SIZE + trigrams.len() + levels.len() + bloom.len() + docs.len() + TRAILER_SIZE,
        );

        // Header
        buf.put_i64(page.ts_start());
        buf.put_i64(page.ts_end());
        buf.put_i32(page.max_doc_id());
        buf.put_i32(trigrams.len() as i32);
        buf.put_i32(levels.len() as i32);
        buf.put_i32(bloom.len() as i32);
        buf.put_i32(docs.len() as i32);
        for _ in 0..6 {
            buf.put_i32(0);
        }
        let mut reserved = [0u8; 20];
        reserved[..4].copy_from_slice(PAGE_MAGIC);
        buf.put_slice(&reserved);

        // Sections
        buf.put_slice(&trigrams);
        buf.put_slice(&levels);
        buf.put_slice(&bloom);
        buf.put_slice(&docs);

        let checksum = crc32fast::hash(&buf);
        buf.put_u32(checksum);

        Ok(buf.freeze())
    }

    /// Decode a page, verifying the CRC32 trailer first
    pub fn decode(bytes: &[u8]) -> Result<Page> {
        if bytes.len() < HEADER_SIZE + TRAILER_SIZE {
            return Err(LogsError::TruncatedRead {
                expected: HEADER_SIZE + TRAILER_SIZE,
                actual: bytes.len(),
            });
        }

        let crc_offset = bytes.len() - TRAILER_SIZE;
        let expected = (&bytes[crc_offset..]).get_u32();
        let actual = crc32fast::hash(&bytes[..crc_offset]);
        if expected != actual {
            return Err(LogsError::Integrity { expected, actual });
        }

        let header = PageHeader::parse(bytes)?;
        if header.total_len() != bytes.len() {
            return Err(LogsError::InvalidFormat(format!(
                "Page sections sum to {} bytes but page is {}",
                header.total_len(),
                bytes.len()
            )));
        }

        let mut pos = HEADER_SIZE;
        let trigram_sec = &bytes[pos..pos + header.trigram_len];
        pos += header.trigram_len;
        let level_sec = &bytes[pos..pos + header.level_len];
        pos += header.level_len;
        let bloom_sec = &bytes[pos..pos + header.bloom_len];
        pos += header.bloom_len;
        let docs_sec = &bytes[pos..pos + header.docs_len];

        let trigram_index = decode_bitmap_map(trigram_sec)?;
        let level_index = decode_bitmap_map(level_sec)?;
        let trace_bloom = decode_bloom(bloom_sec)?;
        let docs = decode_docs(docs_sec)?;

        if docs.len() as i64 != header.max_doc_id as i64 + 1 {
            return Err(LogsError::InvalidFormat(format!(
                "maxDocId {} does not match {} documents",
                header.max_doc_id,
                docs.len()
            )));
        }
        let doc_count = docs.len() as u64;
        let dangling = trigram_index
            .values()
            .chain(level_index.values())
            .any(|bm| bm.max().map_or(false, |id| id as u64 >= doc_count));
        if dangling {
            return Err(LogsError::InvalidFormat(
                "Index bitmap references a missing document".into(),
            ));
        }

        Ok(Page::from_parts(
            header.ts_start,
            header.ts_end,
            trigram_index,
            level_index,
            trace_bloom,
            docs,
            bytes.len(),
        ))
    }
}

fn section_len(raw: i32, name: &str) -> Result<usize> {
    usize::try_from(raw)
        .map_err(|_| LogsError::InvalidFormat(format!("Negative {} section length", name)))
}

fn encode_bitmap_map(map: &BTreeMap<i32, RoaringBitmap>) -> Result<BytesMut> {
    let mut buf = BytesMut::new();
    let mut scratch = Vec::new();
    for (key, bitmap) in map {
        scratch.clear();
        bitmap.serialize_into(&mut scratch)?;
        buf.put_i32(*key);
        buf.put_i32(scratch.len() as i32);
        buf.put_slice(&scratch);
    }
    Ok(buf)
}

fn decode_bitmap_map(mut sec: &[u8]) -> Result<BTreeMap<i32, RoaringBitmap>> {
    let mut map = BTreeMap::new();
    while sec.has_remaining() {
        let key = read_i32(&mut sec)?;
        let len = read_len(&mut sec)?;
        let raw = take(&mut sec, len)?;
        let bitmap = RoaringBitmap::deserialize_from(raw)
            .map_err(|e| LogsError::InvalidFormat(format!("Bad bitmap for key {}: {}", key, e)))?;
        map.insert(key, bitmap);
    }
    Ok(map)
}

fn encode_bloom(bloom: &BloomFilter) -> BytesMut {
    let payload = bloom.to_bytes();
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_i32(payload.len() as i32);
    buf.put_slice(&payload);
    buf
}

fn decode_bloom(mut sec: &[u8]) -> Result<BloomFilter> {
    let len = read_len(&mut sec)?;
    let payload = take(&mut sec, len)?;
    BloomFilter::from_bytes(payload)
}

fn encode_docs(docs: &[Document]) -> Result<BytesMut> {
    let encoded = docs
        .iter()
        .map(|doc| bincode::serialize(doc).map_err(|e| LogsError::InvalidFormat(e.to_string())))
        .collect::<Result<Vec<_>>>()?;

    let payload_len: usize = encoded.iter().map(Vec::len).sum();
    let mut buf = BytesMut::with_capacity(4 + 4 * encoded.len() + payload_len);
    buf.put_i32(encoded.len() as i32);
    for doc in &encoded {
        buf.put_i32(doc.len() as i32);
    }
    for doc in &encoded {
        buf.put_slice(doc);
    }
    Ok(buf)
}

fn decode_docs(mut sec: &[u8]) -> Result<Vec<Document>> {
    let count = read_len(&mut sec)?;
    let sizes = (0..count)
        .map(|_| read_len(&mut sec))
        .collect::<Result<Vec<_>>>()?;

    let mut docs = Vec::with_capacity(count);
    for size in sizes {
        let raw = take(&mut sec, size)?;
        let doc: Document = bincode::deserialize(raw)
            .map_err(|e| LogsError::InvalidFormat(format!("Bad document: {}", e)))?;
        docs.push(doc);
    }
    if sec.has_remaining() {
        return Err(LogsError::InvalidFormat(format!(
            "{} trailing bytes after documents",
            sec.remaining()
        )));
    }
    Ok(docs)
}

fn take<'a>(buf: &mut &'a [u8], len: usize) -> Result<&'a [u8]> {
    if buf.len() < len {
        return Err(LogsError::TruncatedRead {
            expected: len,
            actual: buf.len(),
        });
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

fn read_i32(buf: &mut &[u8]) -> Result<i32> {
    let mut raw = take(buf, 4)?;
    Ok(raw.get_i32())
}

fn read_len(buf: &mut &[u8]) -> Result<usize> {
    let raw = read_i32(buf)?;
    usize::try_from(raw).map_err(|_| LogsError::InvalidFormat(format!("Negative length {}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{ascii_trigrams, PageConfig, NO_DOC_ID, TS_UNSET};

    fn sample_page(n: usize) -> Page {
        let mut page = Page::new(&PageConfig::default());
        for i in 0..n {
            let mut doc = Document::new(1_000 + i as i64, [10, 20, 30][i % 3], format!("request {} failed with code {}", i, i * 7));
            if i % 2 == 0 {
                doc = doc.with_trace(format!("trace-{}", i / 4));
            }
            page.append(doc);
        }
        page
    }

    fn assert_same_shape(a: &Page, b: &Page) {
        assert_eq!(a.ts_start(), b.ts_start());
        assert_eq!(a.ts_end(), b.ts_end());
        assert_eq!(a.max_doc_id(), b.max_doc_id());
        assert_eq!(a.doc_count(), b.doc_count());
        assert_eq!(
            a.level_index().keys().collect::<Vec<_>>(),
            b.level_index().keys().collect::<Vec<_>>()
        );
        assert_eq!(a.trigram_index().len(), b.trigram_index().len());
    }

    #[test]
    fn test_round_trip() {
        for n in [0, 1, 2, 17, 250] {
            let page = sample_page(n);
            let bytes = PageCodec::encode(&page).unwrap();
            let decoded = PageCodec::decode(&bytes).unwrap();
            assert_same_shape(&page, &decoded);
            assert_eq!(page.docs(), decoded.docs());
            assert_eq!(page.level_index(), decoded.level_index());
            assert_eq!(page.trigram_index(), decoded.trigram_index());
        }
    }

    #[test]
    fn test_empty_page_keeps_sentinels() {
        let page = Page::new(&PageConfig::default());
        let decoded = PageCodec::decode(&PageCodec::encode(&page).unwrap()).unwrap();
        assert_eq!(decoded.ts_start(), TS_UNSET);
        assert_eq!(decoded.ts_end(), TS_UNSET);
        assert_eq!(decoded.max_doc_id(), NO_DOC_ID);
        assert_eq!(decoded.doc_count(), 0);
    }

    #[test]
    fn test_decoded_indexes_answer_like_source_page() {
        let mut page = Page::new(&PageConfig::default());
        page.append(Document::new(10, 10, "log body").with_trace("trace-a"));
        page.append(Document::new(11, 20, "lol body").with_trace("trace-b"));

        let decoded = PageCodec::decode(&PageCodec::encode(&page).unwrap()).unwrap();
        assert!(decoded.maybe_contains_level(10));
        assert!(decoded.maybe_contains_level(20));
        assert!(!decoded.maybe_contains_level(30));
        assert!(decoded.maybe_contains_trace("trace-a"));
        assert!(decoded.maybe_contains_trace("trace-b"));
        for tri in ascii_trigrams("log body").chain(ascii_trigrams("lol body")) {
            assert!(decoded.maybe_contains_trigram(tri));
        }
    }

    #[test]
    fn test_header_layout() {
        let page = sample_page(3);
        let bytes = PageCodec::encode(&page).unwrap();

        assert_eq!(&bytes[60..64], b"LPv1");
        assert!(bytes[36..60].iter().all(|b| *b == 0));
        assert!(bytes[64..80].iter().all(|b| *b == 0));

        let header = PageHeader::parse(&bytes).unwrap();
        assert_eq!(header.ts_start, 1_000);
        assert_eq!(header.ts_end, 1_002);
        assert_eq!(header.max_doc_id, 2);
        assert_eq!(header.total_len(), bytes.len());
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let page = sample_page(40);
        let a = PageCodec::encode(&page).unwrap();
        let b = PageCodec::encode(&page.clone()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_any_flipped_byte_is_detected() {
        let bytes = PageCodec::encode(&sample_page(5)).unwrap().to_vec();
        for i in 0..bytes.len() - TRAILER_SIZE {
            let mut tampered = bytes.clone();
            tampered[i] ^= 0x01;
            let err = PageCodec::decode(&tampered).unwrap_err();
            assert!(
                matches!(err, LogsError::Integrity { .. }),
                "byte {} produced {:?}",
                i,
                err
            );
        }
    }

    #[test]
    fn test_truncated_page_is_rejected() {
        let bytes = PageCodec::encode(&sample_page(2)).unwrap();
        let err = PageCodec::decode(&bytes[..40]).unwrap_err();
        assert!(matches!(err, LogsError::TruncatedRead { .. }));
    }
}
