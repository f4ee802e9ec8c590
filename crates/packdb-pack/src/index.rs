//! Pack index (v2) decoding and lookup.
//!
//! The index maps object ids to byte offsets in its pack using a fan-out
//! table and binary search:
//!
//! ```text
//! Header:  \xff tOc (4 bytes) | version (4 bytes = 2)
//! Fanout:  256 × 4-byte big-endian cumulative first-byte counts
//! Ids:     N × 20-byte sorted object ids
//! CRC32:   N × 4-byte CRC32 values
//! Offsets: N × 4-byte offsets (high bit set → index into 64-bit table)
//! 64-bit:  M × 8-byte offsets (packs over 2 GiB)
//! Trailer: 20-byte pack checksum | 20-byte index checksum
//! ```
//!
//! Only the fanout is held in memory; the other tables are read through the
//! mapped file on demand.

use std::path::Path;

use memmap2::Mmap;
use packdb_hash::ObjectId;

use crate::io::ReadAt;
use crate::{PackError, IDX_SIGNATURE, IDX_VERSION};

const FANOUT_OFFSET: u64 = 8;
const FANOUT_LEN: u64 = 256 * 4;
const TRAILER_LEN: u64 = 40;
const OID_LEN: u64 = ObjectId::RAW_LEN as u64;

/// A single resolved index row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub id: ObjectId,
    pub pack_offset: u64,
    pub crc32: u32,
}

/// A decoded pack index (v2) providing id → pack offset lookup.
pub struct PackIndex {
    reader: Box<dyn ReadAt>,
    version: u32,
    num_objects: u32,
    fanout: [u32; 256],
    /// Byte offset where the sorted ids start.
    oid_offset: u64,
    /// Byte offset where the CRC32 column starts.
    crc_offset: u64,
    /// Byte offset where the 32-bit offsets start.
    offset32_offset: u64,
    /// Byte offset where the 64-bit offsets start.
    offset64_offset: u64,
    /// Number of entries in the 64-bit offset table.
    offset64_count: u64,
}

impl std::fmt::Debug for PackIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackIndex")
            .field("version", &self.version)
            .field("num_objects", &self.num_objects)
            .finish()
    }
}

impl PackIndex {
    /// Open and decode an index file.
    pub fn open(idx_path: impl AsRef<Path>) -> Result<Self, PackError> {
        let idx_path = idx_path.as_ref();
        let file = std::fs::File::open(idx_path)?;
        let data = unsafe { Mmap::map(&file)? };
        Self::from_reader(Box::new(data)).map_err(|err| match err {
            PackError::MalformedIndex(reason) => {
                PackError::MalformedIndex(format!("{}: {reason}", idx_path.display()))
            }
            other => other,
        })
    }

    /// Decode an index from any random-access source.
    pub fn from_reader(reader: Box<dyn ReadAt>) -> Result<Self, PackError> {
        let size = reader.size();
        let min_size = FANOUT_OFFSET + FANOUT_LEN + TRAILER_LEN;
        if size < min_size {
            return Err(PackError::MalformedIndex(format!(
                "file too small: {size} < {min_size}"
            )));
        }

        let mut magic = [0u8; 4];
        reader.read_exact_at(0, &mut magic)?;
        if magic != IDX_SIGNATURE {
            return Err(PackError::MalformedIndex("bad signature".into()));
        }
        let version = reader.read_u32_be(4)?;
        if version != IDX_VERSION {
            return Err(PackError::UnsupportedIndexVersion(version));
        }

        let mut fanout = [0u32; 256];
        let mut prev = 0u32;
        for (i, slot) in fanout.iter_mut().enumerate() {
            let count = reader.read_u32_be(FANOUT_OFFSET + i as u64 * 4)?;
            if count < prev {
                return Err(PackError::MalformedIndex(format!(
                    "fanout entry {i} decreases: {count} < {prev}"
                )));
            }
            *slot = count;
            prev = count;
        }
        let num_objects = fanout[255];

        let n = num_objects as u64;
        let oid_offset = FANOUT_OFFSET + FANOUT_LEN;
        let crc_offset = oid_offset + n * OID_LEN;
        let offset32_offset = crc_offset + n * 4;
        let offset64_offset = offset32_offset + n * 4;

        if size < offset64_offset + TRAILER_LEN {
            return Err(PackError::MalformedIndex(format!(
                "truncated tables: {size} < {}",
                offset64_offset + TRAILER_LEN
            )));
        }
        let offset64_count = (size - TRAILER_LEN - offset64_offset) / 8;

        Ok(Self {
            reader,
            version,
            num_objects,
            fanout,
            oid_offset,
            crc_offset,
            offset32_offset,
            offset64_offset,
            offset64_count,
        })
    }

    /// Look up an id, returning its row or [`PackError::NotFound`].
    ///
    /// The fan-out table narrows the candidate range to one first-byte
    /// bucket; a binary search over the sorted id column does the rest.
    pub fn entry(&self, id: &ObjectId) -> Result<IndexEntry, PackError> {
        let (mut lo, mut hi) = self.fanout_range(id.first_byte());

        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let mid_id = self.read_oid(mid)?;
            match mid_id.as_bytes().cmp(id.as_bytes()) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => {
                    return Ok(IndexEntry {
                        id: *id,
                        pack_offset: self.read_pack_offset(mid)?,
                        crc32: self.reader.read_u32_be(self.crc_offset + mid * 4)?,
                    });
                }
            }
        }
        Err(PackError::NotFound(*id))
    }

    /// Total number of objects in this index.
    pub fn num_objects(&self) -> u32 {
        self.num_objects
    }

    /// Index format version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Number of objects whose id starts with `first_byte`.
    pub fn bucket_len(&self, first_byte: u8) -> u32 {
        let (lo, hi) = self.fanout_range(first_byte);
        (hi - lo) as u32
    }

    /// The id at the given position in the sorted id column.
    pub fn oid_at_index(&self, index: u32) -> Result<ObjectId, PackError> {
        self.check_index(index)?;
        self.read_oid(index as u64)
    }

    /// The pack offset at the given position in the sorted id column.
    pub fn offset_at_index(&self, index: u32) -> Result<u64, PackError> {
        self.check_index(index)?;
        self.read_pack_offset(index as u64)
    }

    /// The CRC32 at the given position in the sorted id column.
    pub fn crc32_at_index(&self, index: u32) -> Result<u32, PackError> {
        self.check_index(index)?;
        Ok(self.reader.read_u32_be(self.crc_offset + index as u64 * 4)?)
    }

    /// Pack checksum stored in the trailer. Never verified here.
    pub fn pack_checksum(&self) -> Result<ObjectId, PackError> {
        self.read_trailer_oid(self.reader.size() - 2 * OID_LEN)
    }

    /// Checksum of the index file itself, from the trailer. Never verified
    /// here.
    pub fn index_checksum(&self) -> Result<ObjectId, PackError> {
        self.read_trailer_oid(self.reader.size() - OID_LEN)
    }

    /// Iterate over `(id, pack_offset)` pairs in sorted id order.
    pub fn iter(&self) -> PackIndexIter<'_> {
        PackIndexIter { index: self, pos: 0 }
    }

    /// Candidate range `[lo, hi)` in the sorted id column for a first byte.
    fn fanout_range(&self, first_byte: u8) -> (u64, u64) {
        let hi = self.fanout[first_byte as usize] as u64;
        let lo = match first_byte {
            0 => 0,
            b => self.fanout[b as usize - 1] as u64,
        };
        (lo, hi)
    }

    fn check_index(&self, index: u32) -> Result<(), PackError> {
        if index >= self.num_objects {
            return Err(PackError::MalformedIndex(format!(
                "entry {index} out of range (N = {})",
                self.num_objects
            )));
        }
        Ok(())
    }

    fn read_oid(&self, pos: u64) -> Result<ObjectId, PackError> {
        let mut raw = [0u8; ObjectId::RAW_LEN];
        self.reader
            .read_exact_at(self.oid_offset + pos * OID_LEN, &mut raw)?;
        Ok(ObjectId::from_raw(raw))
    }

    fn read_trailer_oid(&self, offset: u64) -> Result<ObjectId, PackError> {
        let mut raw = [0u8; ObjectId::RAW_LEN];
        self.reader.read_exact_at(offset, &mut raw)?;
        Ok(ObjectId::from_raw(raw))
    }

    /// Decode the offset column entry at `pos`, following the high-bit
    /// escape into the 64-bit table when set.
    fn read_pack_offset(&self, pos: u64) -> Result<u64, PackError> {
        let short = self.reader.read_u32_be(self.offset32_offset + pos * 4)?;
        if short & 0x8000_0000 == 0 {
            return Ok(short as u64);
        }
        let large_index = (short & 0x7fff_ffff) as u64;
        if large_index >= self.offset64_count {
            return Err(PackError::MalformedIndex(format!(
                "64-bit offset index {large_index} out of range (table holds {})",
                self.offset64_count
            )));
        }
        Ok(self
            .reader
            .read_u64_be(self.offset64_offset + large_index * 8)?)
    }
}

/// Iterator over `(id, pack_offset)` pairs in a pack index.
pub struct PackIndexIter<'a> {
    index: &'a PackIndex,
    pos: u32,
}

impl Iterator for PackIndexIter<'_> {
    type Item = Result<(ObjectId, u64), PackError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.index.num_objects {
            return None;
        }
        let pos = self.pos as u64;
        self.pos += 1;
        let row = self
            .index
            .read_oid(pos)
            .and_then(|id| Ok((id, self.index.read_pack_offset(pos)?)));
        Some(row)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.index.num_objects - self.pos) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PackIndexIter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use packdb_hash::Hasher;

    /// Build a synthetic v2 index image in memory.
    fn build_index(entries: &[(ObjectId, u64, u32)]) -> Vec<u8> {
        let mut sorted: Vec<_> = entries.to_vec();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        let mut buf = Vec::new();
        buf.extend_from_slice(&IDX_SIGNATURE);
        buf.extend_from_slice(&IDX_VERSION.to_be_bytes());

        let mut fanout = [0u32; 256];
        for (id, _, _) in &sorted {
            fanout[id.first_byte() as usize] += 1;
        }
        for i in 1..256 {
            fanout[i] += fanout[i - 1];
        }
        for count in fanout {
            buf.extend_from_slice(&count.to_be_bytes());
        }

        for (id, _, _) in &sorted {
            buf.extend_from_slice(id.as_bytes());
        }
        for (_, _, crc) in &sorted {
            buf.extend_from_slice(&crc.to_be_bytes());
        }

        // 32-bit offsets, escaping to the 64-bit table where necessary.
        let mut large = Vec::new();
        for (_, offset, _) in &sorted {
            if *offset <= u64::from(u32::MAX >> 1) {
                buf.extend_from_slice(&(*offset as u32).to_be_bytes());
            } else {
                let escape = 0x8000_0000u32 | large.len() as u32;
                buf.extend_from_slice(&escape.to_be_bytes());
                large.push(*offset);
            }
        }
        for offset in large {
            buf.extend_from_slice(&offset.to_be_bytes());
        }

        buf.extend_from_slice(&[0u8; 20]); // pack checksum
        let checksum = Hasher::digest(&buf).unwrap();
        buf.extend_from_slice(checksum.as_bytes());
        buf
    }

    fn decode(entries: &[(ObjectId, u64, u32)]) -> PackIndex {
        PackIndex::from_reader(Box::new(build_index(entries))).unwrap()
    }

    fn make_oid(first_byte: u8, suffix: u8) -> ObjectId {
        let mut raw = [0u8; 20];
        raw[0] = first_byte;
        raw[19] = suffix;
        ObjectId::from_raw(raw)
    }

    #[test]
    fn lookup_single_object() {
        let oid = make_oid(0xab, 0x01);
        let idx = decode(&[(oid, 12, 0xdead_beef)]);
        assert_eq!(idx.num_objects(), 1);
        assert_eq!(idx.version(), 2);

        let entry = idx.entry(&oid).unwrap();
        assert_eq!(entry.id, oid);
        assert_eq!(entry.pack_offset, 12);
        assert_eq!(entry.crc32, 0xdead_beef);

        let missing = make_oid(0xab, 0x02);
        let err = idx.entry(&missing).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn lookup_multiple_objects() {
        let entries = vec![
            (make_oid(0x00, 0x01), 100, 0x111),
            (make_oid(0x00, 0x02), 200, 0x222),
            (make_oid(0x0a, 0x01), 300, 0x333),
            (make_oid(0xff, 0x01), 400, 0x444),
        ];
        let idx = decode(&entries);
        assert_eq!(idx.num_objects(), 4);

        for (oid, offset, crc) in &entries {
            let entry = idx.entry(oid).unwrap();
            assert_eq!(entry.pack_offset, *offset);
            assert_eq!(entry.crc32, *crc);
        }
    }

    #[test]
    fn fanout_buckets_zero_and_max() {
        // Ids landing in buckets 0x00 and 0xff exercise both fan-out edges.
        let first = make_oid(0x00, 0x01);
        let last = make_oid(0xff, 0x09);
        let idx = decode(&[(first, 12, 0), (last, 99, 0)]);
        assert_eq!(idx.entry(&first).unwrap().pack_offset, 12);
        assert_eq!(idx.entry(&last).unwrap().pack_offset, 99);
        assert_eq!(idx.bucket_len(0x00), 1);
        assert_eq!(idx.bucket_len(0x7f), 0);
        assert_eq!(idx.bucket_len(0xff), 1);
    }

    #[test]
    fn positional_accessors_follow_sort_order() {
        let idx = decode(&[
            (make_oid(0xff, 0x01), 100, 7),
            (make_oid(0x00, 0x01), 200, 8),
            (make_oid(0x55, 0x01), 300, 9),
        ]);
        assert_eq!(idx.oid_at_index(0).unwrap(), make_oid(0x00, 0x01));
        assert_eq!(idx.oid_at_index(1).unwrap(), make_oid(0x55, 0x01));
        assert_eq!(idx.oid_at_index(2).unwrap(), make_oid(0xff, 0x01));
        assert_eq!(idx.offset_at_index(0).unwrap(), 200);
        assert_eq!(idx.crc32_at_index(0).unwrap(), 8);
        assert!(idx.oid_at_index(3).is_err());
    }

    #[test]
    fn iterator_yields_sorted_rows() {
        let idx = decode(&[
            (make_oid(0x02, 0x01), 200, 0),
            (make_oid(0x01, 0x01), 100, 0),
            (make_oid(0x03, 0x01), 300, 0),
        ]);
        let rows: Vec<_> = idx.iter().collect::<Result<_, _>>().unwrap();
        assert_eq!(
            rows,
            vec![
                (make_oid(0x01, 0x01), 100),
                (make_oid(0x02, 0x01), 200),
                (make_oid(0x03, 0x01), 300),
            ]
        );
    }

    #[test]
    fn empty_index_finds_nothing() {
        let idx = decode(&[]);
        assert_eq!(idx.num_objects(), 0);
        assert!(idx.entry(&make_oid(0x00, 0x00)).unwrap_err().is_not_found());
        assert!(idx.entry(&make_oid(0xff, 0xff)).unwrap_err().is_not_found());
        assert_eq!(idx.iter().count(), 0);
    }

    #[test]
    fn large_offsets_via_escape() {
        let oid = make_oid(0x42, 0x01);
        let five_gib = 5u64 * 1024 * 1024 * 1024;
        let idx = decode(&[(oid, five_gib, 0)]);
        assert_eq!(idx.entry(&oid).unwrap().pack_offset, five_gib);
    }

    #[test]
    fn large_offset_escape_with_index_zero() {
        // A short offset of exactly 0x80000000 points at 64-bit entry 0.
        let oid = make_oid(0x42, 0x01);
        let mut buf = Vec::new();
        buf.extend_from_slice(&IDX_SIGNATURE);
        buf.extend_from_slice(&IDX_VERSION.to_be_bytes());
        for i in 0..256u32 {
            let count: u32 = if i >= 0x42 { 1 } else { 0 };
            buf.extend_from_slice(&count.to_be_bytes());
        }
        buf.extend_from_slice(oid.as_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes()); // crc
        buf.extend_from_slice(&0x8000_0000u32.to_be_bytes());
        buf.extend_from_slice(&(1u64 << 33).to_be_bytes());
        buf.extend_from_slice(&[0u8; 40]);

        let idx = PackIndex::from_reader(Box::new(buf)).unwrap();
        assert_eq!(idx.entry(&oid).unwrap().pack_offset, 1u64 << 33);
    }

    #[test]
    fn large_offset_escape_out_of_range() {
        let oid = make_oid(0x42, 0x01);
        let mut buf = Vec::new();
        buf.extend_from_slice(&IDX_SIGNATURE);
        buf.extend_from_slice(&IDX_VERSION.to_be_bytes());
        for i in 0..256u32 {
            let count: u32 = if i >= 0x42 { 1 } else { 0 };
            buf.extend_from_slice(&count.to_be_bytes());
        }
        buf.extend_from_slice(oid.as_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&0x8000_0003u32.to_be_bytes()); // entry 3, table empty
        buf.extend_from_slice(&[0u8; 40]);

        let idx = PackIndex::from_reader(Box::new(buf)).unwrap();
        let err = idx.entry(&oid).unwrap_err();
        assert!(matches!(err, PackError::MalformedIndex(_)));
    }

    #[test]
    fn trailer_checksums_are_exposed() {
        let data = build_index(&[(make_oid(0x10, 0x01), 12, 0)]);
        let expected = ObjectId::from_bytes(&data[data.len() - 20..]).unwrap();
        let idx = PackIndex::from_reader(Box::new(data)).unwrap();
        assert_eq!(idx.pack_checksum().unwrap(), ObjectId::NULL);
        assert_eq!(idx.index_checksum().unwrap(), expected);
    }

    #[test]
    fn bad_signature_rejected() {
        let mut data = build_index(&[]);
        data[0] = b'X';
        let err = PackIndex::from_reader(Box::new(data)).unwrap_err();
        assert!(matches!(err, PackError::MalformedIndex(_)));
    }

    #[test]
    fn unsupported_version_rejected() {
        let mut data = build_index(&[]);
        data[7] = 3;
        let err = PackIndex::from_reader(Box::new(data)).unwrap_err();
        assert!(matches!(err, PackError::UnsupportedIndexVersion(3)));
    }

    #[test]
    fn truncated_file_rejected() {
        let data = build_index(&[(make_oid(0x10, 0x01), 12, 0)]);
        let err = PackIndex::from_reader(Box::new(data[..500].to_vec())).unwrap_err();
        assert!(matches!(err, PackError::MalformedIndex(_)));

        // Header and fanout intact but id table cut off.
        let short = data[..8 + 1024 + 48].to_vec();
        let err = PackIndex::from_reader(Box::new(short)).unwrap_err();
        assert!(matches!(err, PackError::MalformedIndex(_)));
    }

    #[test]
    fn decreasing_fanout_rejected() {
        let mut data = build_index(&[(make_oid(0x10, 0x01), 12, 0)]);
        // Zero out a later fanout entry so the cumulative counts dip.
        let pos = 8 + 0x80 * 4;
        data[pos..pos + 4].copy_from_slice(&0u32.to_be_bytes());
        let err = PackIndex::from_reader(Box::new(data)).unwrap_err();
        assert!(matches!(err, PackError::MalformedIndex(_)));
    }

    #[test]
    fn open_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let oid = make_oid(0xab, 0x01);
        let path = dir.path().join("test.idx");
        std::fs::write(&path, build_index(&[(oid, 12, 0)])).unwrap();

        let idx = PackIndex::open(&path).unwrap();
        assert_eq!(idx.entry(&oid).unwrap().pack_offset, 12);
    }

    #[test]
    fn open_names_the_file_in_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.idx");
        std::fs::write(&path, b"not an index at all, far too short").unwrap();

        let err = PackIndex::open(&path).unwrap_err();
        match err {
            PackError::MalformedIndex(reason) => assert!(reason.contains("broken.idx")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
