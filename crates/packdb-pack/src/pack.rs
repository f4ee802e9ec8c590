//! Packfile reading.
//!
//! A pack file is a 12-byte header (`PACK`, version, object count) followed
//! by entries at offsets only the index knows, and a trailing checksum this
//! reader does not verify.

use std::path::{Path, PathBuf};

use memmap2::Mmap;
use packdb_hash::ObjectId;

use crate::chain::{Chain, Object};
use crate::entry;
use crate::index::PackIndex;
use crate::io::ReadAt;
use crate::{
    PackError, PackedObjectType, MAX_DELTA_CHAIN_DEPTH, PACK_HEADER_SIZE, PACK_SIGNATURE,
};

/// A single pack with its index attached.
pub struct Packfile {
    reader: Box<dyn ReadAt>,
    index: PackIndex,
    version: u32,
    num_objects: u32,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for Packfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packfile")
            .field("version", &self.version)
            .field("num_objects", &self.num_objects)
            .field("path", &self.path)
            .finish()
    }
}

impl Packfile {
    /// Open a pack file and its sibling `.idx`.
    pub fn open(pack_path: impl AsRef<Path>) -> Result<Self, PackError> {
        let pack_path = pack_path.as_ref();
        let idx_path = pack_path.with_extension("idx");

        let file = std::fs::File::open(pack_path)?;
        let data = unsafe { Mmap::map(&file)? };
        let index = PackIndex::open(&idx_path)?;

        let mut pack = Self::from_parts(Box::new(data), index).map_err(|err| match err {
            PackError::MalformedPackHeader(reason) => {
                PackError::MalformedPackHeader(format!("{}: {reason}", pack_path.display()))
            }
            other => other,
        })?;
        pack.path = Some(pack_path.to_path_buf());
        Ok(pack)
    }

    /// Attach an already-decoded index to a pack image from any
    /// random-access source.
    pub fn from_parts(reader: Box<dyn ReadAt>, index: PackIndex) -> Result<Self, PackError> {
        let mut header = [0u8; PACK_HEADER_SIZE];
        reader
            .read_exact_at(0, &mut header)
            .map_err(|_| PackError::MalformedPackHeader("truncated header".into()))?;

        if &header[0..4] != PACK_SIGNATURE {
            return Err(PackError::MalformedPackHeader("missing PACK signature".into()));
        }
        let version = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        if version != 2 && version != 3 {
            return Err(PackError::UnsupportedPackVersion(version));
        }
        let num_objects = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);

        if index.num_objects() != num_objects {
            return Err(PackError::MalformedPackHeader(format!(
                "pack holds {num_objects} objects but index holds {}",
                index.num_objects()
            )));
        }

        Ok(Self {
            reader,
            index,
            version,
            num_objects,
            path: None,
        })
    }

    /// Look up an object by id.
    ///
    /// [`PackError::NotFound`] passes through untouched so a multi-pack
    /// search can keep probing.
    pub fn object(&self, id: &ObjectId) -> Result<Object<'_>, PackError> {
        let row = self.index.entry(id)?;
        let chain = self.unpack_entry(row.pack_offset, 0)?;
        Ok(Object::new(chain))
    }

    /// Build the resolution chain for the entry at `offset`.
    ///
    /// Terminal entries become a base link; delta entries locate their base
    /// (back-offset or id via the index) and recurse.
    fn unpack_entry(&self, offset: u64, depth: usize) -> Result<Chain<'_>, PackError> {
        if depth > MAX_DELTA_CHAIN_DEPTH {
            return Err(PackError::DeltaChainTooDeep {
                offset,
                max_depth: MAX_DELTA_CHAIN_DEPTH,
            });
        }

        let header = entry::read_entry_header(&*self.reader, offset)?;
        match header.kind {
            PackedObjectType::Commit
            | PackedObjectType::Tree
            | PackedObjectType::Blob
            | PackedObjectType::Tag => Ok(Chain::base(
                header.data_offset,
                header.size,
                header.kind,
                &*self.reader,
            )),
            PackedObjectType::OffsetDelta => {
                let (base_offset, consumed) =
                    entry::read_base_offset(&*self.reader, header.data_offset, offset)?;
                let base = self.unpack_entry(base_offset, depth + 1)?;
                Ok(Chain::delta(
                    base,
                    header.data_offset + consumed,
                    header.size,
                    &*self.reader,
                ))
            }
            PackedObjectType::ReferenceDelta => {
                let mut raw = [0u8; ObjectId::RAW_LEN];
                self.reader
                    .read_exact_at(header.data_offset, &mut raw)
                    .map_err(|_| PackError::MalformedPackEntry {
                        offset,
                        reason: "truncated base id".into(),
                    })?;
                let base_id = ObjectId::from_raw(raw);

                let base_row = self.index.entry(&base_id)?;
                let base = self.unpack_entry(base_row.pack_offset, depth + 1)?;
                Ok(Chain::delta(
                    base,
                    header.data_offset + ObjectId::RAW_LEN as u64,
                    header.size,
                    &*self.reader,
                ))
            }
            PackedObjectType::None => Err(PackError::UnrecognizedObjectType { offset, kind: 0 }),
        }
    }

    /// Whether this pack's index knows the id.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.index.entry(id).is_ok()
    }

    /// Number of objects the pack header declares.
    pub fn num_objects(&self) -> u32 {
        self.num_objects
    }

    /// Pack format version (2 or 3).
    pub fn version(&self) -> u32 {
        self.version
    }

    /// The attached index.
    pub fn index(&self) -> &PackIndex {
        &self.index
    }

    /// Path of the `.pack` file, when opened from disk.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
