//! Lazy object resolution chains.
//!
//! A lookup does not decompress anything: it builds a [`Chain`] describing
//! where the bytes live. A base chain points at one zlib stream; a delta
//! chain wraps the chain for its base plus the location of the delta
//! stream. [`Chain::unpack`] walks the structure, inflating and patching,
//! and returns an owned buffer with no ties to the underlying mmap.

use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::io::{ReadAt, StreamReader};
use crate::{delta, PackError, PackedObjectType};

/// A pending object resolution.
pub enum Chain<'a> {
    Base(ChainBase<'a>),
    Delta(ChainDelta<'a>),
}

/// A non-delta object: one zlib stream at `offset` inflating to exactly
/// `size` bytes.
pub struct ChainBase<'a> {
    offset: u64,
    size: u64,
    kind: PackedObjectType,
    reader: &'a dyn ReadAt,
}

/// A delta on top of another chain. `delta_size` is the uncompressed size
/// of the delta stream, as declared by the entry header; the compressed
/// stream at `delta_offset` carries no length of its own.
pub struct ChainDelta<'a> {
    base: Box<Chain<'a>>,
    delta_offset: u64,
    delta_size: u64,
    reader: &'a dyn ReadAt,
}

impl<'a> Chain<'a> {
    pub(crate) fn base(
        offset: u64,
        size: u64,
        kind: PackedObjectType,
        reader: &'a dyn ReadAt,
    ) -> Self {
        Self::Base(ChainBase {
            offset,
            size,
            kind,
            reader,
        })
    }

    pub(crate) fn delta(
        base: Chain<'a>,
        delta_offset: u64,
        delta_size: u64,
        reader: &'a dyn ReadAt,
    ) -> Self {
        Self::Delta(ChainDelta {
            base: Box::new(base),
            delta_offset,
            delta_size,
            reader,
        })
    }

    /// Effective object type: a delta inherits its base's type, so every
    /// chain reports one of the four terminal types.
    pub fn kind(&self) -> PackedObjectType {
        match self {
            Self::Base(base) => base.kind,
            Self::Delta(delta) => delta.base.kind(),
        }
    }

    /// Materialize the object bytes.
    ///
    /// A base inflates its stream; a delta unpacks its base first, inflates
    /// the delta stream, and patches.
    pub fn unpack(&self) -> Result<Vec<u8>, PackError> {
        match self {
            Self::Base(base) => inflate(base.reader, base.offset, base.size),
            Self::Delta(link) => {
                let base = link.base.unpack()?;
                let patch = inflate(link.reader, link.delta_offset, link.delta_size)?;
                delta::apply(&base, &patch)
            }
        }
    }

    /// Uncompressed size declared by this link's entry header.
    pub fn size(&self) -> u64 {
        match self {
            Self::Base(base) => base.size,
            Self::Delta(delta) => delta.delta_size,
        }
    }

    /// Number of delta links above the terminal base.
    pub fn depth(&self) -> usize {
        match self {
            Self::Base(_) => 0,
            Self::Delta(delta) => delta.base.depth() + 1,
        }
    }
}

/// Inflate the zlib stream at `offset` into exactly `size` bytes.
fn inflate(reader: &dyn ReadAt, offset: u64, size: u64) -> Result<Vec<u8>, PackError> {
    let mut decoder = ZlibDecoder::new(StreamReader::new(reader, offset));
    let mut buf = vec![0u8; size as usize];
    decoder
        .read_exact(&mut buf)
        .map_err(|err| PackError::MalformedZlibStream {
            offset,
            reason: err.to_string(),
        })?;
    Ok(buf)
}

/// A resolved object handle: its terminal type plus the chain producing its
/// bytes.
pub struct Object<'a> {
    kind: PackedObjectType,
    chain: Chain<'a>,
}

impl<'a> std::fmt::Debug for Object<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object").field("kind", &self.kind).finish()
    }
}

impl<'a> Object<'a> {
    pub(crate) fn new(chain: Chain<'a>) -> Self {
        Self {
            kind: chain.kind(),
            chain,
        }
    }

    /// The object's type: one of commit, tree, blob, or tag.
    pub fn kind(&self) -> PackedObjectType {
        self.kind
    }

    /// Decode the object's bytes into an owned buffer.
    ///
    /// May be called any number of times; each call re-inflates the chain
    /// and returns a fresh buffer, so the result never borrows the pack.
    pub fn unpack(&self) -> Result<Vec<u8>, PackError> {
        self.chain.unpack()
    }

    /// The underlying resolution chain.
    pub fn chain(&self) -> &Chain<'a> {
        &self.chain
    }
}
