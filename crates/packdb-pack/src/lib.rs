//! Read-only access to pack files and their indices.
//!
//! A pack file is an immutable archive of zlib-compressed objects, some
//! stored as deltas against other objects. The sidecar index maps a 20-byte
//! object id to the entry's byte offset inside the pack. This crate reads
//! both formats and resolves full objects, including delta chains, without
//! ever writing: pack construction belongs to other tools.
//!
//! Entry points: [`set::PackSet`] for a directory of packs,
//! [`pack::Packfile`] for a single pair, [`index::PackIndex`] for offset
//! lookups alone.

pub mod chain;
pub mod delta;
pub mod entry;
pub mod index;
pub mod io;
pub mod pack;
pub mod set;

use packdb_hash::{HashError, ObjectId};

pub use chain::{Chain, Object};
pub use index::{IndexEntry, PackIndex};
pub use pack::Packfile;
pub use set::PackSet;

/// Errors that can occur while reading packs.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("object {0} not found in pack index")]
    NotFound(ObjectId),

    #[error("malformed pack index: {0}")]
    MalformedIndex(String),

    #[error("unsupported pack index version: {0}")]
    UnsupportedIndexVersion(u32),

    #[error("malformed pack header: {0}")]
    MalformedPackHeader(String),

    #[error("unsupported pack version: {0}")]
    UnsupportedPackVersion(u32),

    #[error("unrecognized object type {kind} at offset {offset}")]
    UnrecognizedObjectType { offset: u64, kind: u8 },

    #[error("malformed pack entry at offset {offset}: {reason}")]
    MalformedPackEntry { offset: u64, reason: String },

    #[error("malformed zlib stream at offset {offset}: {reason}")]
    MalformedZlibStream { offset: u64, reason: String },

    #[error("malformed delta: {0}")]
    MalformedDelta(String),

    #[error("delta chain too deep (>{max_depth} levels) at offset {offset}")]
    DeltaChainTooDeep { offset: u64, max_depth: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Hash(#[from] HashError),
}

impl PackError {
    /// True for the lookup-miss case a multi-pack search recovers from.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Type of a packed object as encoded in the 3-bit entry header field.
///
/// Wire values: 1 commit, 2 tree, 3 blob, 4 tag, 6 offset delta, 7
/// reference delta. 0 is invalid and 5 is reserved. Only the first four are
/// terminal; the delta types exist on the wire but never describe a fully
/// resolved object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackedObjectType {
    None,
    Commit,
    Tree,
    Blob,
    Tag,
    /// Delta whose base lives at a back-offset within the same pack.
    OffsetDelta,
    /// Delta whose base is named by a 20-byte object id.
    ReferenceDelta,
}

impl PackedObjectType {
    /// Decode the 3-bit wire value. Rejects 0 (invalid) and 5 (reserved).
    pub fn from_wire(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Commit),
            2 => Some(Self::Tree),
            3 => Some(Self::Blob),
            4 => Some(Self::Tag),
            6 => Some(Self::OffsetDelta),
            7 => Some(Self::ReferenceDelta),
            _ => None,
        }
    }

    /// The 3-bit wire value.
    pub fn wire(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Commit => 1,
            Self::Tree => 2,
            Self::Blob => 3,
            Self::Tag => 4,
            Self::OffsetDelta => 6,
            Self::ReferenceDelta => 7,
        }
    }

    /// True for the four types a delta chain may terminate in.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Commit | Self::Tree | Self::Blob | Self::Tag)
    }

    /// True for the two transient delta encodings.
    pub fn is_delta(self) -> bool {
        matches!(self, Self::OffsetDelta | Self::ReferenceDelta)
    }
}

impl std::fmt::Display for PackedObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::None => "<none>",
            Self::Commit => "commit",
            Self::Tree => "tree",
            Self::Blob => "blob",
            Self::Tag => "tag",
            Self::OffsetDelta => "ofs-delta",
            Self::ReferenceDelta => "ref-delta",
        })
    }
}

/// Pack format constants.
pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";
pub const PACK_HEADER_SIZE: usize = 12;

/// Pack index v2 constants.
pub const IDX_SIGNATURE: [u8; 4] = [0xff, 0x74, 0x4f, 0x63]; // "\377tOc"
pub const IDX_VERSION: u32 = 2;

/// Maximum delta chain depth before a lookup bails out.
pub const MAX_DELTA_CHAIN_DEPTH: usize = 512;
