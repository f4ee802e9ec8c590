//! Grouping packs under a shared object-store root.
//!
//! A store keeps its packs as `pack-<40 hex>.pack` / `.idx` pairs under
//! `<root>/pack/`. The set opens every pair and routes lookups through a
//! 256-entry table keyed by the first byte of the requested id, probing
//! packs that hold more objects with that first byte before sparser ones.

use std::path::{Path, PathBuf};

use packdb_hash::ObjectId;

use crate::chain::Object;
use crate::pack::Packfile;
use crate::PackError;

/// A collection of packs searched as one store.
pub struct PackSet {
    packs: Vec<Packfile>,
    /// Per first byte, indices into `packs` ordered most-populous-first.
    routing: Vec<Vec<usize>>,
}

impl std::fmt::Debug for PackSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackSet")
            .field("packs", &self.packs)
            .finish()
    }
}

impl PackSet {
    /// Open every pack under `root/pack/`.
    ///
    /// File names not shaped like `pack-<40 lowercase hex>.pack` are
    /// ignored. A missing `pack/` directory yields an empty set, but a
    /// matching pack whose `.idx` is missing or malformed fails the whole
    /// open.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, PackError> {
        let pack_dir = root.as_ref().join("pack");

        let mut paths: Vec<PathBuf> = Vec::new();
        match std::fs::read_dir(&pack_dir) {
            Ok(entries) => {
                for dirent in entries {
                    let dirent = dirent?;
                    let name = dirent.file_name();
                    let Some(name) = name.to_str() else { continue };
                    if is_pack_name(name) {
                        paths.push(dirent.path());
                    }
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        paths.sort();

        let mut packs = Vec::with_capacity(paths.len());
        for path in &paths {
            packs.push(Packfile::open(path)?);
        }

        Ok(Self::from_packs(packs))
    }

    /// Build a set from already-open packs.
    pub fn from_packs(packs: Vec<Packfile>) -> Self {
        let mut routing: Vec<Vec<usize>> = vec![Vec::new(); 256];
        for (key, bucket) in routing.iter_mut().enumerate() {
            let key = key as u8;
            for (pos, pack) in packs.iter().enumerate() {
                if pack.index().bucket_len(key) > 0 {
                    bucket.push(pos);
                }
            }
            // Most-populous-first; stable sort keeps path order on ties.
            bucket.sort_by_key(|&pos| std::cmp::Reverse(packs[pos].index().bucket_len(key)));
        }
        Self { packs, routing }
    }

    /// Look up an object anywhere in the set.
    ///
    /// Packs that do not hold the id are skipped; any other failure aborts
    /// the search. `Ok(None)` means no pack in the set holds the id.
    pub fn object(&self, id: &ObjectId) -> Result<Option<Object<'_>>, PackError> {
        for &pos in &self.routing[id.first_byte() as usize] {
            match self.packs[pos].object(id) {
                Ok(object) => return Ok(Some(object)),
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    /// Whether any pack in the set holds the id.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.routing[id.first_byte() as usize]
            .iter()
            .any(|&pos| self.packs[pos].contains(id))
    }

    /// Number of packs in the set.
    pub fn num_packs(&self) -> usize {
        self.packs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packs.is_empty()
    }

    /// The open packs, in deterministic (sorted-path) order.
    pub fn packs(&self) -> &[Packfile] {
        &self.packs
    }

    /// Release every mmap in the set.
    ///
    /// Dropping the set does the same; `close` makes the release point
    /// explicit at call sites.
    pub fn close(self) {}
}

/// `pack-<40 lowercase hex>.pack`
fn is_pack_name(name: &str) -> bool {
    let Some(hex) = name
        .strip_prefix("pack-")
        .and_then(|rest| rest.strip_suffix(".pack"))
    else {
        return false;
    };
    hex.len() == 40 && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
