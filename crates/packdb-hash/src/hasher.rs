//! Streaming SHA-1 computation with collision detection.

use crate::{HashError, ObjectId};

/// Streaming SHA-1 hasher.
///
/// Data can be fed incrementally with [`update`](Hasher::update) or through
/// the [`std::io::Write`] implementation, then finalised into an
/// [`ObjectId`]. Uses the collision-detecting SHA-1 variant; finalising
/// input that trips the detector is an error.
pub struct Hasher {
    inner: Box<sha1_checked::Sha1>,
}

impl Hasher {
    pub fn new() -> Self {
        Self {
            inner: Box::new(sha1_checked::Sha1::new()),
        }
    }

    /// Feed data into the hasher.
    pub fn update(&mut self, data: &[u8]) {
        use digest::Digest;
        self.inner.update(data);
    }

    /// Finalize and return the digest.
    ///
    /// Returns an error if SHA-1 collision detection fires.
    pub fn finalize(self) -> Result<ObjectId, HashError> {
        let result = self.inner.try_finalize();
        if result.has_collision() {
            return Err(HashError::Sha1Collision);
        }
        let mut raw = [0u8; 20];
        raw.copy_from_slice(result.hash().as_slice());
        Ok(ObjectId::from_raw(raw))
    }

    /// Convenience: hash data in one call.
    pub fn digest(data: &[u8]) -> Result<ObjectId, HashError> {
        let mut h = Self::new();
        h.update(data);
        h.finalize()
    }

    /// Hash an object framed as `"{type} {len}\0{content}"`.
    pub fn hash_object(obj_type: &str, content: &[u8]) -> Result<ObjectId, HashError> {
        let mut h = Self::new();
        h.update(format!("{} {}\0", obj_type, content.len()).as_bytes());
        h.update(content);
        h.finalize()
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::io::Write for Hasher {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
