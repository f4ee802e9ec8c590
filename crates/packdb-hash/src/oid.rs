use std::fmt;
use std::str::FromStr;

use crate::hex;
use crate::HashError;

/// A 20-byte SHA-1 object identifier.
///
/// Ordered lexicographically over the raw digest bytes; the first byte is
/// the fanout key used by pack indices.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 20]);

impl ObjectId {
    /// Length of the raw digest in bytes.
    pub const RAW_LEN: usize = 20;
    /// Length of the hex representation in characters.
    pub const HEX_LEN: usize = 40;
    /// The all-zeros id.
    pub const NULL: Self = Self([0u8; 20]);

    /// Wrap a raw 20-byte digest.
    pub const fn from_raw(raw: [u8; 20]) -> Self {
        Self(raw)
    }

    /// Create an id from a byte slice, which must be exactly 20 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HashError> {
        let raw: [u8; 20] = bytes.try_into().map_err(|_| HashError::InvalidHashLength {
            expected: Self::RAW_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(raw))
    }

    /// Parse a 40-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, HashError> {
        let mut raw = [0u8; 20];
        hex::decode_into(s, &mut raw)?;
        Ok(Self(raw))
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The first byte of the digest, used as the fanout key.
    pub fn first_byte(&self) -> u8 {
        self.0[0]
    }

    /// Whether this is the all-zeros id.
    pub fn is_null(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// The lowercase hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", &self.to_hex()[..8])
    }
}

impl FromStr for ObjectId {
    type Err = HashError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl AsRef<[u8]> for ObjectId {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}
