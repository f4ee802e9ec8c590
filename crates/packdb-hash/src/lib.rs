//! Object identity for the packdb object store.
//!
//! Provides the 20-byte SHA-1 [`ObjectId`] type, lowercase hex
//! encoding/decoding, and a streaming [`Hasher`] with collision detection.

mod error;
pub mod hex;
pub mod hasher;
mod oid;

pub use error::HashError;
pub use hasher::Hasher;
pub use oid::ObjectId;
