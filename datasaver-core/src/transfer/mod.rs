//! Artifact transformations: compression and content hashing.

pub mod checksum;
pub mod compression;

pub use checksum::{sha256_file, sha256_reader, CHECKSUM_PREFIX};
pub use compression::{compress_file, decompress_file, Compression};
