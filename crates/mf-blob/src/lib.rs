//! mf-blob: owner-scoped object storage for job inputs and outputs.
//!
//! The conversion pipeline only sees the [`BlobStore`] trait; the filesystem
//! implementation backs the CLI and the tests.

pub mod key;
pub mod store;

pub use key::BlobKey;
pub use store::{BlobMeta, BlobReader, BlobStore, FsBlobStore};
