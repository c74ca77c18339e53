//! Blob storage for source images.
//!
//! - [`BlobStore`] -- the write/locate seam, with an S3 and an in-memory
//!   implementation.
//! - [`BlobUploader`] -- writes one payload at a freshly generated unique
//!   path and hands back its locator.
//! - [`diagnostics`] -- a write check used to check store connectivity.

pub mod blob;
pub mod diagnostics;
pub mod memory;
pub mod s3;
pub mod uploader;

pub use blob::{BlobError, BlobStore, TransferReceipt, TransferState};
pub use memory::MemoryBlobStore;
pub use s3::S3BlobStore;
pub use uploader::{BlobUploader, StoredBlob};
