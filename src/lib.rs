//! Reference-counted content tracking for runtime assets.
//!
//! The crate keeps at most one in-memory copy of every named asset, records
//! which assets were loaded while reading another one, and releases them
//! together. Loading can happen synchronously or on a background worker, and
//! loaded assets can be swapped for fresh copies at runtime. File formats are
//! kept outside of the crate: assets are produced by an [`AssetReader`]
//! supplied by the host application.

pub mod config;
pub mod error;
pub mod handle;
pub mod payload;
pub mod reader;
pub mod tracker;

mod graph;
mod queue;
mod source;
#[cfg(test)]
mod testing;

pub use config::{PreloadEntry, TrackerConfig};
pub use error::{ContentError, Result};
pub use handle::{AssetHandle, AssetStatus, AssetSummary, ChangeObserver};
pub use payload::{AssetKind, Dispose, Payload, Resource};
pub use reader::{AssetReader, DirectoryReader, ReadContext};
pub use tracker::ContentTracker;
