//! X-Ray Creator - companion index builder for Kindle books.
//!
//! This library provides functionality for:
//! - Resolving a book's ASIN and writing it into the MOBI container
//! - Looking up the book's page on the remote metadata host
//! - Building X-Ray index files and sending them to an attached Kindle

pub mod asin;
pub mod book;
pub mod catalog;
pub mod config;
pub mod console;
pub mod device;
pub mod error;
pub mod mobi;
pub mod pipeline;
pub mod remote;
pub mod xray;

// Re-export commonly used types
pub use asin::Asin;
pub use book::{BookUnit, BuildContext, DevicePaths, SendOutcome, Stage};
pub use catalog::{Catalog, CatalogEntry, HostMetadata};
pub use config::Config;
pub use console::Console;
pub use device::{DeviceLocator, Volume, VolumeKind, VolumeSource};
pub use error::{CatalogError, ConfigError, DeviceError, LookupError, PatchError, StageError};
pub use mobi::{IdentifierPatcher, MobiBook};
pub use pipeline::{CancelFlag, NoProgress, Pipeline, ProgressReporter, RunReport};
pub use remote::{Connections, Lookup, RemoteConnection};
pub use xray::{BasicIndexBuilder, IndexBuilder};
