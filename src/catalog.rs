//! Book catalog and host metadata lookups.
//!
//! The host library that owns the books is reached only through the narrow
//! [`HostMetadata`] trait. [`Catalog`] is the file-backed implementation the
//! command line tool uses.

use crate::error::CatalogError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Read-only view of the host library's metadata.
pub trait HostMetadata: Send + Sync {
    /// Returns the ASIN the host has on record for `book_id`, if any.
    fn identifier(&self, book_id: u64) -> Option<String>;
}

/// One book as listed by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub title_sort: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub author_sort: String,
    /// Path of the book's MOBI file.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub asin: Option<String>,
}

/// A TOML file listing books as `[[book]]` tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default, rename = "book")]
    pub books: Vec<CatalogEntry>,
}

impl Catalog {
    /// Loads a catalog file.
    ///
    /// Relative book paths are resolved against the catalog's directory.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)?;
        let mut catalog: Catalog = toml::from_str(&content)?;

        if let Some(base) = path.parent() {
            for entry in &mut catalog.books {
                if let Some(book_path) = &entry.path
                    && book_path.is_relative()
                {
                    entry.path = Some(base.join(book_path));
                }
            }
        }

        Ok(catalog)
    }

    pub fn entry(&self, book_id: u64) -> Option<&CatalogEntry> {
        self.books.iter().find(|b| b.id == book_id)
    }
}

impl HostMetadata for Catalog {
    fn identifier(&self, book_id: u64) -> Option<String> {
        self.entry(book_id)
            .and_then(|entry| entry.asin.clone())
            .filter(|asin| !asin.is_empty())
    }
}
