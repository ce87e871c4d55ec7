//! X-Ray index artifacts and the builders that produce them.
//!
//! The pipeline only needs three things from a builder: read the remote book
//! page, read the book text, and write the artifact. How each is done is up to
//! the [`IndexBuilder`] implementation.

mod basic;

pub use basic::{BasicIndexBuilder, BookMentions, BookTerms, Term, TermKind, TermMentions};

use crate::asin::Asin;
use crate::remote::Connections;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// File extension of X-Ray artifacts.
pub const ARTIFACT_EXTENSION: &str = "asc";

/// Collaborators that turn remote metadata and book text into an artifact.
#[async_trait]
pub trait IndexBuilder: Send + Sync {
    /// Parsed remote book page.
    type RemoteData: Send + Sync;

    /// Parsed book text, cross-referenced with the remote data.
    type BookData: Send + Sync;

    /// Reads the remote book page at `url`.
    async fn parse_remote_data(
        &self,
        connections: &mut Connections,
        url: &str,
        spoilers: bool,
    ) -> anyhow::Result<Self::RemoteData>;

    /// Reads the book at `book_path`.
    fn parse_book_data(
        &self,
        book_path: &Path,
        remote: &Self::RemoteData,
    ) -> anyhow::Result<Self::BookData>;

    /// Writes the artifact into `index_dir` and returns its path.
    fn write_index(
        &self,
        index_dir: &Path,
        asin: &Asin,
        remote_url: &str,
        book: &Self::BookData,
    ) -> anyhow::Result<PathBuf>;
}

/// File name of the artifact for `asin`.
pub fn artifact_file_name(asin: &Asin) -> String {
    format!("XRAY.entities.{}.{}", asin, ARTIFACT_EXTENSION)
}

/// Returns the first artifact in `dir`, if any.
pub fn find_index_artifact(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut artifacts: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(ARTIFACT_EXTENSION))
        })
        .collect();
    artifacts.sort();
    artifacts.into_iter().next()
}

/// Extracts the ASIN embedded in an artifact's file name
/// (`XRAY.entities.{ASIN}.asc`).
pub fn artifact_identifier(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let parts: Vec<&str> = name.split('.').collect();
    match parts.as_slice() {
        [_, _, identifier, ext] if ext.eq_ignore_ascii_case(ARTIFACT_EXTENSION) => {
            Some(identifier.to_string()).filter(|id| !id.is_empty())
        }
        _ => None,
    }
}
