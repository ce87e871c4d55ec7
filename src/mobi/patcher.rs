//! Injects or replaces the ASIN stored in a MOBI container's EXTH table.

use super::{ExthRecord, MobiBook};
use crate::error::PatchError;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// EXTH codes that carry the book's ASIN.
pub const ASIN_CODES: [u32; 2] = [113, 504];

/// Rewrites the ASIN records of a parsed container.
///
/// Records 113 and 504 are both set to the new identifier, every other EXTH
/// record is kept as is, and record 0 is rebuilt around the new table.
pub struct IdentifierPatcher {
    book: MobiBook,
}

impl IdentifierPatcher {
    pub fn new(book: MobiBook) -> Self {
        Self { book }
    }

    /// Returns the container bytes with `identifier` written to both ASIN
    /// records.
    pub fn patch(&self, identifier: &str) -> Result<Vec<u8>, PatchError> {
        let exth = self.book.exth().ok_or(PatchError::MissingTable)?;

        let value = self.book.encoding().encode(identifier);
        let replacements = ASIN_CODES
            .iter()
            .map(|&code| ExthRecord::new(code, value.clone()))
            .collect();
        let table = exth.with_replacements(replacements);

        self.book.with_exth(&table.to_bytes())
    }

    /// Patches the container at `path` in place.
    ///
    /// The file is read and rewritten through a single handle. Nothing is
    /// written unless the patch succeeds, so a wrong container kind or a
    /// missing EXTH table leaves the file untouched.
    pub fn patch_file(path: &Path, identifier: &str) -> Result<(), PatchError> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let patched = Self::new(MobiBook::parse(data)?).patch(identifier)?;

        file.seek(SeekFrom::Start(0))?;
        file.set_len(0)?;
        file.write_all(&patched)?;
        file.flush()?;

        tracing::debug!(path = %path.display(), identifier, "Patched container ASIN");
        Ok(())
    }
}
