//! MOBI (PalmDB `BOOKMOBI`) container access.
//!
//! This module reads just enough of the container to locate record 0, its
//! MOBI header and the EXTH metadata table, and rewrites record 0 in place
//! when the EXTH table changes. Everything else in the file is carried over
//! byte for byte.

mod exth;
mod palmdoc;
mod patcher;

pub use exth::{EXTH_MAGIC, ExthRecord, RecordTable};
pub use patcher::{ASIN_CODES, IdentifierPatcher};

use crate::error::PatchError;
use exth::read_u32;
use std::path::Path;

/// PalmDB type and creator of a MOBI book.
pub const BOOK_KIND: &[u8; 8] = b"BOOKMOBI";

/// Length of the PalmDB header preceding the record list.
const PDB_HEADER_LEN: usize = 78;

/// Each record list entry: 4 byte offset, 1 byte attributes, 3 byte unique id.
const RECORD_INFO_LEN: usize = 8;

/// Offsets inside record 0 (PalmDOC header followed by the MOBI header).
const R0_COMPRESSION: usize = 0x00;
const R0_TEXT_LENGTH: usize = 0x04;
const R0_TEXT_RECORDS: usize = 0x08;
const R0_HEADER_LENGTH: usize = 0x14;
const R0_ENCODING: usize = 0x1c;
const R0_TITLE_OFFSET: usize = 0x54;
const R0_TITLE_LENGTH: usize = 0x58;
const R0_EXTH_FLAGS: usize = 0x80;
const R0_EXTRA_FLAGS: usize = 0xf2;

/// Size of the PalmDOC header in front of the MOBI header.
const PALMDOC_HEADER_LEN: usize = 0x10;

/// EXTH present bit in the MOBI header flags.
const EXTH_FLAG: u32 = 0x40;

/// Zero slack appended to a rewritten record 0.
const RECORD0_SLACK: usize = 8 * 1024;

/// Text encoding declared in the MOBI header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Cp1252,
}

impl TextEncoding {
    fn from_code(code: u32) -> Self {
        if code == 65001 {
            TextEncoding::Utf8
        } else {
            TextEncoding::Cp1252
        }
    }

    /// Encodes a string, replacing characters the encoding can't hold with `?`.
    pub fn encode(self, value: &str) -> Vec<u8> {
        match self {
            TextEncoding::Utf8 => value.as_bytes().to_vec(),
            TextEncoding::Cp1252 => value
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
        }
    }
}

/// A parsed MOBI container held fully in memory.
#[derive(Debug, Clone)]
pub struct MobiBook {
    data: Vec<u8>,
    offsets: Vec<usize>,
    header_len: usize,
    flags: u32,
    encoding: TextEncoding,
    exth: Option<RecordTable>,
}

impl MobiBook {
    /// Reads and parses a container from disk.
    pub fn open(path: &Path) -> Result<Self, PatchError> {
        Self::parse(std::fs::read(path)?)
    }

    /// Parses a container from its raw bytes.
    pub fn parse(data: Vec<u8>) -> Result<Self, PatchError> {
        let kind = data
            .get(60..68)
            .ok_or_else(|| PatchError::Malformed("file shorter than a PalmDB header".to_string()))?;
        if kind != BOOK_KIND {
            return Err(PatchError::FormatMismatch {
                found: String::from_utf8_lossy(kind).into_owned(),
            });
        }

        let count = read_u16(&data, 76)? as usize;
        if count == 0 {
            return Err(PatchError::Malformed("container has no records".to_string()));
        }

        let mut offsets = Vec::with_capacity(count);
        for i in 0..count {
            let offset = read_u32(&data, PDB_HEADER_LEN + i * RECORD_INFO_LEN)? as usize;
            if offset > data.len() || offsets.last().is_some_and(|&prev| offset < prev) {
                return Err(PatchError::Malformed(format!(
                    "record {} has out of order offset {}",
                    i, offset
                )));
            }
            offsets.push(offset);
        }
        if offsets[0] < PDB_HEADER_LEN + count * RECORD_INFO_LEN {
            return Err(PatchError::Malformed(
                "record 0 overlaps the record list".to_string(),
            ));
        }

        let mut book = Self {
            data,
            offsets,
            header_len: 0,
            flags: 0,
            encoding: TextEncoding::Cp1252,
            exth: None,
        };

        let record0 = book.record(0)?;
        let header_len = read_u32(record0, R0_HEADER_LENGTH)? as usize;
        let flags = read_u32(record0, R0_EXTH_FLAGS)?;
        let encoding = TextEncoding::from_code(read_u32(record0, R0_ENCODING)?);
        let header_end = PALMDOC_HEADER_LEN + header_len;
        if header_end > record0.len() {
            return Err(PatchError::Malformed(format!(
                "MOBI header length {} exceeds record 0",
                header_len
            )));
        }

        let exth = if flags & EXTH_FLAG != 0 {
            Some(RecordTable::parse(&record0[header_end..])?)
        } else {
            None
        };

        book.header_len = header_len;
        book.flags = flags;
        book.encoding = encoding;
        book.exth = exth;
        Ok(book)
    }

    /// Number of PalmDB records.
    pub fn record_count(&self) -> usize {
        self.offsets.len()
    }

    /// Returns the raw bytes of record `index`.
    pub fn record(&self, index: usize) -> Result<&[u8], PatchError> {
        let start = *self
            .offsets
            .get(index)
            .ok_or_else(|| PatchError::Malformed(format!("record {} does not exist", index)))?;
        let end = self
            .offsets
            .get(index + 1)
            .copied()
            .unwrap_or(self.data.len());
        Ok(&self.data[start..end])
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// The EXTH table, if the container carries one.
    pub fn exth(&self) -> Option<&RecordTable> {
        self.exth.as_ref()
    }

    /// The book's full name as stored in record 0.
    pub fn title(&self) -> Result<String, PatchError> {
        Ok(String::from_utf8_lossy(self.title_bytes()?).into_owned())
    }

    fn title_bytes(&self) -> Result<&[u8], PatchError> {
        let record0 = self.record(0)?;
        let offset = read_u32(record0, R0_TITLE_OFFSET)? as usize;
        let len = read_u32(record0, R0_TITLE_LENGTH)? as usize;
        record0
            .get(offset..offset + len)
            .ok_or_else(|| PatchError::Malformed("full name lies outside record 0".to_string()))
    }

    /// Returns an identifier already embedded in the EXTH table.
    ///
    /// Code 113 wins when it holds 10 bytes, otherwise code 504 is used when
    /// it holds 10 bytes.
    pub fn embedded_identifier(&self) -> Option<String> {
        let exth = self.exth.as_ref()?;
        [113, 504]
            .into_iter()
            .filter_map(|code| exth.get(code))
            .find(|value| value.len() == 10)
            .map(|value| String::from_utf8_lossy(value).into_owned())
    }

    /// Returns the decompressed book text.
    pub fn text(&self) -> Result<Vec<u8>, PatchError> {
        let record0 = self.record(0)?;
        let compression = read_u16(record0, R0_COMPRESSION)?;
        let text_length = read_u32(record0, R0_TEXT_LENGTH)? as usize;
        let text_records = read_u16(record0, R0_TEXT_RECORDS)? as usize;
        let extra_flags = if self.header_len >= 0xe4 {
            read_u16(record0, R0_EXTRA_FLAGS)?
        } else {
            0
        };

        let mut text = Vec::with_capacity(text_length);
        for index in 1..=text_records {
            let record = self.record(index)?;
            let trailing = palmdoc::trailing_entries_size(record, extra_flags);
            let body = &record[..record.len() - trailing];

            match compression {
                1 => text.extend_from_slice(body),
                2 => text.extend(palmdoc::decompress(body)?),
                other => {
                    return Err(PatchError::Unsupported(format!(
                        "text compression type {}",
                        other
                    )));
                }
            }
        }

        text.truncate(text_length);
        Ok(text)
    }

    /// Builds the full container bytes with record 0 carrying `exth`.
    ///
    /// Record 0 becomes the original header, the new EXTH block, the full
    /// name, a 1 to 4 byte zero pad and 8 KiB of zero slack. The full name
    /// offset and every later record offset are adjusted to match.
    pub fn with_exth(&self, exth: &[u8]) -> Result<Vec<u8>, PatchError> {
        let record0 = self.record(0)?;
        let header_end = PALMDOC_HEADER_LEN + self.header_len;
        let title = self.title_bytes()?;

        let mut new_record0 = Vec::with_capacity(header_end + exth.len() + title.len() + RECORD0_SLACK + 4);
        new_record0.extend_from_slice(&record0[..header_end]);
        write_u32(&mut new_record0, R0_TITLE_OFFSET, (header_end + exth.len()) as u32)?;
        write_u32(&mut new_record0, R0_EXTH_FLAGS, self.flags | EXTH_FLAG)?;
        new_record0.extend_from_slice(exth);
        new_record0.extend_from_slice(title);
        let pad = 4 - new_record0.len() % 4;
        new_record0.resize(new_record0.len() + pad + RECORD0_SLACK, 0);

        let old_start = self.offsets[0];
        let old_end = self.offsets.get(1).copied().unwrap_or(self.data.len());

        let mut out = Vec::with_capacity(self.data.len() + new_record0.len());
        out.extend_from_slice(&self.data[..old_start]);
        for (i, &offset) in self.offsets.iter().enumerate().skip(1) {
            let shifted = offset - old_end + old_start + new_record0.len();
            let shifted = u32::try_from(shifted).map_err(|_| {
                PatchError::Malformed("rewritten container exceeds 4 GiB".to_string())
            })?;
            write_u32(&mut out, PDB_HEADER_LEN + i * RECORD_INFO_LEN, shifted)?;
        }
        out.extend_from_slice(&new_record0);
        out.extend_from_slice(&self.data[old_end..]);
        Ok(out)
    }

    /// Consumes the book and returns its raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

fn read_u16(bytes: &[u8], pos: usize) -> Result<u16, PatchError> {
    bytes
        .get(pos..pos + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| PatchError::Malformed(format!("unexpected end of data at offset {}", pos)))
}

fn write_u32(bytes: &mut [u8], pos: usize, value: u32) -> Result<(), PatchError> {
    bytes
        .get_mut(pos..pos + 4)
        .map(|slot| slot.copy_from_slice(&value.to_be_bytes()))
        .ok_or_else(|| PatchError::Malformed(format!("no room for field at offset {}", pos)))
}

#[cfg(test)]
pub(crate) mod fixture {
    //! Builds small synthetic MOBI files for tests.

    use super::*;

    /// MOBI header length used by the fixture (the common 0xe8).
    pub const HEADER_LEN: usize = 0xe8;

    pub struct Fixture {
        pub kind: [u8; 8],
        pub title: String,
        pub exth: Option<Vec<ExthRecord>>,
        pub text_records: Vec<Vec<u8>>,
        pub compression: u16,
        pub trailing_records: Vec<Vec<u8>>,
    }

    impl Default for Fixture {
        fn default() -> Self {
            Self {
                kind: *BOOK_KIND,
                title: "A Test Book".to_string(),
                exth: Some(vec![
                    ExthRecord::new(100, b"Jane Author".to_vec()),
                    ExthRecord::new(503, b"A Test Book".to_vec()),
                ]),
                text_records: vec![b"Alice met Bob. Bob waved at Alice.".to_vec()],
                compression: 1,
                trailing_records: vec![b"FLIS-ish trailer".to_vec()],
            }
        }
    }

    impl Fixture {
        pub fn build(&self) -> Vec<u8> {
            let text_length: usize = self.text_records.iter().map(Vec::len).sum();

            let mut record0 = vec![0u8; PALMDOC_HEADER_LEN + HEADER_LEN];
            record0[0..2].copy_from_slice(&self.compression.to_be_bytes());
            record0[4..8].copy_from_slice(&(text_length as u32).to_be_bytes());
            record0[8..10].copy_from_slice(&(self.text_records.len() as u16).to_be_bytes());
            record0[0x10..0x14].copy_from_slice(b"MOBI");
            record0[0x14..0x18].copy_from_slice(&(HEADER_LEN as u32).to_be_bytes());
            record0[0x1c..0x20].copy_from_slice(&65001u32.to_be_bytes());

            let mut flags = 0u32;
            if let Some(records) = &self.exth {
                flags |= EXTH_FLAG;
                record0.extend(RecordTable::new(records.clone()).to_bytes());
            }
            record0[0x80..0x84].copy_from_slice(&flags.to_be_bytes());
            let title_offset = record0.len();
            record0[0x54..0x58].copy_from_slice(&(title_offset as u32).to_be_bytes());
            record0[0x58..0x5c].copy_from_slice(&(self.title.len() as u32).to_be_bytes());
            record0.extend_from_slice(self.title.as_bytes());
            record0.extend_from_slice(&[0, 0]);

            let mut records = vec![record0];
            records.extend(self.text_records.iter().cloned());
            records.extend(self.trailing_records.iter().cloned());

            let mut data = vec![0u8; PDB_HEADER_LEN];
            data[..self.title.len().min(31)].copy_from_slice(&self.title.as_bytes()[..self.title.len().min(31)]);
            data[60..68].copy_from_slice(&self.kind);
            data[76..78].copy_from_slice(&(records.len() as u16).to_be_bytes());

            let mut offset = PDB_HEADER_LEN + records.len() * RECORD_INFO_LEN + 2;
            for (i, record) in records.iter().enumerate() {
                data.extend_from_slice(&(offset as u32).to_be_bytes());
                data.extend_from_slice(&((i as u32) * 2).to_be_bytes());
                offset += record.len();
            }
            data.extend_from_slice(&[0, 0]);
            for record in &records {
                data.extend_from_slice(record);
            }
            data
        }
    }
}
