//! EXTH record table: the length-prefixed `(code, payload)` metadata table
//! stored in record 0 of a MOBI container.

use crate::error::PatchError;

/// Magic tag opening an EXTH block.
pub const EXTH_MAGIC: &[u8; 4] = b"EXTH";

/// Size of the `magic + length + count` block header.
const BLOCK_HEADER_LEN: usize = 12;

/// Size of the `code + length` header in front of every record payload.
const RECORD_HEADER_LEN: usize = 8;

/// A single EXTH record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExthRecord {
    /// Numeric record code (e.g. 100 author, 113 ASIN, 504 ASIN).
    pub code: u32,
    /// Raw payload bytes.
    pub data: Vec<u8>,
}

impl ExthRecord {
    pub fn new(code: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            code,
            data: data.into(),
        }
    }
}

/// Ordered set of EXTH records.
///
/// Records with repeated codes are legal (several authors, several subjects)
/// and are kept as separate entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordTable {
    records: Vec<ExthRecord>,
}

impl RecordTable {
    pub fn new(records: Vec<ExthRecord>) -> Self {
        Self { records }
    }

    /// Parses an EXTH block starting at its magic tag.
    pub fn parse(bytes: &[u8]) -> Result<Self, PatchError> {
        if bytes.len() < BLOCK_HEADER_LEN || &bytes[..4] != EXTH_MAGIC {
            return Err(PatchError::Malformed("EXTH magic not found".to_string()));
        }

        let count = read_u32(bytes, 8)? as usize;
        let mut records = Vec::with_capacity(count.min(1024));
        let mut pos = BLOCK_HEADER_LEN;

        for index in 0..count {
            let code = read_u32(bytes, pos)?;
            let len = read_u32(bytes, pos + 4)? as usize;
            if len < RECORD_HEADER_LEN {
                return Err(PatchError::Malformed(format!(
                    "EXTH record {} declares length {}",
                    index, len
                )));
            }

            let data = bytes
                .get(pos + RECORD_HEADER_LEN..pos + len)
                .ok_or_else(|| {
                    PatchError::Malformed(format!("EXTH record {} runs past record 0", index))
                })?;
            records.push(ExthRecord::new(code, data));
            pos += len;
        }

        Ok(Self { records })
    }

    /// Returns all records in table order.
    pub fn records(&self) -> &[ExthRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the payload of the first record with the given code.
    pub fn get(&self, code: u32) -> Option<&[u8]> {
        self.records
            .iter()
            .find(|r| r.code == code)
            .map(|r| r.data.as_slice())
    }

    /// Builds a new table in which every record with one of `replacements`'
    /// codes is dropped in favour of the replacement, sorted by ascending code.
    ///
    /// The sort is stable, so repeated codes keep their original order.
    pub fn with_replacements(&self, replacements: Vec<ExthRecord>) -> Self {
        let replaced: Vec<u32> = replacements.iter().map(|r| r.code).collect();
        let mut records = replacements;
        records.extend(
            self.records
                .iter()
                .filter(|r| !replaced.contains(&r.code))
                .cloned(),
        );
        records.sort_by_key(|r| r.code);
        Self { records }
    }

    /// Serializes the table as a complete EXTH block.
    ///
    /// The length field covers the magic, header and records but not the
    /// trailing pad. The pad is always between 1 and 4 zero bytes, so an
    /// already aligned table still gets 4 of them.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for record in &self.records {
            body.extend_from_slice(&record.code.to_be_bytes());
            body.extend_from_slice(&((record.data.len() + RECORD_HEADER_LEN) as u32).to_be_bytes());
            body.extend_from_slice(&record.data);
        }

        let pad = 4 - body.len() % 4;

        let mut block = Vec::with_capacity(BLOCK_HEADER_LEN + body.len() + pad);
        block.extend_from_slice(EXTH_MAGIC);
        block.extend_from_slice(&((body.len() + BLOCK_HEADER_LEN) as u32).to_be_bytes());
        block.extend_from_slice(&(self.records.len() as u32).to_be_bytes());
        block.extend_from_slice(&body);
        block.resize(block.len() + pad, 0);
        block
    }
}

/// Reads a big-endian `u32` at `pos`.
pub(crate) fn read_u32(bytes: &[u8], pos: usize) -> Result<u32, PatchError> {
    bytes
        .get(pos..pos + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| PatchError::Malformed(format!("unexpected end of data at offset {}", pos)))
}
