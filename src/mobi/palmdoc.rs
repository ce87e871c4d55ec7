//! PalmDOC (LZ77 variant) decompression for MOBI text records.

use crate::error::PatchError;

/// Decompresses a single PalmDOC-compressed text record.
pub fn decompress(input: &[u8]) -> Result<Vec<u8>, PatchError> {
    let mut out = Vec::with_capacity(input.len() * 2);
    let mut i = 0;

    while i < input.len() {
        let c = input[i];
        i += 1;

        match c {
            // literal run of the next `c` bytes
            0x01..=0x08 => {
                let run = input.get(i..i + c as usize).ok_or_else(|| {
                    PatchError::Malformed("PalmDOC literal run past end of record".to_string())
                })?;
                out.extend_from_slice(run);
                i += c as usize;
            }
            0x00 | 0x09..=0x7f => out.push(c),
            // back reference: 11 bit distance, 3 bit length
            0x80..=0xbf => {
                let next = *input.get(i).ok_or_else(|| {
                    PatchError::Malformed("PalmDOC back reference truncated".to_string())
                })?;
                i += 1;

                let pair = (u16::from(c) << 8) | u16::from(next);
                let distance = ((pair >> 3) & 0x07ff) as usize;
                let length = (pair & 0x0007) as usize + 3;

                if distance == 0 || distance > out.len() {
                    return Err(PatchError::Malformed(format!(
                        "PalmDOC back reference distance {} with {} bytes decoded",
                        distance,
                        out.len()
                    )));
                }

                // byte-by-byte, the source may overlap the bytes being written
                let start = out.len() - distance;
                for k in 0..length {
                    let byte = out[start + k];
                    out.push(byte);
                }
            }
            // space followed by a character
            0xc0..=0xff => {
                out.push(b' ');
                out.push(c ^ 0x80);
            }
        }
    }

    Ok(out)
}

/// Returns the number of trailing bytes appended to a text record according
/// to the MOBI header's extra data flags.
pub fn trailing_entries_size(record: &[u8], extra_flags: u16) -> usize {
    let mut size = record.len();
    let mut total = 0;

    let mut flags = extra_flags >> 1;
    while flags != 0 {
        if flags & 1 != 0 {
            let entry = backward_varint(&record[..size]);
            total += entry;
            size = size.saturating_sub(entry);
        }
        flags >>= 1;
    }

    if extra_flags & 1 != 0 && size > 0 {
        let multibyte = (record[size - 1] & 0x03) as usize + 1;
        total += multibyte;
    }

    total.min(record.len())
}

/// Reads a variable-width integer stored backwards from the end of `data`.
fn backward_varint(data: &[u8]) -> usize {
    let mut result = 0usize;
    let mut shift = 0;

    for &byte in data.iter().rev() {
        result |= ((byte & 0x7f) as usize) << shift;
        shift += 7;
        if byte & 0x80 != 0 || shift >= 28 {
            break;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_bytes_pass_through() {
        assert_eq!(decompress(b"Hello").unwrap(), b"Hello");
    }

    #[test]
    fn test_literal_run() {
        assert_eq!(decompress(&[0x02, 0xe9, 0xff, b'a']).unwrap(), vec![0xe9, 0xff, b'a']);
    }

    #[test]
    fn test_space_pair() {
        // 0xc1 ^ 0x80 = 'A'
        assert_eq!(decompress(&[b'x', 0xc1]).unwrap(), b"x A");
    }

    #[test]
    fn test_back_reference() {
        // "abc" then copy distance 3, length 3 => 0x80 | (3 << 3) | 0
        let pair: u16 = 0x8000 | (3 << 3);
        let input = [b'a', b'b', b'c', (pair >> 8) as u8, pair as u8];
        assert_eq!(decompress(&input).unwrap(), b"abcabc");
    }

    #[test]
    fn test_overlapping_back_reference() {
        // "ab" then distance 2, length 5 copies out of its own output
        let pair: u16 = 0x8000 | (2 << 3) | 2;
        let input = [b'a', b'b', (pair >> 8) as u8, pair as u8];
        assert_eq!(decompress(&input).unwrap(), b"abababa");
    }

    #[test]
    fn test_invalid_distance() {
        let pair: u16 = 0x8000 | (5 << 3);
        let input = [b'a', (pair >> 8) as u8, pair as u8];
        assert!(decompress(&input).is_err());
    }

    #[test]
    fn test_trailing_entries() {
        // one trailing entry of 3 bytes (size stored as 0x83 in last byte)
        let record = [b'a', b'b', 0x00, 0x00, 0x83];
        assert_eq!(trailing_entries_size(&record, 0b10), 3);
        // multibyte flag only: low two bits of last byte + 1
        let record = [b'a', b'b', 0x01];
        assert_eq!(trailing_entries_size(&record, 0b1), 2);
        assert_eq!(trailing_entries_size(&record, 0), 0);
    }
}
