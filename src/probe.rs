//! File Probe (spec §4.4): locate the start of the metadata block sequence,
//! skipping an optional ID3v2 tag prefix and verifying the `fLaC` magic.

use crate::error::FlacError;
use crate::prelude::*;
use crate::utils;
use std::io::{Read, Seek};

const SIGNATURE: [u8; 4] = *b"fLaC";

/// Reads past an optional ID3v2 tag, then verifies the `fLaC` signature.
/// Returns the absolute byte offset of the first metadata block header.
///
/// `reader` must be positioned at the very start of the file.
pub fn probe_start<R: Read + Seek>(reader: &mut R) -> Result<u64> {
    let mut head = [0u8; 4];
    read_exact_or_io(reader, &mut head)?;

    if &head[0..3] == b"ID3" {
        // head[3] is the ID3v2 major version; one more byte for the
        // revision, then a flags byte, then the syncsafe length.
        let mut skip_buf = [0u8; 2];
        read_exact_or_io(reader, &mut skip_buf)?;

        let mut len_buf = [0u8; 4];
        read_exact_or_io(reader, &mut len_buf)?;
        let mut tag_len: u32 = 0;
        for b in len_buf {
            if b & 0x80 != 0 {
                return Err(FlacError::InvalidMagicNumber);
            }
            tag_len = (tag_len << 7) | (b & 0x7f) as u32;
        }
        utils::skip(reader, tag_len as usize).map_err(FlacError::Io)?;

        read_exact_or_io(reader, &mut head)?;
    }

    if head != SIGNATURE {
        return Err(FlacError::InvalidMagicNumber);
    }

    reader
        .stream_position()
        .map_err(FlacError::Io)
}

fn read_exact_or_io<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(FlacError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn plain_signature() {
        let mut data = Cursor::new(b"fLaC".to_vec());
        assert_eq!(probe_start(&mut data).unwrap(), 4);
    }

    #[test]
    fn skips_id3v2() {
        let mut data = vec![b'I', b'D', b'3', 3, 0, 0];
        // syncsafe length = 5 (100 bytes in the spec example; keep it small here)
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x05]);
        data.extend_from_slice(&[0u8; 5]);
        data.extend_from_slice(b"fLaC");
        let mut cursor = Cursor::new(data);
        assert_eq!(probe_start(&mut cursor).unwrap(), 10 + 5 + 4);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut data = Cursor::new(b"OggS".to_vec());
        assert!(probe_start(&mut data).is_err());
    }
}
