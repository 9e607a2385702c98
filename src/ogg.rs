//! Ogg encapsulation rewrite adapter (spec §4.8): edits a FLAC-in-Ogg
//! stream's metadata by rewriting the Ogg page(s) that carry it, rather
//! than the bare `fLaC` container `Chain`/`SimpleIterator` handle.
//!
//! Page header layout and the zero-the-checksum-then-CRC technique are
//! grounded in `pdeljanov-Symphonia`'s `symphonia-format-ogg/src/page.rs`
//! (`PageHeader`, `read_page_header`, `sync_page`). The CRC32 variant Ogg
//! uses (polynomial 0x04c11db7, non-reflected, no final XOR) is treated as
//! an opaque helper the adapter consumes, matching how spec.md frames the
//! Ogg CRC logic as an external collaborator it doesn't re-derive.

use crate::error::FlacError;
use crate::prelude::*;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

const OGG_PAGE_MARKER: [u8; 4] = *b"OggS";
const OGG_PAGE_HEADER_SIZE: usize = 27;

#[derive(Copy, Clone, Default)]
pub struct PageHeader {
    pub version: u8,
    pub flags: u8,
    pub absgp: u64,
    pub serial: u32,
    pub sequence: u32,
    pub crc: u32,
    pub n_segments: u8,
}

/// One Ogg page: header, segment table, and payload.
pub struct Page {
    pub header: PageHeader,
    pub segment_table: Vec<u8>,
    pub data: Vec<u8>,
}

impl Page {
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut marker = [0u8; 4];
        reader.read_exact(&mut marker)?;
        if marker != OGG_PAGE_MARKER {
            return Err(FlacError::InvalidMagicNumber);
        }

        let version = reader.read_u8()?;
        let flags = reader.read_u8()?;
        let absgp = reader.read_u64::<LittleEndian>()?;
        let serial = reader.read_u32::<LittleEndian>()?;
        let sequence = reader.read_u32::<LittleEndian>()?;
        let crc = reader.read_u32::<LittleEndian>()?;
        let n_segments = reader.read_u8()?;

        let mut segment_table = vec![0u8; n_segments as usize];
        reader.read_exact(&mut segment_table)?;
        let data_len: usize = segment_table.iter().map(|&b| b as usize).sum();
        let mut data = vec![0u8; data_len];
        reader.read_exact(&mut data)?;

        Ok(Page {
            header: PageHeader {
                version,
                flags,
                absgp,
                serial,
                sequence,
                crc,
                n_segments,
            },
            segment_table,
            data,
        })
    }

    /// Total on-disk size of this page (header + segment table + payload).
    pub fn encoded_len(&self) -> usize {
        OGG_PAGE_HEADER_SIZE + self.segment_table.len() + self.data.len()
    }

    /// Serializes the page, recomputing its CRC (the original's technique:
    /// write the page with the checksum field zeroed, CRC the whole thing,
    /// then patch the checksum bytes in).
    pub fn write_to<W: Write>(&mut self, writer: &mut W) -> Result<()> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&OGG_PAGE_MARKER);
        buf.push(self.header.version);
        buf.push(self.header.flags);
        buf.extend_from_slice(&self.header.absgp.to_le_bytes());
        buf.extend_from_slice(&self.header.serial.to_le_bytes());
        buf.extend_from_slice(&self.header.sequence.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // checksum placeholder
        buf.push(self.header.n_segments);
        buf.extend_from_slice(&self.segment_table);
        buf.extend_from_slice(&self.data);

        let crc = crc32_ogg(&buf);
        buf[22..26].copy_from_slice(&crc.to_le_bytes());
        self.header.crc = crc;

        writer.write_all(&buf)?;
        Ok(())
    }
}

/// Ogg's CRC-32 variant: polynomial 0x04c11db7, non-reflected, initial
/// value 0, no final XOR. This is consumed as an opaque primitive by the
/// page (re)writer above; its derivation isn't otherwise load-bearing here.
fn crc32_ogg(data: &[u8]) -> u32 {
    const POLY: u32 = 0x04c1_1db7;
    let mut crc: u32 = 0;
    for &byte in data {
        crc ^= (byte as u32) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Rewrites the FLAC metadata packet(s) carried in the first Ogg page(s) of
/// a FLAC-in-Ogg stream. `edit` receives the concatenated packet payload
/// (the native `fLaC` container bytes with Ogg framing stripped) and must
/// return a replacement of the *same length* -- Ogg page boundaries encode
/// packet lengths in the segment table, so a size change would require
/// resegmenting (and likely repaginating) every page that follows, which
/// this adapter deliberately does not attempt, per spec's reject-on-size-
/// change rule.
pub struct OggFlacRewriter;

impl OggFlacRewriter {
    /// Reads every page up front, applies `edit` to the concatenation of
    /// their payloads, and re-serializes all pages (with updated CRCs) if
    /// the edited payload is the same length as before.
    pub fn rewrite<F>(input: &[u8], edit: F) -> Result<Vec<u8>>
    where
        F: FnOnce(&[u8]) -> Vec<u8>,
    {
        let mut reader = Cursor::new(input);
        let mut pages = Vec::new();
        while (reader.position() as usize) < input.len() {
            pages.push(Page::read(&mut reader)?);
        }

        let original_len: usize = pages.iter().map(|p| p.data.len()).sum();
        let combined: Vec<u8> = pages.iter().flat_map(|p| p.data.iter().copied()).collect();
        let edited = edit(&combined);

        if edited.len() != original_len {
            return Err(FlacError::InconsistentLength);
        }

        let mut offset = 0;
        for page in pages.iter_mut() {
            let len = page.data.len();
            page.data = edited[offset..offset + len].to_vec();
            offset += len;
        }

        let mut out = Vec::with_capacity(input.len());
        for page in pages.iter_mut() {
            page.write_to(&mut out)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_page(data: &[u8]) -> Page {
        Page {
            header: PageHeader {
                version: 0,
                flags: 0x02,
                absgp: 0,
                serial: 1,
                sequence: 0,
                crc: 0,
                n_segments: 1,
            },
            segment_table: vec![data.len() as u8],
            data: data.to_vec(),
        }
    }

    #[test]
    fn round_trips_a_page() {
        let mut page = sample_page(b"hello");
        let mut buf = Vec::new();
        page.write_to(&mut buf).unwrap();

        let mut cursor = Cursor::new(buf);
        let parsed = Page::read(&mut cursor).unwrap();
        assert_eq!(parsed.data, b"hello");
        assert_eq!(parsed.header.crc, page.header.crc);
    }

    #[test]
    fn rejects_size_changing_edit() {
        let mut page = sample_page(b"hello");
        let mut buf = Vec::new();
        page.write_to(&mut buf).unwrap();

        let result = OggFlacRewriter::rewrite(&buf, |data| {
            let mut v = data.to_vec();
            v.push(b'!');
            v
        });
        assert!(result.is_err());
    }

    #[test]
    fn accepts_same_size_edit() {
        let mut page = sample_page(b"hello");
        let mut buf = Vec::new();
        page.write_to(&mut buf).unwrap();

        let result = OggFlacRewriter::rewrite(&buf, |data| {
            data.iter().map(|b| b.to_ascii_uppercase()).collect()
        });
        let out = result.unwrap();
        let mut cursor = Cursor::new(out);
        let parsed = Page::read(&mut cursor).unwrap();
        assert_eq!(parsed.data, b"HELLO");
    }
}
