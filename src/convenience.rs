//! Read-only convenience view (spec §4.3's "tier 1" API): parses a whole
//! file into memory and exposes its blocks without any write path. Mutating
//! a FLAC file goes through [`crate::SimpleIterator`] or [`crate::Chain`]
//! instead, per the "read-only convenience view" design note.

use crate::blocks::{BlockVorbisComment, MetadataBlock, MetadataBlockData};
use crate::error::FlacError;
use crate::prelude::*;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

pub struct FlacHeader {
    pub blocks: Vec<MetadataBlock>,
    pub path: PathBuf,
    frame_offset: usize,
}

impl FlacHeader {
    /// Parses a whole file's metadata block sequence, skipping a leading
    /// ID3v2 tag if present (spec §3.2/§4.4's File Probe).
    pub fn parse<R: Read + Seek>(reader: &mut R, path: PathBuf) -> Result<FlacHeader> {
        let start = crate::probe::probe_start(reader)?;

        let stream_info = MetadataBlock::from_reader(reader)?;
        match stream_info.data {
            MetadataBlockData::StreamInfo(_) => {}
            _ => return Err(FlacError::InvalidFirstBlock),
        }

        let mut is_last = stream_info.is_last;
        let mut blocks = vec![stream_info];
        let mut frame_offset = start as usize + 4 + 34;
        while !is_last {
            let block = MetadataBlock::from_reader(reader)?;
            frame_offset += 4 + block.data.len();
            is_last = block.is_last;
            blocks.push(block);
        }
        Ok(FlacHeader {
            blocks,
            path,
            frame_offset,
        })
    }

    pub fn from_file<P: AsRef<Path>>(filename: P) -> Result<FlacHeader> {
        let mut file = File::open(filename.as_ref())?;
        Self::parse(&mut file, filename.as_ref().to_path_buf())
    }

    /// Byte offset of the first audio frame, as observed at parse time.
    pub fn frame_offset(&self) -> usize {
        self.frame_offset
    }

    pub fn stream_info(&self) -> &crate::blocks::BlockStreamInfo {
        match &self.blocks[0].data {
            MetadataBlockData::StreamInfo(i) => i,
            _ => unreachable!("first block is always STREAMINFO, enforced at parse time"),
        }
    }

    fn block_of(&self, id: u8) -> Option<&MetadataBlock> {
        self.blocks.iter().find(|block| u8::from(&block.data) == id)
    }

    pub fn comments(&self) -> Option<&BlockVorbisComment> {
        self.block_of(4).map(|b| match &b.data {
            MetadataBlockData::Comment(c) => c,
            _ => unreachable!(),
        })
    }

    pub fn picture(&self) -> Option<&crate::blocks::BlockPicture> {
        self.block_of(6).map(|b| match &b.data {
            MetadataBlockData::Picture(p) => p,
            _ => unreachable!(),
        })
    }

    pub fn cue_sheet(&self) -> Option<&crate::blocks::BlockCueSheet> {
        self.block_of(5).map(|b| match &b.data {
            MetadataBlockData::CueSheet(c) => c,
            _ => unreachable!(),
        })
    }

    pub fn seek_table(&self) -> Option<&crate::blocks::BlockSeekTable> {
        self.block_of(3).map(|b| match &b.data {
            MetadataBlockData::SeekTable(s) => s,
            _ => unreachable!(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::BlockStreamInfo;
    use std::io::Cursor;

    fn sample_bytes() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"fLaC");
        // STREAMINFO header: is_last=true, type=0, length=34
        buf.push(0b1000_0000);
        buf.extend_from_slice(&[0, 0, 34]);
        let info = BlockStreamInfo {
            min_block_size: 4096,
            max_block_size: 4096,
            min_frame_size: 0,
            max_frame_size: 0,
            sample_rate: 44100,
            channels: 2,
            bits_per_sample: 16,
            total_samples: 0,
            md5_signature: [0; 16],
        };
        info.write_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn parses_stream_info_only_file() {
        let bytes = sample_bytes();
        let mut cursor = Cursor::new(bytes);
        let header = FlacHeader::parse(&mut cursor, PathBuf::from("test.flac")).unwrap();
        assert_eq!(header.blocks.len(), 1);
        assert_eq!(header.stream_info().sample_rate, 44100);
        assert!(header.comments().is_none());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut cursor = Cursor::new(b"OggS".to_vec());
        assert!(FlacHeader::parse(&mut cursor, PathBuf::from("x")).is_err());
    }
}
