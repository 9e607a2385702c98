//! Block Codec + Object Model (spec §4.2, §4.3): the block header
//! (is_last/type/length) wrapped around one of the recognized payload kinds,
//! and the dispatch table tying block type numbers to their codecs.

use crate::blocks::application::BlockApplication;
use crate::blocks::comment::{BlockVorbisComment, UserComment};
use crate::blocks::cue_sheet::{BlockCueSheet, CueSheetTrack, CueSheetTrackIndex};
use crate::blocks::picture::BlockPicture;
use crate::blocks::seek_table::BlockSeekTable;
use crate::blocks::stream_info::BlockStreamInfo;
use crate::error::FlacError;
use crate::prelude::*;
use crate::utils::take;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::{Read, Write};

pub struct MetadataBlock {
    /// Whether this is the last block before the audio frames begin.
    ///
    /// Not trustworthy after mutation; callers (Simple Iterator, Chain) are
    /// responsible for recomputing it across the whole chain before a write,
    /// per the "is_last fixup" design note.
    pub is_last: bool,
    /// Length of the block's payload at **read time**.
    ///
    /// Not trustable after any in-memory edit; use `data.len()` for the
    /// current serialized size.
    pub length: usize,
    pub data: MetadataBlockData,
}

impl Decode for MetadataBlock {
    fn from_reader<R: Read>(reader: &mut R) -> Result<Self> {
        let first_byte = reader.read_u8()?;
        let block_type = first_byte & 0b0111_1111;
        let length = reader.read_u24::<BigEndian>()? as usize;
        Ok(MetadataBlock {
            is_last: first_byte & 0b1000_0000 > 0,
            length,
            data: match block_type {
                0 => MetadataBlockData::StreamInfo(BlockStreamInfo::from_reader(
                    &mut reader.take(length as u64),
                )?),
                1 => MetadataBlockData::Padding(crate::utils::skip(reader, length)? as usize),
                2 => MetadataBlockData::Application(BlockApplication::from_reader_sized(
                    reader, length,
                )?),
                3 => MetadataBlockData::SeekTable(BlockSeekTable::from_reader(
                    &mut reader.take(length as u64),
                )?),
                4 => MetadataBlockData::Comment(BlockVorbisComment::from_reader(
                    &mut reader.take(length as u64),
                )?),
                5 => MetadataBlockData::CueSheet(BlockCueSheet::from_reader(
                    &mut reader.take(length as u64),
                )?),
                6 => MetadataBlockData::Picture(BlockPicture::from_reader(
                    &mut reader.take(length as u64),
                )?),
                0x7f => return Err(FlacError::InvalidBlockType),
                _ => MetadataBlockData::Unknown((block_type, take(reader, length)?)),
            },
        })
    }
}

impl Encode for MetadataBlock {
    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8((if self.is_last { 0b1000_0000 } else { 0 }) + u8::from(&self.data))?;
        writer.write_u24::<BigEndian>(self.data.len() as u32)?;
        match &self.data {
            MetadataBlockData::StreamInfo(s) => s.write_to(writer)?,
            MetadataBlockData::Padding(p) => {
                for _ in 0..*p {
                    writer.write_u8(0)?;
                }
            }
            MetadataBlockData::Application(a) => a.write_to(writer)?,
            MetadataBlockData::SeekTable(s) => s.write_to(writer)?,
            MetadataBlockData::Comment(c) => c.write_to(writer)?,
            MetadataBlockData::CueSheet(c) => c.write_to(writer)?,
            MetadataBlockData::Picture(p) => p.write_to(writer)?,
            MetadataBlockData::Unknown((_, data)) => writer.write_all(data)?,
        }
        Ok(())
    }
}

impl MetadataBlock {
    pub fn new(data: MetadataBlockData) -> Self {
        MetadataBlock {
            is_last: false,
            length: data.len(),
            data,
        }
    }

    /// Clones this block including its payload. `MetadataBlockData` isn't
    /// `Clone` directly (the per-kind codecs carry borrowed-at-decode-time
    /// buffers of varying shapes) so this matches them by hand, the same
    /// split the original's `metadata_object.c` object-clone table uses.
    pub fn deep_clone(&self) -> MetadataBlock {
        MetadataBlock {
            is_last: self.is_last,
            length: self.length,
            data: self.data.deep_clone(),
        }
    }

    pub fn write_summary(&self, dst: &mut dyn Write, i: usize) -> std::io::Result<()> {
        let data = &self.data;
        writeln!(dst, "METADATA block #{}", i)?;
        writeln!(dst, "  type: {} ({})", u8::from(data), data.as_str())?;
        writeln!(dst, "  is last: {}", self.is_last)?;
        writeln!(dst, "  length: {}", data.len())?;
        writeln!(dst, "{:2?}", data)
    }
}

pub enum MetadataBlockData {
    StreamInfo(BlockStreamInfo),
    Padding(usize),
    Application(BlockApplication),
    SeekTable(BlockSeekTable),
    Comment(BlockVorbisComment),
    CueSheet(BlockCueSheet),
    Picture(BlockPicture),
    /// An opaque, unrecognized block type (0x02..0x7e past what this crate
    /// knows, or re-read from a file that used an application-private type).
    /// 0x7f is reserved by the format and rejected outright at decode time.
    Unknown((u8, Vec<u8>)),
}

impl From<&MetadataBlockData> for u8 {
    fn from(data: &MetadataBlockData) -> Self {
        match data {
            MetadataBlockData::StreamInfo(_) => 0,
            MetadataBlockData::Padding(_) => 1,
            MetadataBlockData::Application(_) => 2,
            MetadataBlockData::SeekTable(_) => 3,
            MetadataBlockData::Comment(_) => 4,
            MetadataBlockData::CueSheet(_) => 5,
            MetadataBlockData::Picture(_) => 6,
            MetadataBlockData::Unknown((t, _)) => *t,
        }
    }
}

impl MetadataBlockData {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataBlockData::StreamInfo(_) => "STREAMINFO",
            MetadataBlockData::Padding(_) => "PADDING",
            MetadataBlockData::Application(_) => "APPLICATION",
            MetadataBlockData::SeekTable(_) => "SEEKTABLE",
            MetadataBlockData::Comment(_) => "VORBIS_COMMENT",
            MetadataBlockData::CueSheet(_) => "CUESHEET",
            MetadataBlockData::Picture(_) => "PICTURE",
            MetadataBlockData::Unknown(_) => "UNKNOWN",
        }
    }

    /// Current serialized payload size. Recomputed from the in-memory
    /// representation rather than cached, so a mutation can never leave the
    /// block's advertised length out of sync with what `write_to` emits.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        match self {
            MetadataBlockData::StreamInfo(_) => 34,
            MetadataBlockData::Padding(p) => *p,
            MetadataBlockData::Application(a) => a.data.len() + 4,
            MetadataBlockData::SeekTable(t) => t.seek_points.len() * 18,
            MetadataBlockData::Comment(c) => {
                8 + c.vendor_string.len() + c.comments.iter().map(|c| 4 + c.len()).sum::<usize>()
            }
            MetadataBlockData::CueSheet(c) => {
                396 + c
                    .tracks
                    .iter()
                    .map(|t| 36 + t.track_index.len() * 12)
                    .sum::<usize>()
            }
            MetadataBlockData::Picture(p) => {
                32 + p.mime_type.len() + p.description.len() + p.data.len()
            }
            MetadataBlockData::Unknown((_, arr)) => arr.len(),
        }
    }

    pub fn is_padding(&self) -> bool {
        matches!(self, MetadataBlockData::Padding(_))
    }

    fn deep_clone(&self) -> MetadataBlockData {
        match self {
            MetadataBlockData::StreamInfo(s) => MetadataBlockData::StreamInfo(BlockStreamInfo {
                min_block_size: s.min_block_size,
                max_block_size: s.max_block_size,
                min_frame_size: s.min_frame_size,
                max_frame_size: s.max_frame_size,
                sample_rate: s.sample_rate,
                channels: s.channels,
                bits_per_sample: s.bits_per_sample,
                total_samples: s.total_samples,
                md5_signature: s.md5_signature,
            }),
            MetadataBlockData::Padding(p) => MetadataBlockData::Padding(*p),
            MetadataBlockData::Application(a) => MetadataBlockData::Application(a.clone()),
            MetadataBlockData::SeekTable(t) => MetadataBlockData::SeekTable(BlockSeekTable {
                seek_points: t.seek_points.clone(),
            }),
            MetadataBlockData::Comment(c) => MetadataBlockData::Comment(BlockVorbisComment {
                vendor_string: c.vendor_string.clone(),
                comments: c
                    .comments
                    .iter()
                    .map(|c| UserComment::new(c.entry()))
                    .collect(),
            }),
            MetadataBlockData::CueSheet(c) => MetadataBlockData::CueSheet(BlockCueSheet {
                catalog: c.catalog.clone(),
                leadin_samples: c.leadin_samples,
                is_cd: c.is_cd,
                track_number: c.track_number,
                tracks: c
                    .tracks
                    .iter()
                    .map(|t| CueSheetTrack {
                        track_offset: t.track_offset,
                        track_number: t.track_number,
                        isrc: t.isrc,
                        is_audio: t.is_audio,
                        is_pre_emphasis: t.is_pre_emphasis,
                        index_point_number: t.index_point_number,
                        track_index: t
                            .track_index
                            .iter()
                            .map(|i| CueSheetTrackIndex {
                                sample_offset: i.sample_offset,
                                index_point: i.index_point,
                            })
                            .collect(),
                    })
                    .collect(),
            }),
            MetadataBlockData::Picture(p) => MetadataBlockData::Picture(BlockPicture {
                picture_type: p.picture_type,
                mime_type: p.mime_type.clone(),
                description: p.description.clone(),
                width: p.width,
                height: p.height,
                depth: p.depth,
                colors: p.colors,
                data: p.data.clone(),
            }),
            MetadataBlockData::Unknown((t, data)) => MetadataBlockData::Unknown((*t, data.clone())),
        }
    }
}

impl fmt::Debug for MetadataBlockData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = f.width().unwrap_or(0);
        match self {
            MetadataBlockData::Padding(_) => Ok(()),
            MetadataBlockData::Unknown(_) => Ok(()),
            MetadataBlockData::StreamInfo(s) => write!(f, "{:prefix$?}", s, prefix = prefix),
            MetadataBlockData::Application(s) => write!(f, "{:?}", s),
            MetadataBlockData::SeekTable(s) => write!(f, "{:prefix$?}", s, prefix = prefix),
            MetadataBlockData::Comment(s) => write!(f, "{:prefix$?}", s, prefix = prefix),
            MetadataBlockData::CueSheet(s) => write!(f, "{:prefix$?}", s, prefix = prefix),
            MetadataBlockData::Picture(s) => write!(f, "{:?}", s),
        }
    }
}
