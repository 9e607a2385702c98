//! Seektable-during-encode protocol (spec §4.7): the hooks a seekable-output
//! FLAC encoder calls as it writes frames, so the SEEKTABLE's placeholder
//! points get filled in as the matching frames are found, and STREAMINFO /
//! SEEKTABLE are patched up by absolute byte offset once encoding finishes.
//!
//! Grounded in `original_source/src/libFLAC/seekable_stream_encoder.c`'s
//! `write_callback_`/`metadata_callback_` pair: `first_seekpoint_to_check`
//! bounds the per-frame scan so it's amortized linear across the whole
//! encode rather than quadratic, and the finish step patches MD5/total
//! samples/min+max frame size into STREAMINFO and the filled points into
//! SEEKTABLE by the byte offsets recorded when those blocks were written.
//! This crate doesn't implement the encoder itself (out of scope, per the
//! "external collaborators" list); it only owns the seek-point bookkeeping
//! an encoder would drive.

use crate::blocks::{BlockSeekTable, SeekPoint};
use crate::prelude::*;
use std::io::{Read, Seek, SeekFrom, Write};

/// Tracks where STREAMINFO and SEEKTABLE landed in the output stream, and
/// fills a seek table's placeholder points in as matching frames are
/// written. Constructed once per encode; `finish` consumes it.
pub struct EncodeProgress {
    seek_table: BlockSeekTable,
    streaminfo_offset: Option<u64>,
    seektable_offset: Option<u64>,
    audio_offset: Option<u64>,
    first_seekpoint_to_check: usize,
    samples_written: u64,
    min_frame_size: u32,
    max_frame_size: u32,
}

impl EncodeProgress {
    /// `seek_table` should already hold the placeholder points to fill
    /// (e.g. from [`BlockSeekTable::seed_placeholders`]).
    pub fn new(seek_table: BlockSeekTable) -> Self {
        EncodeProgress {
            seek_table,
            streaminfo_offset: None,
            seektable_offset: None,
            audio_offset: None,
            first_seekpoint_to_check: 0,
            samples_written: 0,
            min_frame_size: 0,
            max_frame_size: 0,
        }
    }

    /// Called once per metadata block as it's written, at `output_pos` (the
    /// block header's absolute byte offset). Records STREAMINFO's and the
    /// first SEEKTABLE's offsets for the finishing patch-up, and, once the
    /// last metadata block has gone by, the position audio frames start at.
    pub fn on_block_header_written(&mut self, block_type: u8, output_pos: u64, is_last: bool) {
        match block_type {
            0 => self.streaminfo_offset = Some(output_pos),
            3 if self.seektable_offset.is_none() => self.seektable_offset = Some(output_pos),
            _ => {}
        }
        if is_last {
            // audio_offset is resolved by the caller once it knows this
            // block's on-disk length; see `on_audio_start`.
        }
    }

    /// Called once, right after the last metadata block (and its length)
    /// have been written, with the absolute byte offset the first frame
    /// will start at.
    pub fn on_audio_start(&mut self, audio_offset: u64) {
        self.audio_offset = Some(audio_offset);
    }

    /// Called after each frame is written. `first_sample` is the frame's
    /// first sample number, `block_size` its sample count, `frame_len` its
    /// encoded byte length, and `output_pos` the absolute byte offset its
    /// header started at.
    pub fn on_frame_written(
        &mut self,
        first_sample: u64,
        block_size: u32,
        frame_len: u32,
        output_pos: u64,
    ) {
        let audio_offset = match self.audio_offset {
            Some(o) => o,
            None => return,
        };
        let last_sample = first_sample + block_size as u64 - 1;

        let n = self.seek_table.seek_points.len();
        while self.first_seekpoint_to_check < n {
            let i = self.first_seekpoint_to_check;
            let test_sample = self.seek_table.seek_points[i].sample_number;
            if test_sample > last_sample {
                break;
            } else if test_sample >= first_sample {
                self.seek_table.seek_points[i] = SeekPoint {
                    sample_number: first_sample,
                    stream_offset: output_pos - audio_offset,
                    frame_samples: block_size as u16,
                };
                self.first_seekpoint_to_check += 1;
                // Deliberately no `break`: a seek table can have more than
                // one placeholder land inside this frame; duplicates get
                // cleaned up by `BlockSeekTable::sort` at `finish`.
            } else {
                self.first_seekpoint_to_check += 1;
            }
        }

        self.samples_written += block_size as u64;
        if self.min_frame_size == 0 || frame_len < self.min_frame_size {
            self.min_frame_size = frame_len;
        }
        if frame_len > self.max_frame_size {
            self.max_frame_size = frame_len;
        }
    }

    /// Patches STREAMINFO (md5, total samples, min/max frame size) and
    /// SEEKTABLE in place at their recorded byte offsets, using `writer`'s
    /// seek capability. Sorts and deduplicates the seek table before
    /// writing it back.
    pub fn finish<W: Read + Write + Seek>(
        &mut self,
        writer: &mut W,
        total_samples: u64,
        md5_signature: [u8; 16],
    ) -> Result<()> {
        self.seek_table.sort();

        if let Some(offset) = self.streaminfo_offset {
            writer.seek(SeekFrom::Start(offset + 4))?; // past block header
            patch_stream_info(
                writer,
                self.min_frame_size,
                self.max_frame_size,
                total_samples,
                &md5_signature,
            )?;
        }

        if let Some(offset) = self.seektable_offset {
            writer.seek(SeekFrom::Start(offset + 4))?;
            self.seek_table.write_to(writer)?;
        }

        Ok(())
    }
}

/// Overwrites STREAMINFO's min/max frame size, total samples and MD5
/// fields in place, leaving min/max block size, sample rate, and channel
/// count untouched (those are known before encoding starts).
fn patch_stream_info<W: Read + Write + Seek>(
    writer: &mut W,
    min_frame_size: u32,
    max_frame_size: u32,
    total_samples: u64,
    md5_signature: &[u8; 16],
) -> Result<()> {
    use byteorder::{BigEndian, WriteBytesExt};

    // Skip min/max block size (4 bytes), patch min/max frame size (6 bytes).
    writer.seek(SeekFrom::Current(4))?;
    writer.write_u24::<BigEndian>(min_frame_size)?;
    writer.write_u24::<BigEndian>(max_frame_size)?;

    // sample_rate/channels/bits_per_sample/total_samples share an 8-byte
    // region (see `BlockStreamInfo`'s bit layout); re-read it so only
    // total_samples' low 36 bits (byte 3's low nibble plus bytes 4-7)
    // change, leaving sample_rate/channels/bits_per_sample untouched.
    let mut region = [0u8; 8];
    writer.read_exact(&mut region)?;
    let preserved_high_nibble = region[3] & 0b1111_0000;
    region[3] = preserved_high_nibble | ((total_samples >> 32) as u8 & 0b0000_1111);
    region[4] = (total_samples >> 24) as u8;
    region[5] = (total_samples >> 16) as u8;
    region[6] = (total_samples >> 8) as u8;
    region[7] = total_samples as u8;
    writer.seek(SeekFrom::Current(-8))?;
    writer.write_all(&region)?;

    writer.write_all(md5_signature)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::BlockSeekTable;

    fn table_with_placeholders(samples: &[u64]) -> BlockSeekTable {
        BlockSeekTable {
            seek_points: samples
                .iter()
                .map(|&s| SeekPoint {
                    sample_number: s,
                    stream_offset: 0,
                    frame_samples: 0,
                })
                .collect(),
        }
    }

    #[test]
    fn fills_matching_seek_points() {
        let mut progress = EncodeProgress::new(table_with_placeholders(&[0, 4096, 8192]));
        progress.on_audio_start(1000);
        progress.on_frame_written(0, 4096, 500, 1000);
        progress.on_frame_written(4096, 4096, 500, 1500);

        assert_eq!(progress.seek_table.seek_points[0].stream_offset, 0);
        assert_eq!(progress.seek_table.seek_points[1].stream_offset, 500);
        assert_eq!(progress.seek_table.seek_points[2].sample_number, 8192);
    }

    #[test]
    fn tracks_min_max_frame_size() {
        let mut progress = EncodeProgress::new(table_with_placeholders(&[]));
        progress.on_audio_start(100);
        progress.on_frame_written(0, 4096, 300, 100);
        progress.on_frame_written(4096, 4096, 900, 400);
        assert_eq!(progress.min_frame_size, 300);
        assert_eq!(progress.max_frame_size, 900);
    }
}
