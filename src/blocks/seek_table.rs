use crate::error::FlacError;
use crate::prelude::*;
use crate::utils::*;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::{Read, Write};

pub struct BlockSeekTable {
    pub seek_points: Vec<SeekPoint>,
}

/// Notes:
/// - For placeholder points, the second and third field values are undefined.
/// - Seek points within a table must be sorted in ascending order by sample number.
/// - Seek points within a table must be unique by sample number, with the exception of placeholder points.
/// - The previous two notes imply that there may be any number of placeholder points, but they must all occur at the end of the table.
#[derive(Debug)]
pub struct SeekPoint {
    // Sample number of first sample in the target frame, or 0xFFFFFFFFFFFFFFFF for a placeholder point.
    pub sample_number: u64,
    // Offset (in bytes) from the first byte of the first frame header to the first byte of the target frame's header.
    pub stream_offset: u64,
    // Number of samples in the target frame.
    pub frame_samples: u16,
}

/// Sentinel `sample_number` marking a seek point not yet filled in by an
/// in-progress encode.
pub const PLACEHOLDER_SAMPLE_NUMBER: u64 = 0xFFFFFFFFFFFFFFFF;

impl SeekPoint {
    pub fn is_placeholder(&self) -> bool {
        self.sample_number == PLACEHOLDER_SAMPLE_NUMBER
    }

    pub fn placeholder() -> Self {
        SeekPoint {
            sample_number: PLACEHOLDER_SAMPLE_NUMBER,
            stream_offset: 0,
            frame_samples: 0,
        }
    }
}

impl Clone for SeekPoint {
    fn clone(&self) -> Self {
        SeekPoint {
            sample_number: self.sample_number,
            stream_offset: self.stream_offset,
            frame_samples: self.frame_samples,
        }
    }
}

impl Decode for BlockSeekTable {
    fn from_reader<R: Read>(reader: &mut R) -> Result<Self> {
        let buf = take_to_end(reader)?;
        let size = buf.len();
        let mut reader = std::io::Cursor::new(buf);

        // The number of seek points is implied by the metadata header 'length' field, i.e. equal to length / 18.
        let points = size / 18;
        let remaining = size % 18;
        if remaining != 0 {
            return Err(FlacError::InvalidSeekTableSize);
        }

        let mut seek_points = Vec::with_capacity(points);
        for _ in 0..points {
            let sample_number = ReadBytesExt::read_u64::<BigEndian>(&mut reader)?;
            let stream_offset = ReadBytesExt::read_u64::<BigEndian>(&mut reader)?;
            let frame_samples = ReadBytesExt::read_u16::<BigEndian>(&mut reader)?;
            seek_points.push(SeekPoint {
                sample_number,
                stream_offset,
                frame_samples,
            });
        }

        Ok(BlockSeekTable { seek_points })
    }
}

impl Encode for BlockSeekTable {
    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        for point in self.seek_points.iter() {
            writer.write_u64::<BigEndian>(point.sample_number)?;
            writer.write_u64::<BigEndian>(point.stream_offset)?;
            writer.write_u16::<BigEndian>(point.frame_samples)?;
        }
        Ok(())
    }
}

impl BlockSeekTable {
    /// Grows or shrinks the seek point list, padding new entries with
    /// placeholders and truncating from the tail when shrinking.
    pub fn resize_points(&mut self, new_size: usize) {
        self.seek_points.resize_with(new_size, SeekPoint::placeholder);
    }

    pub fn set_point(&mut self, index: usize, point: SeekPoint) -> bool {
        match self.seek_points.get_mut(index) {
            Some(slot) => {
                *slot = point;
                true
            }
            None => false,
        }
    }

    pub fn insert_point(&mut self, index: usize, point: SeekPoint) -> bool {
        if index > self.seek_points.len() {
            return false;
        }
        self.seek_points.insert(index, point);
        true
    }

    pub fn delete_point(&mut self, index: usize) -> bool {
        if index >= self.seek_points.len() {
            return false;
        }
        self.seek_points.remove(index);
        true
    }

    /// Checks the two structural invariants of a seek table: ascending
    /// sample-number order and no duplicate non-placeholder sample numbers.
    /// Placeholders are exempt from both checks but must trail all
    /// non-placeholder points, matching the format's note that their
    /// position is otherwise unconstrained among themselves.
    pub fn is_legal(&self) -> bool {
        let mut prev_sample_number: Option<u64> = None;
        let mut seen_placeholder = false;
        for point in &self.seek_points {
            if point.is_placeholder() {
                seen_placeholder = true;
                continue;
            }
            if seen_placeholder {
                return false;
            }
            if let Some(prev) = prev_sample_number {
                if point.sample_number <= prev {
                    return false;
                }
            }
            prev_sample_number = Some(point.sample_number);
        }
        true
    }

    /// Sorts non-placeholder points by ascending sample number and drops
    /// duplicates, moving placeholders to the end.
    pub fn sort(&mut self) {
        self.seek_points.sort_by(|a, b| match (a.is_placeholder(), b.is_placeholder()) {
            (true, true) => std::cmp::Ordering::Equal,
            (true, false) => std::cmp::Ordering::Greater,
            (false, true) => std::cmp::Ordering::Less,
            (false, false) => a.sample_number.cmp(&b.sample_number),
        });
        self.seek_points.dedup_by(|a, b| {
            !a.is_placeholder() && !b.is_placeholder() && a.sample_number == b.sample_number
        });
    }

    /// Seeds placeholder seek points at roughly `interval` samples apart, up
    /// to `total_samples`. Used to pre-allocate a seek table before encoding
    /// begins, so the encoder can fill in `stream_offset`/`frame_samples` as
    /// frames are written.
    pub fn seed_placeholders(&mut self, total_samples: u64, interval: u64) {
        self.seek_points.clear();
        if interval == 0 || total_samples == 0 {
            return;
        }
        let mut sample = 0u64;
        while sample < total_samples {
            self.seek_points.push(SeekPoint {
                sample_number: sample,
                stream_offset: 0,
                frame_samples: 0,
            });
            sample += interval;
        }
    }
}

impl fmt::Debug for BlockSeekTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut prefix = "".to_owned();
        if let Some(width) = f.width() {
            prefix = " ".repeat(width);
        }
        writeln!(
            f,
            "{prefix}seek points: {}",
            self.seek_points.len(),
            prefix = prefix
        )?;
        for (i, p) in self.seek_points.iter().enumerate() {
            if p.is_placeholder() {
                writeln!(f, "{prefix}point {}: PLACEHOLDER", i, prefix = prefix)?;
            } else {
                writeln!(
                    f,
                    "{prefix}point {}: sample_number={}, stream_offset={}, frame_samples={}",
                    i,
                    p.sample_number,
                    p.stream_offset,
                    p.frame_samples,
                    prefix = prefix
                )?;
            }
        }
        Ok(())
    }
}
