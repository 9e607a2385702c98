//! Simple Iterator (spec §4.5): a single cursor over a file's metadata
//! block chain, writing edits back in place when possible and falling back
//! to a whole-file rewrite when a block grows past the space available in
//! the original file.
//!
//! Grounded in `original_source/src/libFLAC/metadata_iterators.c`'s
//! `FLAC__Metadata_SimpleIterator` family (`write_metadata_block_stationary_`,
//! `write_metadata_block_stationary_with_padding_`, `rewrite_whole_file_`)
//! for the state machine, and in the teacher's `header.rs::save`/`format` for
//! the Rust shape of the padding-reconciliation arithmetic.

use crate::blocks::{MetadataBlock, MetadataBlockData};
use crate::error::{FlacError, IteratorStatus};
use crate::prelude::*;
use crate::utils::PreservedStats;
use byteorder::{BigEndian, ReadBytesExt};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const HEADER_LEN: u64 = 4; // 1 byte type/is_last + 3 byte length

/// Maximum depth of the offset stack `push_offset`/`pop_offset` maintain.
/// The original bounds this the same way; nothing in this format needs more
/// than a couple of saved positions (e.g. "remember where STREAMINFO was
/// while visiting a later block").
const MAX_OFFSET_STACK_DEPTH: usize = 5;

/// Describes how to commit an edited block back to disk, as a pure function
/// of the old and new encoded sizes (and, when `use_padding` is in play,
/// whatever PADDING block happens to follow). Kept separate from the
/// effector (the part that actually touches the filesystem) so the decision
/// itself is unit-testable without a real file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePlan {
    /// The new block is exactly the size of the old one (header included):
    /// overwrite in place, nothing else on disk moves.
    Stationary,
    /// The new block is smaller than the old one by at least one metadata
    /// block header's worth of bytes: overwrite in place and synthesize a
    /// PADDING block in the freed space so every later offset is unchanged.
    StationaryWithPadding {
        padding_len: usize,
        padding_is_last: bool,
    },
    /// The new block is bigger, but the block immediately following is
    /// PADDING with enough room to absorb the difference: the new block
    /// overwrites the old block's slot and spills into the padding block's
    /// start. `remaining_padding_len` is `None` when the padding block is
    /// consumed exactly (the new block inherits its `is_last`); otherwise
    /// it's the shrunk padding block's remaining payload length.
    ConsumeFollowingPadding {
        remaining_padding_len: Option<usize>,
        padding_is_last: bool,
    },
    /// The new block doesn't fit in the old one's footprint (and there's no
    /// usable PADDING to grow into): rewrite the file from this block
    /// onward into a tempfile, then rename it over the original.
    Rewrite { append: bool },
}

/// Pure decision function for [`SimpleIterator::set_block`] (spec's "write
/// strategies as a pure function").
///
/// `old_total` is the old block's header+payload size; `new_payload` is the
/// new block's payload size alone; `is_last` is whether the edited block is
/// currently the last block in the chain. `following_padding` is
/// `Some((payload_len, padding_is_last))` when `use_padding` is set, the
/// edited block isn't last, and the block right after it is PADDING.
pub fn plan_write(
    old_total: u64,
    new_payload: u64,
    is_last: bool,
    use_padding: bool,
    following_padding: Option<(u64, bool)>,
) -> WritePlan {
    let new_total = HEADER_LEN + new_payload;
    if new_total == old_total {
        WritePlan::Stationary
    } else if new_total < old_total {
        let leftover = old_total - new_total;
        if use_padding && leftover >= HEADER_LEN {
            WritePlan::StationaryWithPadding {
                padding_len: (leftover - HEADER_LEN) as usize,
                padding_is_last: is_last,
            }
        } else {
            // Either padding isn't wanted, or the leftover space is too
            // small to hold even an empty PADDING block header; either way
            // there's no way to keep later offsets stable in place.
            WritePlan::Rewrite { append: false }
        }
    } else {
        let extra_needed = new_total - old_total;
        if use_padding && !is_last {
            if let Some((padding_payload, padding_is_last)) = following_padding {
                if HEADER_LEN + padding_payload == extra_needed {
                    return WritePlan::ConsumeFollowingPadding {
                        remaining_padding_len: None,
                        padding_is_last,
                    };
                } else if padding_payload >= extra_needed {
                    let remaining = padding_payload - extra_needed;
                    return WritePlan::ConsumeFollowingPadding {
                        remaining_padding_len: Some(remaining as usize),
                        padding_is_last,
                    };
                }
            }
        }
        WritePlan::Rewrite { append: is_last }
    }
}

/// Pure decision function for [`SimpleIterator::insert_block_after`],
/// mirroring `plan_write`'s shape but for inserting a brand new block
/// instead of replacing one: there's no existing slot to grow out of, only
/// a following PADDING block (if any) to absorb into.
pub fn plan_insert(
    new_payload: u64,
    is_last: bool,
    use_padding: bool,
    following_padding: Option<(u64, bool)>,
) -> WritePlan {
    if use_padding && !is_last {
        if let Some((padding_payload, padding_is_last)) = following_padding {
            if padding_payload == new_payload {
                return WritePlan::ConsumeFollowingPadding {
                    remaining_padding_len: None,
                    padding_is_last,
                };
            } else if padding_payload >= HEADER_LEN + new_payload {
                let remaining = padding_payload - new_payload - HEADER_LEN;
                return WritePlan::ConsumeFollowingPadding {
                    remaining_padding_len: Some(remaining as usize),
                    padding_is_last,
                };
            }
        }
    }
    WritePlan::Rewrite { append: true }
}

pub struct SimpleIterator {
    file: File,
    path: PathBuf,
    /// Byte offset of the current block's header.
    offset: u64,
    /// Encoded length (header + payload) of the current block, as last read
    /// from disk or computed after a write.
    current_total_len: u64,
    is_last: bool,
    block_type: u8,
    offset_stack: Vec<u64>,
    status: IteratorStatus,
    read_only: bool,
    preserve_stats: bool,
}

impl SimpleIterator {
    /// Opens `path` and positions the cursor on the first metadata block
    /// (STREAMINFO). When `preserve_stats` is set, every rewrite restores
    /// the file's mtime/atime (and, on Unix, mode and owner) afterward.
    pub fn init<P: AsRef<Path>>(path: P, read_only: bool, preserve_stats: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = if read_only {
            OpenOptions::new()
                .read(true)
                .open(&path)
                .map_err(FlacError::OpenError)?
        } else {
            OpenOptions::new()
                .read(true)
                .write(true)
                .open(&path)
                .map_err(FlacError::OpenError)?
        };

        let offset = crate::probe::probe_start(&mut file)?;
        file.seek(SeekFrom::Start(offset))
            .map_err(FlacError::SeekError)?;
        let (is_last, block_type, len) = read_header(&mut file)?;

        Ok(SimpleIterator {
            file,
            path,
            offset,
            current_total_len: HEADER_LEN + len,
            is_last,
            block_type,
            offset_stack: Vec::with_capacity(MAX_OFFSET_STACK_DEPTH),
            status: IteratorStatus::Ok,
            read_only,
            preserve_stats,
        })
    }

    /// Reads and clears the latched status, mirroring the original's
    /// `FLAC__metadata_simple_iterator_status`.
    pub fn take_status(&mut self) -> IteratorStatus {
        std::mem::take(&mut self.status)
    }

    pub fn is_last(&self) -> bool {
        self.is_last
    }

    pub fn get_block_type(&self) -> u8 {
        self.block_type
    }

    /// Saves the current offset on an internal stack (depth-limited) so a
    /// caller can return to it later via `pop_offset`.
    pub fn push_offset(&mut self) -> bool {
        if self.offset_stack.len() >= MAX_OFFSET_STACK_DEPTH {
            self.status = IteratorStatus::InternalError;
            return false;
        }
        self.offset_stack.push(self.offset);
        true
    }

    pub fn pop_offset(&mut self) -> bool {
        match self.offset_stack.pop() {
            Some(offset) => self.seek_to(offset).is_ok(),
            None => {
                self.status = IteratorStatus::InternalError;
                false
            }
        }
    }

    fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(FlacError::SeekError)?;
        let (is_last, block_type, len) = read_header(&mut self.file)?;
        self.offset = offset;
        self.is_last = is_last;
        self.block_type = block_type;
        self.current_total_len = HEADER_LEN + len;
        Ok(())
    }

    /// Advances to the next block. Returns `false` at the end of the chain
    /// or on error (check `take_status`).
    pub fn next(&mut self) -> bool {
        if self.is_last {
            return false;
        }
        let next_offset = self.offset + self.current_total_len;
        match self.seek_to(next_offset) {
            Ok(()) => true,
            Err(e) => {
                self.status = IteratorStatus::from(&e);
                false
            }
        }
    }

    /// Moves to the previous block. The format has no back-links, so this
    /// rescans from the first block, exactly as the original's
    /// `FLAC__metadata_simple_iterator_prev` does (an O(n) operation).
    pub fn prev(&mut self) -> bool {
        let target = self.offset;
        let start = match crate::probe::probe_start(&mut self.file) {
            Ok(s) => s,
            Err(e) => {
                self.status = IteratorStatus::from(&e);
                return false;
            }
        };
        if target == start {
            return false;
        }

        let last_offset = match self.scan_to_predecessor(start, target) {
            Ok(o) => o,
            Err(e) => {
                self.status = IteratorStatus::from(&e);
                return false;
            }
        };
        self.seek_to(last_offset).is_ok()
    }

    /// Peeks at the block immediately following the current one without
    /// disturbing the cursor, using the same saved-offset-and-return
    /// approach as the original's `simple_iterator_push_`/`next`/
    /// `simple_iterator_pop_` sequence. Returns `None` when the current
    /// block is last. Result is `(block_type, payload_len, is_last)`.
    fn peek_next(&mut self) -> Result<Option<(u8, u64, bool)>> {
        if self.is_last {
            return Ok(None);
        }
        let saved = self.offset;
        let next_offset = self.offset + self.current_total_len;
        let peeked = self.seek_to(next_offset).map(|()| {
            (
                self.block_type,
                self.current_total_len - HEADER_LEN,
                self.is_last,
            )
        });
        self.seek_to(saved)?;
        peeked.map(Some)
    }

    /// Rescans from `start`, stopping at the header of the block immediately
    /// before `target`. Shared by `prev` and the tail-fixup step of
    /// `delete_block`; the format has no back-links, so this is O(n).
    fn scan_to_predecessor(&mut self, start: u64, target: u64) -> Result<u64> {
        let mut offset = start;
        let mut last_offset = start;
        loop {
            self.file
                .seek(SeekFrom::Start(offset))
                .map_err(FlacError::SeekError)?;
            let (is_last, _, len) = read_header(&mut self.file)?;
            let total = HEADER_LEN + len;
            if offset + total >= target {
                break;
            }
            last_offset = offset;
            offset += total;
            if is_last {
                break;
            }
        }
        Ok(last_offset)
    }

    /// Offset of the header immediately preceding `self.offset`, used to fix
    /// up `is_last` when the current (tail) block is deleted.
    fn previous_header_offset(&mut self, start: u64) -> Result<u64> {
        let target = self.offset;
        self.scan_to_predecessor(start, target)
    }

    /// Decodes the block the cursor is currently on.
    pub fn get_block(&mut self) -> Result<MetadataBlock> {
        self.file
            .seek(SeekFrom::Start(self.offset))
            .map_err(FlacError::SeekError)?;
        MetadataBlock::from_reader(&mut self.file)
    }

    /// Replaces the current block's payload with `data`, choosing a write
    /// strategy via [`plan_write`] and committing it. When `use_padding` is
    /// set, a block that grows may consume a following PADDING block
    /// in place instead of forcing a whole-file rewrite, and a block that
    /// shrinks leaves its leftover space as a synthetic PADDING block
    /// instead of shrinking the file.
    ///
    /// Refuses if exactly one of the current block or the replacement is
    /// STREAMINFO: a STREAMINFO slot may only hold STREAMINFO, and
    /// STREAMINFO may never be replaced by anything else.
    pub fn set_block(&mut self, data: MetadataBlockData, use_padding: bool) -> bool {
        if self.read_only {
            self.status = IteratorStatus::NotWritable;
            return false;
        }
        let current_is_stream_info = self.block_type == 0;
        let new_is_stream_info = matches!(data, MetadataBlockData::StreamInfo(_));
        if current_is_stream_info != new_is_stream_info {
            self.status = IteratorStatus::IllegalInput;
            return false;
        }

        let new_payload = data.len() as u64;
        let following_padding = match self.peek_next() {
            Ok(Some((block_type, payload_len, padding_is_last))) if block_type == 1 => {
                Some((payload_len, padding_is_last))
            }
            Ok(_) => None,
            Err(e) => {
                self.status = IteratorStatus::from(&e);
                return false;
            }
        };
        let plan = plan_write(
            self.current_total_len,
            new_payload,
            self.is_last,
            use_padding,
            following_padding,
        );
        match self.commit(
            plan,
            MetadataBlock {
                is_last: self.is_last,
                length: new_payload as usize,
                data,
            },
        ) {
            Ok(()) => true,
            Err(e) => {
                self.status = IteratorStatus::from(&e);
                false
            }
        }
    }

    fn commit(&mut self, plan: WritePlan, mut block: MetadataBlock) -> Result<()> {
        match plan {
            WritePlan::Stationary => {
                self.file
                    .seek(SeekFrom::Start(self.offset))
                    .map_err(FlacError::SeekError)?;
                block.write_to(&mut self.file).map_err(|e| e.as_write())?;
                self.current_total_len = HEADER_LEN + block.data.len() as u64;
            }
            WritePlan::StationaryWithPadding {
                padding_len,
                padding_is_last,
            } => {
                block.is_last = false;
                self.file
                    .seek(SeekFrom::Start(self.offset))
                    .map_err(FlacError::SeekError)?;
                block.write_to(&mut self.file).map_err(|e| e.as_write())?;
                let padding = MetadataBlock {
                    is_last: padding_is_last,
                    length: padding_len,
                    data: MetadataBlockData::Padding(padding_len),
                };
                padding.write_to(&mut self.file).map_err(|e| e.as_write())?;
                self.is_last = block.is_last;
                self.current_total_len = HEADER_LEN + block.data.len() as u64;
            }
            WritePlan::ConsumeFollowingPadding {
                remaining_padding_len,
                padding_is_last,
            } => {
                self.file
                    .seek(SeekFrom::Start(self.offset))
                    .map_err(FlacError::SeekError)?;
                match remaining_padding_len {
                    None => {
                        block.is_last = padding_is_last;
                        block.write_to(&mut self.file).map_err(|e| e.as_write())?;
                    }
                    Some(residual_len) => {
                        block.is_last = false;
                        block.write_to(&mut self.file).map_err(|e| e.as_write())?;
                        let padding = MetadataBlock {
                            is_last: padding_is_last,
                            length: residual_len,
                            data: MetadataBlockData::Padding(residual_len),
                        };
                        padding.write_to(&mut self.file).map_err(|e| e.as_write())?;
                    }
                }
                self.is_last = block.is_last;
                self.current_total_len = HEADER_LEN + block.data.len() as u64;
            }
            WritePlan::Rewrite { append } => {
                self.rewrite_from_here(block, append)?;
            }
        }
        Ok(())
    }

    /// Tempfile rewrite fallback: copies everything before the current
    /// block, emits the new block, then copies everything after the old
    /// block's footprint, and renames the tempfile over the original.
    fn rewrite_from_here(&mut self, mut block: MetadataBlock, append: bool) -> Result<()> {
        let old_total_len = self.current_total_len;

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(FlacError::OpenError)?;

        self.file
            .seek(SeekFrom::Start(0))
            .map_err(FlacError::SeekError)?;
        let mut prefix = (&mut self.file).take(self.offset);
        std::io::copy(&mut prefix, tmp.as_file_mut()).map_err(FlacError::WriteError)?;

        if append {
            // The block grew while already being the last block: it stays
            // last, nothing trails it.
            block.is_last = true;
            block.write_to(tmp.as_file_mut()).map_err(|e| e.as_write())?;
        } else {
            block.is_last = false;
            block.write_to(tmp.as_file_mut()).map_err(|e| e.as_write())?;
            self.file
                .seek(SeekFrom::Start(self.offset + old_total_len))
                .map_err(FlacError::SeekError)?;
            std::io::copy(&mut self.file, tmp.as_file_mut()).map_err(FlacError::WriteError)?;
        }

        tmp.flush().map_err(FlacError::WriteError)?;
        let stats = if self.preserve_stats {
            PreservedStats::capture(&self.path).ok()
        } else {
            None
        };

        persist_over(tmp, &self.path)?;
        if let Some(stats) = stats {
            stats.restore(&self.path);
        }

        self.file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(FlacError::OpenError)?;
        self.current_total_len = HEADER_LEN + block.data.len() as u64;
        self.is_last = block.is_last;
        Ok(())
    }

    /// Inserts a new block immediately after the current one, choosing a
    /// write strategy via [`plan_insert`]: a stationary overwrite when a
    /// following PADDING block (with `use_padding` set) has enough room,
    /// otherwise a tempfile rewrite.
    ///
    /// Rejects inserting a STREAMINFO block: there is always exactly one,
    /// at the head of the chain, placed there at file creation.
    pub fn insert_block_after(&mut self, data: MetadataBlockData, use_padding: bool) -> bool {
        if self.read_only {
            self.status = IteratorStatus::NotWritable;
            return false;
        }
        if matches!(data, MetadataBlockData::StreamInfo(_)) {
            self.status = IteratorStatus::IllegalInput;
            return false;
        }
        let was_last = self.is_last;
        let new_payload = data.len() as u64;
        let following_padding = match self.peek_next() {
            Ok(Some((block_type, payload_len, padding_is_last))) if block_type == 1 => {
                Some((payload_len, padding_is_last))
            }
            Ok(_) => None,
            Err(e) => {
                self.status = IteratorStatus::from(&e);
                return false;
            }
        };
        let plan = plan_insert(new_payload, was_last, use_padding, following_padding);

        let result = match plan {
            WritePlan::ConsumeFollowingPadding {
                remaining_padding_len,
                padding_is_last,
            } => self.insert_stationary_into_padding(data, remaining_padding_len, padding_is_last),
            _ => self.insert_via_rewrite(data, was_last),
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                self.status = IteratorStatus::from(&e);
                false
            }
        }
    }

    /// Writes the new block directly over the following PADDING block's
    /// footprint (plus, if `remaining_padding_len` is `Some`, a shrunk
    /// residual PADDING block after it). No tempfile needed: the combined
    /// footprint of new block (+ residual padding) exactly matches the old
    /// block's footprint plus the padding block's.
    fn insert_stationary_into_padding(
        &mut self,
        data: MetadataBlockData,
        remaining_padding_len: Option<usize>,
        padding_is_last: bool,
    ) -> Result<()> {
        let after_offset = self.offset + self.current_total_len;
        let new_block = MetadataBlock {
            is_last: remaining_padding_len.is_none() && padding_is_last,
            length: data.len(),
            data,
        };
        self.file
            .seek(SeekFrom::Start(after_offset))
            .map_err(FlacError::SeekError)?;
        new_block.write_to(&mut self.file).map_err(|e| e.as_write())?;
        if let Some(residual_len) = remaining_padding_len {
            let padding = MetadataBlock {
                is_last: padding_is_last,
                length: residual_len,
                data: MetadataBlockData::Padding(residual_len),
            };
            padding.write_to(&mut self.file).map_err(|e| e.as_write())?;
        }
        // Cursor stays on the block we inserted after; its own header and
        // is_last/current_total_len are unchanged by this.
        Ok(())
    }

    fn insert_via_rewrite(&mut self, data: MetadataBlockData, was_last: bool) -> Result<()> {
        let mut new_block = MetadataBlock {
            is_last: was_last,
            length: data.len(),
            data,
        };
        let after_offset = self.offset + self.current_total_len;
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(FlacError::OpenError)?;

        self.file
            .seek(SeekFrom::Start(0))
            .map_err(FlacError::SeekError)?;
        let mut prefix = (&mut self.file).take(after_offset);
        std::io::copy(&mut prefix, tmp.as_file_mut()).map_err(FlacError::WriteError)?;

        if was_last {
            // The block we inserted after was the tail; clear its is_last
            // bit now that something follows it, per the "is_last fixup"
            // design note (recompute on the in-memory copy rather than
            // poke the original's on-disk byte).
            let header_pos = tmp
                .as_file_mut()
                .stream_position()
                .map_err(FlacError::SeekError)?
                - self.current_total_len;
            tmp.as_file_mut()
                .seek(SeekFrom::Start(header_pos))
                .map_err(FlacError::SeekError)?;
            let mut first_byte = [0u8; 1];
            tmp.as_file_mut()
                .read_exact(&mut first_byte)
                .map_err(FlacError::Io)?;
            first_byte[0] &= 0b0111_1111;
            tmp.as_file_mut()
                .seek(SeekFrom::Start(header_pos))
                .map_err(FlacError::SeekError)?;
            tmp.as_file_mut()
                .write_all(&first_byte)
                .map_err(FlacError::WriteError)?;
            tmp.as_file_mut()
                .seek(SeekFrom::End(0))
                .map_err(FlacError::SeekError)?;
        }

        new_block.is_last = was_last;
        new_block
            .write_to(tmp.as_file_mut())
            .map_err(|e| e.as_write())?;
        if !was_last {
            self.file
                .seek(SeekFrom::Start(after_offset))
                .map_err(FlacError::SeekError)?;
            std::io::copy(&mut self.file, tmp.as_file_mut()).map_err(FlacError::WriteError)?;
        }

        tmp.flush().map_err(FlacError::WriteError)?;
        let stats = if self.preserve_stats {
            PreservedStats::capture(&self.path).ok()
        } else {
            None
        };
        persist_over(tmp, &self.path)?;
        if let Some(stats) = stats {
            stats.restore(&self.path);
        }

        self.file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(FlacError::OpenError)?;
        if was_last {
            self.is_last = false;
        }
        Ok(())
    }

    /// Deletes the current block. If `replace_with_padding` is set, its
    /// space is kept as a PADDING block of the same footprint (the cheap
    /// case); otherwise the file shrinks.
    ///
    /// Refuses on STREAMINFO: every file must keep exactly one.
    pub fn delete_block(&mut self, replace_with_padding: bool) -> bool {
        if self.read_only {
            self.status = IteratorStatus::NotWritable;
            return false;
        }
        if self.block_type == 0 {
            self.status = IteratorStatus::IllegalInput;
            return false;
        }
        if replace_with_padding {
            let payload_len = (self.current_total_len - HEADER_LEN) as usize;
            self.set_block(MetadataBlockData::Padding(payload_len), false)
        } else {
            let after_offset = self.offset + self.current_total_len;
            let was_last = self.is_last;
            let result = (|| -> Result<()> {
                let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
                let mut tmp =
                    tempfile::NamedTempFile::new_in(dir).map_err(FlacError::OpenError)?;
                let start = crate::probe::probe_start(&mut self.file)?;

                self.file
                    .seek(SeekFrom::Start(0))
                    .map_err(FlacError::SeekError)?;
                let mut prefix = (&mut self.file).take(self.offset);
                std::io::copy(&mut prefix, tmp.as_file_mut()).map_err(FlacError::WriteError)?;

                if was_last && self.offset > start {
                    // The deleted block was the tail: whatever now ends the
                    // chain (the block just copied into the prefix) needs
                    // its is_last bit set, per the "is_last fixup" design
                    // note. Locate its header the same way `prev` does.
                    let header_pos = self.previous_header_offset(start)?;
                    tmp.as_file_mut()
                        .seek(SeekFrom::Start(header_pos))
                        .map_err(FlacError::SeekError)?;
                    let mut first_byte = [0u8; 1];
                    tmp.as_file_mut()
                        .read_exact(&mut first_byte)
                        .map_err(FlacError::Io)?;
                    first_byte[0] |= 0b1000_0000;
                    tmp.as_file_mut()
                        .seek(SeekFrom::Start(header_pos))
                        .map_err(FlacError::SeekError)?;
                    tmp.as_file_mut()
                        .write_all(&first_byte)
                        .map_err(FlacError::WriteError)?;
                    tmp.as_file_mut()
                        .seek(SeekFrom::End(0))
                        .map_err(FlacError::SeekError)?;
                }

                self.file
                    .seek(SeekFrom::Start(after_offset))
                    .map_err(FlacError::SeekError)?;
                std::io::copy(&mut self.file, tmp.as_file_mut()).map_err(FlacError::WriteError)?;
                tmp.flush().map_err(FlacError::WriteError)?;
                let stats = if self.preserve_stats {
                    PreservedStats::capture(&self.path).ok()
                } else {
                    None
                };
                persist_over(tmp, &self.path)?;
                if let Some(stats) = stats {
                    stats.restore(&self.path);
                }
                Ok(())
            })();
            match result {
                Ok(()) => {
                    self.file = match OpenOptions::new()
                        .read(true)
                        .write(true)
                        .open(&self.path)
                        .map_err(FlacError::OpenError)
                    {
                        Ok(f) => f,
                        Err(e) => {
                            self.status = IteratorStatus::from(&e);
                            return false;
                        }
                    };
                    // Cursor now sits where the following block used to be;
                    // re-read its header, unless the deleted block was last,
                    // in which case there's nothing left to read.
                    match std::fs::metadata(&self.path) {
                        Ok(meta) if self.offset >= meta.len() => true,
                        _ => self.seek_to(self.offset).is_ok(),
                    }
                }
                Err(e) => {
                    self.status = IteratorStatus::from(&e);
                    false
                }
            }
        }
    }
}

/// Persists `tmp` over `path`, falling back to copy-then-remove when the
/// rename can't cross filesystems atomically.
fn persist_over(tmp: tempfile::NamedTempFile, path: &Path) -> Result<()> {
    match tmp.persist(path) {
        Ok(_) => Ok(()),
        Err(e) => {
            std::fs::copy(e.file.path(), path).map_err(FlacError::RenameError)?;
            std::fs::remove_file(e.file.path()).map_err(FlacError::UnlinkError)
        }
    }
}

fn read_header<R: Read>(reader: &mut R) -> Result<(bool, u8, u64)> {
    let first_byte = reader.read_u8().map_err(FlacError::Io)?;
    let block_type = first_byte & 0b0111_1111;
    let length = reader
        .read_u24::<BigEndian>()
        .map_err(FlacError::Io)? as u64;
    Ok((first_byte & 0b1000_0000 > 0, block_type, length))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stationary_when_same_size() {
        assert_eq!(
            plan_write(42, 38, false, false, None),
            WritePlan::Stationary
        );
    }

    #[test]
    fn stationary_with_padding_when_smaller_and_use_padding() {
        match plan_write(42, 20, false, true, None) {
            WritePlan::StationaryWithPadding { padding_len, .. } => assert_eq!(padding_len, 14),
            other => panic!("expected StationaryWithPadding, got {:?}", other),
        }
    }

    #[test]
    fn rewrite_when_smaller_but_use_padding_false() {
        assert_eq!(
            plan_write(42, 20, false, false, None),
            WritePlan::Rewrite { append: false }
        );
    }

    #[test]
    fn rewrite_when_leftover_too_small_for_header() {
        // old_total=42 (header 4 + payload 38), new_payload=37 -> new_total=41, leftover=1 < HEADER_LEN
        assert_eq!(
            plan_write(42, 37, false, true, None),
            WritePlan::Rewrite { append: false }
        );
    }

    #[test]
    fn rewrite_and_append_when_growing_last_block() {
        assert_eq!(
            plan_write(42, 100, true, false, None),
            WritePlan::Rewrite { append: true }
        );
    }

    #[test]
    fn rewrite_not_append_when_growing_non_last_block() {
        assert_eq!(
            plan_write(42, 100, false, false, None),
            WritePlan::Rewrite { append: false }
        );
    }

    #[test]
    fn consumes_following_padding_exactly_when_growing() {
        // old_total=8 (payload 4), new_payload=8 -> new_total=12, extra_needed=4.
        // padding payload=0 -> header(4)+0 == 4, exact match.
        match plan_write(8, 8, false, true, Some((0, true))) {
            WritePlan::ConsumeFollowingPadding {
                remaining_padding_len,
                padding_is_last,
            } => {
                assert_eq!(remaining_padding_len, None);
                assert!(padding_is_last);
            }
            other => panic!("expected ConsumeFollowingPadding, got {:?}", other),
        }
    }

    #[test]
    fn consumes_following_padding_partially_when_growing() {
        // old_total=10 (payload 6), new_payload=9 -> new_total=13, extra_needed=3.
        // Following padding payload=5 -> remaining = 5-3 = 2.
        match plan_write(10, 9, false, true, Some((5, false))) {
            WritePlan::ConsumeFollowingPadding {
                remaining_padding_len,
                padding_is_last,
            } => {
                assert_eq!(remaining_padding_len, Some(2));
                assert!(!padding_is_last);
            }
            other => panic!("expected ConsumeFollowingPadding, got {:?}", other),
        }
    }

    #[test]
    fn falls_back_to_rewrite_when_following_padding_too_small() {
        // extra_needed=3, padding payload=2 (< 3): not enough, not exact either.
        assert_eq!(
            plan_write(10, 9, false, true, Some((2, false))),
            WritePlan::Rewrite { append: false }
        );
    }

    #[test]
    fn insert_consumes_padding_exactly() {
        match plan_insert(12, false, true, Some((12, true))) {
            WritePlan::ConsumeFollowingPadding {
                remaining_padding_len,
                padding_is_last,
            } => {
                assert_eq!(remaining_padding_len, None);
                assert!(padding_is_last);
            }
            other => panic!("expected ConsumeFollowingPadding, got {:?}", other),
        }
    }

    #[test]
    fn insert_consumes_padding_partially() {
        // new_payload=12, padding_payload=20 -> remaining = 20-12-4 = 4.
        match plan_insert(12, false, true, Some((20, false))) {
            WritePlan::ConsumeFollowingPadding {
                remaining_padding_len,
                padding_is_last,
            } => {
                assert_eq!(remaining_padding_len, Some(4));
                assert!(!padding_is_last);
            }
            other => panic!("expected ConsumeFollowingPadding, got {:?}", other),
        }
    }

    #[test]
    fn insert_falls_back_to_rewrite_when_padding_too_tight() {
        // new_payload=12, padding_payload=14: not exact, and 14 < 4+12=16.
        assert_eq!(
            plan_insert(12, false, true, Some((14, false))),
            WritePlan::Rewrite { append: true }
        );
    }

    #[test]
    fn set_block_rejects_stream_info_type_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guard.flac");
        {
            let mut file = std::fs::File::create(&path).unwrap();
            use std::io::Write;
            file.write_all(b"fLaC").unwrap();
            let block = MetadataBlock::new(MetadataBlockData::StreamInfo(
                crate::blocks::BlockStreamInfo {
                    min_block_size: 4096,
                    max_block_size: 4096,
                    min_frame_size: 0,
                    max_frame_size: 0,
                    sample_rate: 44100,
                    channels: 2,
                    bits_per_sample: 16,
                    total_samples: 0,
                    md5_signature: [0; 16],
                },
            ));
            let mut block = block;
            block.is_last = true;
            block.write_to(&mut file).unwrap();
        }

        let mut it = SimpleIterator::init(&path, false, false).unwrap();
        assert!(!it.set_block(MetadataBlockData::Padding(4), false));
        assert_eq!(it.take_status(), IteratorStatus::IllegalInput);
        assert!(!it.insert_block_after(
            MetadataBlockData::StreamInfo(crate::blocks::BlockStreamInfo {
                min_block_size: 4096,
                max_block_size: 4096,
                min_frame_size: 0,
                max_frame_size: 0,
                sample_rate: 44100,
                channels: 2,
                bits_per_sample: 16,
                total_samples: 0,
                md5_signature: [0; 16],
            }),
            false
        ));
        assert_eq!(it.take_status(), IteratorStatus::IllegalInput);
        assert!(!it.delete_block(false));
        assert_eq!(it.take_status(), IteratorStatus::IllegalInput);
    }
}
