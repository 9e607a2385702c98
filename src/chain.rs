//! Chain (spec §4.6): the fully-materialized doubly linked list of metadata
//! blocks, with insert/delete/reorder and a borrowing iterator.
//!
//! Grounded in `original_source/src/libFLAC/metadata_iterators.c`'s
//! `FLAC__Metadata_Chain` family for the padding-reconciliation arithmetic
//! (`chain_calculate_length_`, `chain_merge_adjacent_padding_`,
//! `chain_rewrite_chain_`/`chain_rewrite_file_`), reworked from the
//! original's raw `prev`/`next` pointers into an arena (`Vec<Node>` plus
//! `Option<usize>` links), per the "linked list with external iterators"
//! design note: no node is ever moved once allocated, so indices stay
//! stable across inserts and deletes.

use crate::blocks::{MetadataBlock, MetadataBlockData};
use crate::error::{FlacError, IteratorStatus};
use crate::prelude::*;
use crate::utils::PreservedStats;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

struct Node {
    block: MetadataBlock,
    prev: Option<usize>,
    next: Option<usize>,
}

/// A fully materialized, editable metadata block chain for one file.
pub struct Chain {
    nodes: Vec<Node>,
    head: Option<usize>,
    tail: Option<usize>,
    path: Option<PathBuf>,
    /// Total on-disk footprint (header+payload of every block) as read,
    /// used to decide whether `write` can overwrite in place.
    initial_length: u64,
    status: IteratorStatus,
}

impl Default for Chain {
    fn default() -> Self {
        Chain::new()
    }
}

impl Chain {
    pub fn new() -> Self {
        Chain {
            nodes: Vec::new(),
            head: None,
            tail: None,
            path: None,
            initial_length: 0,
            status: IteratorStatus::Ok,
        }
    }

    pub fn take_status(&mut self) -> IteratorStatus {
        std::mem::take(&mut self.status)
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    fn push_back_raw(&mut self, block: MetadataBlock) -> usize {
        let index = self.nodes.len();
        let prev = self.tail;
        self.nodes.push(Node {
            block,
            prev,
            next: None,
        });
        if let Some(prev) = prev {
            self.nodes[prev].next = Some(index);
        } else {
            self.head = Some(index);
        }
        self.tail = Some(index);
        index
    }

    /// Reads a whole file's metadata block chain into memory.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let start = crate::probe::probe_start(&mut file)?;
        file.seek(SeekFrom::Start(start))?;

        let mut chain = Chain::new();
        let mut is_last = false;
        let mut total = 0u64;
        while !is_last {
            let pos_before = file.stream_position()?;
            let block = MetadataBlock::from_reader(&mut file)?;
            let pos_after = file.stream_position()?;
            is_last = block.is_last;
            total += pos_after - pos_before;
            chain.push_back_raw(block);
        }

        match chain.nodes.first().map(|n| &n.block.data) {
            Some(MetadataBlockData::StreamInfo(_)) => {}
            _ => return Err(FlacError::InvalidFirstBlock),
        }

        chain.path = Some(path);
        chain.initial_length = total;
        Ok(chain)
    }

    fn current_length(&self) -> u64 {
        let mut total = 0u64;
        let mut cur = self.head;
        while let Some(i) = cur {
            total += 4 + self.nodes[i].block.data.len() as u64;
            cur = self.nodes[i].next;
        }
        total
    }

    fn fix_is_last(&mut self) {
        let mut cur = self.head;
        while let Some(i) = cur {
            let is_last = self.nodes[i].next.is_none();
            self.nodes[i].block.is_last = is_last;
            cur = self.nodes[i].next;
        }
    }

    /// Merges every run of adjacent PADDING blocks into a single block,
    /// matching `chain_merge_adjacent_padding_`.
    pub fn merge_padding(&mut self) {
        let mut cur = self.head;
        while let Some(i) = cur {
            let next = self.nodes[i].next;
            if self.nodes[i].block.data.is_padding() {
                if let Some(j) = next {
                    if self.nodes[j].block.data.is_padding() {
                        let extra = self.nodes[j].block.data.len();
                        if let MetadataBlockData::Padding(size) = &mut self.nodes[i].block.data {
                            *size += extra;
                        }
                        self.unlink(j);
                        // Re-examine node `i` in case there's a further run.
                        continue;
                    }
                }
            }
            cur = next;
        }
    }

    /// Sorts PADDING blocks to the end of the chain, preserving the
    /// relative order of every other block. Used before a `write` that
    /// wants to maximize the single trailing padding run available for
    /// future stationary writes.
    pub fn sort_padding(&mut self) {
        let mut ordered: Vec<usize> = Vec::with_capacity(self.nodes.len());
        let mut padding: Vec<usize> = Vec::new();
        let mut cur = self.head;
        while let Some(i) = cur {
            if self.nodes[i].block.data.is_padding() {
                padding.push(i);
            } else {
                ordered.push(i);
            }
            cur = self.nodes[i].next;
        }
        ordered.extend(padding);
        self.relink(&ordered);
    }

    fn relink(&mut self, order: &[usize]) {
        for (pos, &index) in order.iter().enumerate() {
            self.nodes[index].prev = if pos == 0 { None } else { Some(order[pos - 1]) };
            self.nodes[index].next = order.get(pos + 1).copied();
        }
        self.head = order.first().copied();
        self.tail = order.last().copied();
    }

    fn unlink(&mut self, index: usize) {
        let prev = self.nodes[index].prev;
        let next = self.nodes[index].next;
        if let Some(p) = prev {
            self.nodes[p].next = next;
        } else {
            self.head = next;
        }
        if let Some(n) = next {
            self.nodes[n].prev = prev;
        } else {
            self.tail = prev;
        }
        self.nodes[index].prev = None;
        self.nodes[index].next = None;
    }

    /// Writes the chain back to its source file, preferring an in-place
    /// rewrite of just the header region when the new header fits in the
    /// space the old one occupied (after reconciling trailing padding),
    /// and falling back to a full tempfile rewrite otherwise. Mirrors
    /// `chain_rewrite_chain_` vs. `chain_rewrite_file_`. When `preserve_stats`
    /// is set, the file's mtime/atime (and, on Unix, mode and owner) are
    /// restored afterward.
    pub fn write(&mut self, use_padding: bool, preserve_stats: bool) -> bool {
        let path = match self.path.clone() {
            Some(p) => p,
            None => {
                self.status = IteratorStatus::IllegalInput;
                return false;
            }
        };

        if use_padding {
            self.reconcile_padding();
        }
        self.fix_is_last();

        let new_length = self.current_length();
        // Only safe to overwrite the header region in place when its new
        // footprint exactly matches the old one byte for byte -- anything
        // shorter would leave a gap of stale bytes before the audio frames,
        // which `reconcile_padding` above is responsible for closing with a
        // PADDING block. A caller that declines padding reconciliation and
        // doesn't happen to land on an identical footprint falls back to a
        // full rewrite instead of producing a corrupt file.
        let in_place = new_length == self.initial_length;

        let result = if in_place {
            self.rewrite_chain(&path, preserve_stats)
        } else {
            self.rewrite_file(&path, preserve_stats)
        };

        match result {
            Ok(()) => {
                self.initial_length = self.current_length();
                true
            }
            Err(e) => {
                self.status = IteratorStatus::from(&e);
                false
            }
        }
    }

    /// Grows or shrinks the trailing PADDING block (creating or consuming
    /// one) so the header's on-disk footprint exactly matches
    /// `initial_length`, avoiding a full rewrite when possible. Mirrors the
    /// teacher's `FlacHeader::format` padding math, generalized to operate
    /// on the arena chain instead of a flat `Vec<MetadataBlock>`.
    fn reconcile_padding(&mut self) {
        self.merge_padding();
        let without_trailing_padding: u64 = {
            let mut total = 0u64;
            let mut cur = self.head;
            while let Some(i) = cur {
                if !(self.nodes[i].next.is_none() && self.nodes[i].block.data.is_padding()) {
                    total += 4 + self.nodes[i].block.data.len() as u64;
                }
                cur = self.nodes[i].next;
            }
            total
        };

        if without_trailing_padding > self.initial_length {
            return; // doesn't fit; `write` will fall back to a full rewrite
        }
        let available = self.initial_length - without_trailing_padding;
        if available < 4 {
            // Not enough room for even an empty PADDING block; drop any
            // trailing padding entirely rather than leave a dangling gap.
            if let Some(tail) = self.tail {
                if self.nodes[tail].block.data.is_padding() {
                    self.unlink(tail);
                }
            }
            return;
        }
        let padding_len = (available - 4) as usize;
        if let Some(tail) = self.tail {
            if self.nodes[tail].block.data.is_padding() {
                self.nodes[tail].block.data = MetadataBlockData::Padding(padding_len);
                return;
            }
        }
        self.push_back_raw(MetadataBlock {
            is_last: true,
            length: padding_len,
            data: MetadataBlockData::Padding(padding_len),
        });
    }

    fn rewrite_chain(&self, path: &Path, preserve_stats: bool) -> Result<()> {
        let stats = if preserve_stats {
            PreservedStats::capture(path).ok()
        } else {
            None
        };

        let mut file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(FlacError::OpenError)?;
        let start = crate::probe::probe_start(&mut File::open(path).map_err(FlacError::OpenError)?)?;
        file.seek(SeekFrom::Start(start))
            .map_err(FlacError::SeekError)?;
        let mut cur = self.head;
        while let Some(i) = cur {
            self.nodes[i]
                .block
                .write_to(&mut file)
                .map_err(|e| e.as_write())?;
            cur = self.nodes[i].next;
        }

        if let Some(stats) = stats {
            stats.restore(path);
        }
        Ok(())
    }

    fn rewrite_file(&self, path: &Path, preserve_stats: bool) -> Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(FlacError::OpenError)?;

        let mut original = File::open(path).map_err(FlacError::OpenError)?;
        let start = crate::probe::probe_start(&mut original)?;

        // Preserve any pre-stream-start bytes (e.g. an ID3v2 tag) verbatim.
        let mut prefix_src = File::open(path).map_err(FlacError::OpenError)?;
        std::io::copy(&mut (&mut prefix_src).take(start), tmp.as_file_mut())
            .map_err(FlacError::WriteError)?;

        let mut cur = self.head;
        while let Some(i) = cur {
            self.nodes[i]
                .block
                .write_to(tmp.as_file_mut())
                .map_err(|e| e.as_write())?;
            cur = self.nodes[i].next;
        }

        original
            .seek(SeekFrom::Start(start + self.initial_length))
            .map_err(FlacError::SeekError)?;
        std::io::copy(&mut original, tmp.as_file_mut()).map_err(FlacError::WriteError)?;

        tmp.flush().map_err(FlacError::WriteError)?;
        let stats = if preserve_stats {
            PreservedStats::capture(path).ok()
        } else {
            None
        };

        match tmp.persist(path) {
            Ok(_) => {}
            Err(e) => {
                std::fs::copy(e.file.path(), path).map_err(FlacError::RenameError)?;
                std::fs::remove_file(e.file.path()).map_err(FlacError::UnlinkError)?;
            }
        }
        if let Some(stats) = stats {
            stats.restore(path);
        }
        Ok(())
    }

    pub fn iter_mut(&mut self) -> ChainIterator<'_> {
        ChainIterator {
            chain: self,
            current: None,
        }
    }
}

/// Borrows a [`Chain`] and walks it, exposing per-node edit operations. Tied
/// to the chain's lifetime so it can never outlive the structure it edits,
/// per the "linked list with external iterators" design note.
pub struct ChainIterator<'a> {
    chain: &'a mut Chain,
    current: Option<usize>,
}

impl<'a> ChainIterator<'a> {
    pub fn next(&mut self) -> bool {
        let target = match self.current {
            Some(i) => self.chain.nodes[i].next,
            None => self.chain.head,
        };
        match target {
            Some(i) => {
                self.current = Some(i);
                true
            }
            None => false,
        }
    }

    pub fn prev(&mut self) -> bool {
        match self.current {
            Some(i) => match self.chain.nodes[i].prev {
                Some(p) => {
                    self.current = Some(p);
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    pub fn get_block_type(&self) -> Option<u8> {
        self.current.map(|i| u8::from(&self.chain.nodes[i].block.data))
    }

    pub fn get_block(&self) -> Option<&MetadataBlock> {
        self.current.map(|i| &self.chain.nodes[i].block)
    }

    /// Refuses if exactly one of the current block or the replacement is
    /// STREAMINFO: a STREAMINFO slot may only hold STREAMINFO, and
    /// STREAMINFO may never be replaced by anything else.
    pub fn set_block(&mut self, data: MetadataBlockData) -> bool {
        match self.current {
            Some(i) => {
                let current_is_stream_info = self.is_stream_info(i);
                let new_is_stream_info = matches!(data, MetadataBlockData::StreamInfo(_));
                if current_is_stream_info != new_is_stream_info {
                    return false;
                }
                self.chain.nodes[i].block.data = data;
                true
            }
            None => false,
        }
    }

    /// STREAMINFO (the head) may never be deleted or displaced, matching
    /// every tier's invariant that block 0 is always STREAMINFO.
    fn is_stream_info(&self, index: usize) -> bool {
        matches!(
            self.chain.nodes[index].block.data,
            MetadataBlockData::StreamInfo(_)
        )
    }

    /// Inserting before STREAMINFO (the head) would displace it, and
    /// inserting a STREAMINFO block anywhere would create a second one;
    /// both are forbidden.
    pub fn insert_block_before(&mut self, data: MetadataBlockData) -> bool {
        let at = match self.current {
            Some(i) => i,
            None => return false,
        };
        if self.is_stream_info(at) || matches!(data, MetadataBlockData::StreamInfo(_)) {
            return false;
        }
        let new_index = self.chain.nodes.len();
        let prev = self.chain.nodes[at].prev;
        self.chain.nodes.push(Node {
            block: MetadataBlock::new(data),
            prev,
            next: Some(at),
        });
        self.chain.nodes[at].prev = Some(new_index);
        match prev {
            Some(p) => self.chain.nodes[p].next = Some(new_index),
            None => self.chain.head = Some(new_index),
        }
        true
    }

    /// Inserting a STREAMINFO block anywhere would create a second one,
    /// which is forbidden; there is always exactly one, at the head.
    pub fn insert_block_after(&mut self, data: MetadataBlockData) -> bool {
        let at = match self.current {
            Some(i) => i,
            None => return false,
        };
        if matches!(data, MetadataBlockData::StreamInfo(_)) {
            return false;
        }
        let new_index = self.chain.nodes.len();
        let next = self.chain.nodes[at].next;
        self.chain.nodes.push(Node {
            block: MetadataBlock::new(data),
            prev: Some(at),
            next,
        });
        self.chain.nodes[at].next = Some(new_index);
        match next {
            Some(n) => self.chain.nodes[n].prev = Some(new_index),
            None => self.chain.tail = Some(new_index),
        }
        true
    }

    /// Deletes the current block and moves the cursor to the block that
    /// followed it (or, if it was the tail, to the new tail).
    pub fn delete_block(&mut self, replace_with_padding: bool) -> bool {
        let at = match self.current {
            Some(i) => i,
            None => return false,
        };
        if self.is_stream_info(at) {
            return false;
        }

        if replace_with_padding {
            let len = self.chain.nodes[at].block.data.len();
            self.chain.nodes[at].block.data = MetadataBlockData::Padding(len);
            true
        } else {
            let next = self.chain.nodes[at].next;
            let prev = self.chain.nodes[at].prev;
            self.chain.unlink(at);
            self.current = next.or(prev);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::BlockStreamInfo;

    fn stream_info_block() -> MetadataBlock {
        MetadataBlock::new(MetadataBlockData::StreamInfo(BlockStreamInfo {
            min_block_size: 4096,
            max_block_size: 4096,
            min_frame_size: 0,
            max_frame_size: 0,
            sample_rate: 44100,
            channels: 2,
            bits_per_sample: 16,
            total_samples: 0,
            md5_signature: [0; 16],
        }))
    }

    #[test]
    fn merge_padding_combines_runs() {
        let mut chain = Chain::new();
        chain.push_back_raw(stream_info_block());
        chain.push_back_raw(MetadataBlock::new(MetadataBlockData::Padding(10)));
        chain.push_back_raw(MetadataBlock::new(MetadataBlockData::Padding(20)));
        chain.merge_padding();

        let mut iter = chain.iter_mut();
        assert!(iter.next());
        assert!(iter.next());
        match iter.get_block().unwrap().data {
            MetadataBlockData::Padding(size) => assert_eq!(size, 30),
            _ => panic!("expected merged padding block"),
        }
        assert!(!iter.next());
    }

    #[test]
    fn cannot_delete_stream_info() {
        let mut chain = Chain::new();
        chain.push_back_raw(stream_info_block());
        let mut iter = chain.iter_mut();
        assert!(iter.next());
        assert!(!iter.delete_block(false));
    }

    fn some_stream_info_data() -> MetadataBlockData {
        match stream_info_block().data {
            MetadataBlockData::StreamInfo(s) => MetadataBlockData::StreamInfo(s),
            _ => unreachable!(),
        }
    }

    #[test]
    fn cannot_insert_or_set_stream_info_anywhere() {
        let mut chain = Chain::new();
        chain.push_back_raw(stream_info_block());
        chain.push_back_raw(MetadataBlock::new(MetadataBlockData::Padding(10)));

        let mut iter = chain.iter_mut();
        assert!(iter.next()); // at STREAMINFO (head)
        assert!(!iter.insert_block_before(some_stream_info_data()));
        assert!(!iter.set_block(MetadataBlockData::Padding(5)));

        assert!(iter.next()); // at the PADDING block
        assert!(!iter.insert_block_after(some_stream_info_data()));
        assert!(!iter.set_block(some_stream_info_data()));
    }

    #[test]
    fn insert_and_delete_round_trip() {
        let mut chain = Chain::new();
        chain.push_back_raw(stream_info_block());
        {
            let mut iter = chain.iter_mut();
            assert!(iter.next());
            assert!(iter.insert_block_after(MetadataBlockData::Padding(100)));
        }
        assert_eq!(chain.nodes.len(), 2);
        {
            let mut iter = chain.iter_mut();
            iter.next();
            iter.next();
            assert!(iter.delete_block(false));
        }
        assert_eq!(
            chain.head.map(|i| chain.nodes[i].next),
            Some(None)
        );
    }
}
