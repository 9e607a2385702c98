//! End-to-end coverage of the single-cursor Simple Iterator against files on
//! disk: forward/backward traversal, offset stack, insert, and delete.

use flac_metadata::blocks::{BlockStreamInfo, MetadataBlock, MetadataBlockData};
use flac_metadata::prelude::Encode;
use flac_metadata::SimpleIterator;
use std::io::Write;

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

fn write_file(path: &std::path::Path, mut blocks: Vec<MetadataBlock>) {
    let last = blocks.len() - 1;
    for (i, block) in blocks.iter_mut().enumerate() {
        block.is_last = i == last;
    }
    let mut file = std::fs::File::create(path).unwrap();
    file.write_all(b"fLaC").unwrap();
    for block in blocks {
        block.write_to(&mut file).unwrap();
    }
}

#[test]
fn next_and_prev_traverse_the_chain() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("traverse.flac");
    write_file(
        &path,
        vec![
            stream_info_block(),
            MetadataBlock::new(MetadataBlockData::Padding(10)),
            MetadataBlock::new(MetadataBlockData::Padding(20)),
        ],
    );

    let mut it = SimpleIterator::init(&path, true, false).unwrap();
    assert_eq!(it.get_block_type(), 0);
    assert!(it.next());
    assert_eq!(it.get_block_type(), 1);
    assert!(it.next());
    assert!(it.is_last());
    assert!(!it.next());

    assert!(it.prev());
    assert!(!it.is_last());
    assert!(it.prev());
    assert_eq!(it.get_block_type(), 0);
    assert!(!it.prev());
}

#[test]
fn push_and_pop_offset_restores_position() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stack.flac");
    write_file(
        &path,
        vec![
            stream_info_block(),
            MetadataBlock::new(MetadataBlockData::Padding(10)),
        ],
    );

    let mut it = SimpleIterator::init(&path, true, false).unwrap();
    assert!(it.push_offset());
    assert!(it.next());
    assert_eq!(it.get_block_type(), 1);
    assert!(it.pop_offset());
    assert_eq!(it.get_block_type(), 0);
}

#[test]
fn insert_then_delete_block() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("insert_delete.flac");
    write_file(&path, vec![stream_info_block()]);

    let mut it = SimpleIterator::init(&path, false, false).unwrap();
    assert!(it.insert_block_after(MetadataBlockData::Padding(50), false));

    let mut it = SimpleIterator::init(&path, false, false).unwrap();
    assert!(it.next());
    assert_eq!(it.get_block_type(), 1);
    assert!(it.is_last());

    assert!(it.delete_block(false));
    let mut it = SimpleIterator::init(&path, true, false).unwrap();
    assert_eq!(it.get_block_type(), 0);
    assert!(it.is_last());
}

#[test]
fn delete_with_padding_keeps_footprint() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("delete_padding.flac");
    write_file(
        &path,
        vec![
            stream_info_block(),
            MetadataBlock::new(MetadataBlockData::Padding(30)),
        ],
    );

    let mut it = SimpleIterator::init(&path, false, false).unwrap();
    assert!(it.next());
    assert!(it.delete_block(true));
    assert_eq!(it.get_block_type(), 1); // still PADDING, just emptied of identity
}
