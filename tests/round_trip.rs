//! Whole-file round trips through the read-only convenience view and the
//! on-disk editors, against a minimal synthetic `fLaC` file built in memory
//! (no binary fixtures checked into the tree).

use flac_metadata::blocks::{
    BlockStreamInfo, BlockVorbisComment, MetadataBlock, MetadataBlockData, UserComment,
};
use flac_metadata::prelude::Encode;
use flac_metadata::FlacHeader;
use std::io::Write;

fn stream_info() -> BlockStreamInfo {
    BlockStreamInfo {
        min_block_size: 4096,
        max_block_size: 4096,
        min_frame_size: 0,
        max_frame_size: 0,
        sample_rate: 44100,
        channels: 2,
        bits_per_sample: 16,
        total_samples: 0,
        md5_signature: [0; 16],
    }
}

fn write_minimal_flac(path: &std::path::Path) {
    let mut comments = BlockVorbisComment {
        vendor_string: "test".to_string(),
        comments: Vec::new(),
    };
    comments.push(UserComment::new("TITLE=Track One".to_string()));

    let blocks = vec![
        MetadataBlock::new(MetadataBlockData::StreamInfo(stream_info())),
        MetadataBlock::new(MetadataBlockData::Comment(comments)),
        MetadataBlock::new(MetadataBlockData::Padding(64)),
    ];

    let mut file = std::fs::File::create(path).unwrap();
    file.write_all(b"fLaC").unwrap();
    let last = blocks.len() - 1;
    for (i, mut block) in blocks.into_iter().enumerate() {
        block.is_last = i == last;
        block.write_to(&mut file).unwrap();
    }
}

#[test]
fn convenience_view_reads_what_was_written() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("minimal.flac");
    write_minimal_flac(&path);

    let header = FlacHeader::from_file(&path).unwrap();
    assert_eq!(header.stream_info().sample_rate, 44100);
    let comments = header.comments().unwrap();
    assert_eq!(comments.to_map()["TITLE"].value(), "Track One");
    assert!(header.picture().is_none());
    assert!(header.seek_table().is_none());
}

#[test]
fn simple_iterator_edits_comment_same_length_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("edit.flac");
    write_minimal_flac(&path);

    let mut it = flac_metadata::SimpleIterator::init(&path, false, false).unwrap();
    assert!(it.next()); // move onto the comment block
    assert_eq!(it.get_block_type(), 4);

    // "Track Two" is the same byte length as "Track One": the stationary
    // write path, no padding consumed.
    let mut comments = BlockVorbisComment {
        vendor_string: "test".to_string(),
        comments: Vec::new(),
    };
    comments.push(UserComment::new("TITLE=Track Two".to_string()));
    assert!(it.set_block(MetadataBlockData::Comment(comments), false));

    let header = FlacHeader::from_file(&path).unwrap();
    assert_eq!(
        header.comments().unwrap().to_map()["TITLE"].value(),
        "Track Two"
    );
    // The trailing PADDING block survives untouched.
    assert!(header.blocks.last().unwrap().data.is_padding());
}

#[test]
fn simple_iterator_grows_block_past_original_footprint() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grow.flac");
    write_minimal_flac(&path);

    let mut it = flac_metadata::SimpleIterator::init(&path, false, false).unwrap();
    assert!(it.next());

    let mut comments = BlockVorbisComment {
        vendor_string: "test".to_string(),
        comments: Vec::new(),
    };
    comments.push(UserComment::new("TITLE=A Much Longer Track Title Than Before".to_string()));
    assert!(it.set_block(MetadataBlockData::Comment(comments), false));

    let header = FlacHeader::from_file(&path).unwrap();
    assert_eq!(
        header.comments().unwrap().to_map()["TITLE"].value(),
        "A Much Longer Track Title Than Before"
    );
}

#[test]
fn simple_iterator_grows_into_following_padding_with_use_padding() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grow_into_padding.flac");
    write_minimal_flac(&path);
    let original_len = std::fs::metadata(&path).unwrap().len();

    let mut it = flac_metadata::SimpleIterator::init(&path, false, false).unwrap();
    assert!(it.next()); // onto the comment block, 64 bytes of PADDING follow

    let mut comments = BlockVorbisComment {
        vendor_string: "test".to_string(),
        comments: Vec::new(),
    };
    comments.push(UserComment::new("TITLE=A Slightly Longer Title".to_string()));
    assert!(it.set_block(MetadataBlockData::Comment(comments), true));

    // The growth came out of the following PADDING block's footprint, so
    // the file's total length is unchanged.
    assert_eq!(std::fs::metadata(&path).unwrap().len(), original_len);

    let header = FlacHeader::from_file(&path).unwrap();
    assert_eq!(
        header.comments().unwrap().to_map()["TITLE"].value(),
        "A Slightly Longer Title"
    );
    assert!(header.blocks.last().unwrap().data.is_padding());
}
