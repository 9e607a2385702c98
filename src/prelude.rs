use std::io::{Read, Write};

pub type Result<I> = std::result::Result<I, crate::error::FlacError>;

/// Types that decode from a reader positioned at the start of their payload,
/// with no external knowledge of how many bytes to consume.
pub trait Decode: Sized {
    fn from_reader<R: Read>(reader: &mut R) -> Result<Self>;
}

/// Types that decode from a reader but need the block header's `length` to
/// know where their payload ends (e.g. APPLICATION's trailing opaque data).
pub trait DecodeSized: Sized {
    fn from_reader_sized<R: Read>(reader: &mut R, size: usize) -> Result<Self>;
}

pub trait Encode {
    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()>;
}
