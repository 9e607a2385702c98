use std::string::FromUtf8Error;
use thiserror::Error;

/// Errors surfaced by the block codec and object model.
///
/// This is the error type `Decode`/`Encode` implementations return; the
/// Simple Iterator and Chain additionally keep a latched [`IteratorStatus`]
/// so callers can tell what failed without matching on this type.
#[derive(Error, Debug)]
pub enum FlacError {
    #[error("invalid magic number")]
    InvalidMagicNumber,
    #[error("invalid first block, must be STREAMINFO")]
    InvalidFirstBlock,
    #[error("invalid block type 0xff")]
    InvalidBlockType,
    #[error("invalid seek table size")]
    InvalidSeekTableSize,
    #[error("invalid picture type")]
    InvalidPictureType,
    #[error("block length does not match its serialized payload")]
    InconsistentLength,
    #[error(transparent)]
    InvalidString(#[from] FromUtf8Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("error opening file")]
    OpenError(#[source] std::io::Error),
    #[error("seek error")]
    SeekError(#[source] std::io::Error),
    #[error("write error")]
    WriteError(#[source] std::io::Error),
    #[error("rename error")]
    RenameError(#[source] std::io::Error),
    #[error("unlink error")]
    UnlinkError(#[source] std::io::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl FlacError {
    /// Reclassifies a generic I/O error as a write failure. `Encode` impls
    /// only ever produce [`FlacError::Io`] via `?`, so call sites that know
    /// they're writing (not reading) use this to keep the distinction spec
    /// §7's status taxonomy requires.
    pub(crate) fn as_write(self) -> Self {
        match self {
            FlacError::Io(e) => FlacError::WriteError(e),
            other => other,
        }
    }
}

/// Taxonomy of failures for the Simple Iterator and Chain (spec §7).
///
/// Every mutating method on [`crate::simple_iterator::SimpleIterator`] and
/// [`crate::chain::Chain`] returns a `bool` and latches one of these; callers
/// read it with `take_status`, which clears it back to `Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IteratorStatus {
    #[default]
    Ok,
    IllegalInput,
    ErrorOpeningFile,
    NotAFlacFile,
    NotWritable,
    BadMetadata,
    ReadError,
    SeekError,
    WriteError,
    RenameError,
    UnlinkError,
    InternalError,
}

impl From<&FlacError> for IteratorStatus {
    fn from(err: &FlacError) -> Self {
        match err {
            FlacError::InvalidMagicNumber => IteratorStatus::NotAFlacFile,
            FlacError::InvalidFirstBlock
            | FlacError::InvalidBlockType
            | FlacError::InvalidSeekTableSize
            | FlacError::InvalidPictureType
            | FlacError::InconsistentLength => IteratorStatus::BadMetadata,
            FlacError::InvalidString(_) => IteratorStatus::BadMetadata,
            FlacError::Io(_) => IteratorStatus::ReadError,
            FlacError::OpenError(_) => IteratorStatus::ErrorOpeningFile,
            FlacError::SeekError(_) => IteratorStatus::SeekError,
            FlacError::WriteError(_) => IteratorStatus::WriteError,
            FlacError::RenameError(_) => IteratorStatus::RenameError,
            FlacError::UnlinkError(_) => IteratorStatus::UnlinkError,
            FlacError::Image(_) => IteratorStatus::BadMetadata,
        }
    }
}
