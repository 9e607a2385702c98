pub mod blocks;
mod chain;
mod convenience;
pub mod encode_protocol;
pub mod error;
mod ogg;
pub mod prelude;
mod probe;
mod simple_iterator;
mod utils;

pub use chain::{Chain, ChainIterator};
pub use convenience::FlacHeader;
pub use error::{FlacError, IteratorStatus};
pub use ogg::OggFlacRewriter;
pub use probe::probe_start;
pub use simple_iterator::{SimpleIterator, WritePlan};
