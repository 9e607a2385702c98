use crate::prelude::*;
use crate::utils::take;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

#[derive(Debug, Clone)]
pub struct BlockApplication {
    /// Registered application ID.
    /// (Visit the [registration page](https://xiph.org/flac/id.html) to register an ID with FLAC.)
    pub application_id: u32,
    /// Application data (n must be a multiple of 8)
    pub data: Vec<u8>,
}

impl DecodeSized for BlockApplication {
    fn from_reader_sized<R: Read>(reader: &mut R, size: usize) -> Result<Self> {
        Ok(BlockApplication {
            application_id: reader.read_u32::<BigEndian>()?,
            data: take(reader, size - 4)?,
        })
    }
}

impl Encode for BlockApplication {
    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<BigEndian>(self.application_id)?;
        writer.write_all(&self.data)?;
        Ok(())
    }
}

impl BlockApplication {
    /// Replaces the application data by copying from `data`.
    pub fn set_data(&mut self, data: &[u8]) {
        self.data = data.to_vec();
    }

    /// Replaces the application data, taking ownership of `data` rather than
    /// copying it.
    pub fn set_data_owned(&mut self, data: Vec<u8>) {
        self.data = data;
    }
}
