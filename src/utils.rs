//! Byte Packer (spec §4.1) and small `Read`-based helpers shared by the
//! block codec.
//!
//! The pack/unpack functions are pure: no I/O, no bounds checking beyond a
//! `debug_assert!` on the width. Callers (the per-block-kind codecs) hold
//! the contract that `bytes <= 8` and that the destination slice is at
//! least `bytes` long, exactly as the original's `pack_uint32_`/
//! `unpack_uint32_` family does.

use crate::prelude::*;
use std::io::Read;
use std::path::Path;

/// Snapshot of a file's stat info worth restoring after a tempfile rename
/// replaces it in place: mtime/atime everywhere, plus mode and owner on
/// Unix. Mirrors the original's `(void)utime(...)`/`(void)chown(...)` pair
/// in `metadata_iterators.c`'s rewrite path -- best effort, since restoring
/// owner generally requires privileges the process may not have.
pub(crate) struct PreservedStats {
    mtime: filetime::FileTime,
    atime: filetime::FileTime,
    #[cfg(unix)]
    mode: u32,
    #[cfg(unix)]
    uid: u32,
    #[cfg(unix)]
    gid: u32,
}

impl PreservedStats {
    pub(crate) fn capture(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        #[cfg(unix)]
        let (mode, uid, gid) = {
            use std::os::unix::fs::MetadataExt;
            (meta.mode(), meta.uid(), meta.gid())
        };
        Ok(PreservedStats {
            mtime: filetime::FileTime::from_last_modification_time(&meta),
            atime: filetime::FileTime::from_last_access_time(&meta),
            #[cfg(unix)]
            mode,
            #[cfg(unix)]
            uid,
            #[cfg(unix)]
            gid,
        })
    }

    pub(crate) fn restore(&self, path: &Path) {
        let _ = filetime::set_file_times(path, self.atime, self.mtime);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(self.mode));
            let _ = std::os::unix::fs::chown(path, Some(self.uid), Some(self.gid));
        }
    }
}

pub(crate) fn take<R: Read>(reader: &mut R, len: usize) -> std::io::Result<Vec<u8>> {
    let mut r = Vec::with_capacity(len);
    std::io::copy(&mut reader.take(len as u64), &mut r)?;
    Ok(r)
}

pub(crate) fn take_to_end<R: Read>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut r = Vec::new();
    reader.read_to_end(&mut r)?;
    Ok(r)
}

pub(crate) fn take_string<R: Read>(reader: &mut R, len: usize) -> Result<String> {
    let r = take(reader, len)?;
    Ok(String::from_utf8_lossy(&r).to_string())
}

pub(crate) fn skip<R: Read>(reader: &mut R, len: usize) -> std::io::Result<u64> {
    std::io::copy(&mut reader.take(len as u64), &mut std::io::sink())
}

/// Packs the low `bytes` bytes of `val`, big-endian, into `dst[..bytes]`.
pub fn pack_u64_be(val: u64, dst: &mut [u8], bytes: usize) {
    debug_assert!(bytes <= 8 && dst.len() >= bytes);
    for i in 0..bytes {
        dst[i] = (val >> (8 * (bytes - 1 - i))) as u8;
    }
}

/// Packs the low `bytes` bytes of `val`, little-endian, into `dst[..bytes]`.
pub fn pack_u64_le(val: u64, dst: &mut [u8], bytes: usize) {
    debug_assert!(bytes <= 8 && dst.len() >= bytes);
    for (i, slot) in dst.iter_mut().take(bytes).enumerate() {
        *slot = (val >> (8 * i)) as u8;
    }
}

/// Unpacks `bytes` bytes from `src`, big-endian, into a `u64`.
pub fn unpack_u64_be(src: &[u8], bytes: usize) -> u64 {
    debug_assert!(bytes <= 8 && src.len() >= bytes);
    let mut val = 0u64;
    for &b in &src[..bytes] {
        val = (val << 8) | b as u64;
    }
    val
}

/// Unpacks `bytes` bytes from `src`, little-endian, into a `u64`.
pub fn unpack_u64_le(src: &[u8], bytes: usize) -> u64 {
    debug_assert!(bytes <= 8 && src.len() >= bytes);
    let mut val = 0u64;
    for (i, &b) in src[..bytes].iter().enumerate() {
        val |= (b as u64) << (8 * i);
    }
    val
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn be_round_trip() {
        let mut buf = [0u8; 3];
        pack_u64_be(0x01_02_03, &mut buf, 3);
        assert_eq!(buf, [0x01, 0x02, 0x03]);
        assert_eq!(unpack_u64_be(&buf, 3), 0x01_02_03);
    }

    #[test]
    fn le_round_trip() {
        let mut buf = [0u8; 4];
        pack_u64_le(0x01_02_03_04, &mut buf, 4);
        assert_eq!(buf, [0x04, 0x03, 0x02, 0x01]);
        assert_eq!(unpack_u64_le(&buf, 4), 0x01_02_03_04);
    }
}
