// Copyright 2024 Logan Magee
//
// SPDX-License-Identifier: Apache-2.0

use std::io::{self, Write};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::error::{Error, Result};

/// The length of the fixed patch header in bytes
pub const HEADER_LEN: usize = 32;

/// The fixed-size header at the start of every patch.
///
/// The header identifies the codec the three streams were compressed with and records enough
/// lengths to slice the body without delimiters:
///
/// | Offset | Size | Contents                                   |
/// |--------|------|--------------------------------------------|
/// | 0      | 8    | Format tag                                 |
/// | 8      | 8    | Compressed control stream length (`i64` LE) |
/// | 16     | 8    | Compressed diff stream length (`i64` LE)    |
/// | 24     | 8    | Reconstructed target length (`i64` LE)      |
///
/// The compressed extra stream takes up the remainder of the patch.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PatchHeader {
    magic: [u8; 8],
    control_len: u64,
    diff_len: u64,
    target_len: u64,
}

impl PatchHeader {
    pub(crate) fn new(magic: [u8; 8], control_len: u64, diff_len: u64, target_len: u64) -> Self {
        Self {
            magic,
            control_len,
            diff_len,
            target_len,
        }
    }

    /// Parses the header at the start of `patch`.
    ///
    /// Only the lengths are validated here: they must be non-negative and the control and diff
    /// streams must fit inside `patch`. Whether the format tag is known is up to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] if `patch` is shorter than a header or the lengths are
    /// inconsistent with the size of `patch`.
    pub fn parse(patch: &[u8]) -> Result<Self> {
        if patch.len() < HEADER_LEN {
            return Err(Error::format(format!(
                "patch is {} bytes, shorter than the {HEADER_LEN} byte header",
                patch.len(),
            )));
        }

        let mut magic = [0; 8];
        magic.copy_from_slice(&patch[..8]);

        let read_len = |offset: usize, what: &str| {
            let len = LittleEndian::read_i64(&patch[offset..offset + 8]);
            u64::try_from(len).map_err(|_| Error::format(format!("negative {what} length {len}")))
        };
        let control_len = read_len(8, "control stream")?;
        let diff_len = read_len(16, "diff stream")?;
        let target_len = read_len(24, "target")?;

        let body_len = (patch.len() - HEADER_LEN) as u64;
        if control_len
            .checked_add(diff_len)
            .is_none_or(|streams| streams > body_len)
        {
            return Err(Error::format(format!(
                "stream lengths {control_len} + {diff_len} exceed the {body_len} byte body",
            )));
        }

        Ok(Self {
            magic,
            control_len,
            diff_len,
            target_len,
        })
    }

    pub(crate) fn write<W>(&self, w: &mut W) -> io::Result<()>
    where
        W: Write + ?Sized,
    {
        w.write_all(&self.magic)?;
        w.write_i64::<LittleEndian>(to_i64(self.control_len))?;
        w.write_i64::<LittleEndian>(to_i64(self.diff_len))?;
        w.write_i64::<LittleEndian>(to_i64(self.target_len))?;

        Ok(())
    }

    /// The format tag
    pub fn magic(&self) -> [u8; 8] {
        self.magic
    }

    /// The length of the compressed control stream
    pub fn control_len(&self) -> u64 {
        self.control_len
    }

    /// The length of the compressed diff stream
    pub fn diff_len(&self) -> u64 {
        self.diff_len
    }

    /// The length of the reconstructed target
    pub fn target_len(&self) -> u64 {
        self.target_len
    }
}

// Lengths originate from in-memory buffers, which never exceed `isize::MAX`
fn to_i64(len: u64) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(control: i64, diff: i64, target: i64, body: usize) -> Vec<u8> {
        let mut out = b"ZSDIFF40".to_vec();
        out.extend_from_slice(&control.to_le_bytes());
        out.extend_from_slice(&diff.to_le_bytes());
        out.extend_from_slice(&target.to_le_bytes());
        out.resize(HEADER_LEN + body, 0);
        out
    }

    #[test]
    fn write_then_parse() {
        let header = PatchHeader::new(*b"ZSDIFF40", 3, 4, 100);
        let mut out = Vec::new();
        header.write(&mut out).unwrap();
        out.extend_from_slice(&[0; 10]);

        assert_eq!(out.len(), HEADER_LEN + 10);
        assert_eq!(PatchHeader::parse(&out).unwrap(), header);
    }

    #[test]
    fn truncated() {
        let err = PatchHeader::parse(&[0; HEADER_LEN - 1]).unwrap_err();

        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn negative_length() {
        let patch = header_bytes(-1, 0, 0, 0);

        assert!(matches!(PatchHeader::parse(&patch), Err(Error::Format(_))));
    }

    #[test]
    fn streams_longer_than_body() {
        let patch = header_bytes(5, 6, 0, 10);

        assert!(matches!(PatchHeader::parse(&patch), Err(Error::Format(_))));
    }

    #[test]
    fn overflowing_lengths() {
        let patch = header_bytes(i64::MAX, i64::MAX, 0, 10);

        assert!(matches!(PatchHeader::parse(&patch), Err(Error::Format(_))));
    }
}
