// Copyright 2024 Logan Magee
//
// SPDX-License-Identifier: LicenseRef-Proprietary

//! Raw deflate streams and the compressor settings needed to reproduce them.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{Error, Result};

/// The only window size zlib-compatible raw deflate recompression is attempted with
pub(crate) const WINDOW_BITS: u8 = 15;
/// The only memory level zlib-compatible raw deflate recompression is attempted with
pub(crate) const MEM_LEVEL: u8 = 8;
/// `Z_DEFAULT_STRATEGY`
pub(crate) const DEFAULT_STRATEGY: u8 = 0;

/// Levels tried when recovering the settings a deflate stream was produced with
const LEVELS: [u8; 10] = [9, 8, 7, 6, 5, 4, 3, 2, 1, 0];

const MIN_OUTPUT_CHUNK: usize = 32 * 1024;

/// Compressor settings that reproduce a deflate stream bit-for-bit.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct DeflateParams {
    level: u8,
    window_bits: u8,
    mem_level: u8,
    strategy: u8,
}

impl DeflateParams {
    /// Settings for raw deflate at `level` with zlib's default window, memory level and strategy
    pub(crate) fn with_level(level: u8) -> Self {
        Self {
            level,
            window_bits: WINDOW_BITS,
            mem_level: MEM_LEVEL,
            strategy: DEFAULT_STRATEGY,
        }
    }

    /// Parses the four-byte directory form written by [`to_bytes()`](Self::to_bytes).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] for settings this build cannot recompress with.
    pub(crate) fn from_bytes(bytes: [u8; 4]) -> Result<Self> {
        let [level, window_bits, mem_level, strategy] = bytes;

        if level > 9
            || window_bits != WINDOW_BITS
            || mem_level != MEM_LEVEL
            || strategy != DEFAULT_STRATEGY
        {
            return Err(Error::format(format!(
                "unsupported deflate settings: level {level}, window bits {window_bits}, memory \
                 level {mem_level}, strategy {strategy}",
            )));
        }

        Ok(Self::with_level(level))
    }

    pub(crate) fn to_bytes(self) -> [u8; 4] {
        [self.level, self.window_bits, self.mem_level, self.strategy]
    }

    /// The compression level, 0-9
    pub fn level(&self) -> u8 {
        self.level
    }

    /// The base-two logarithm of the window size
    pub fn window_bits(&self) -> u8 {
        self.window_bits
    }

    /// The zlib memory level
    pub fn mem_level(&self) -> u8 {
        self.mem_level
    }

    /// The zlib strategy
    pub fn strategy(&self) -> u8 {
        self.strategy
    }
}

/// Inflates the raw deflate stream at the start of `data`.
///
/// Returns the decompressed bytes and the number of input bytes the stream occupies, or `None` if
/// `data` does not start with a complete deflate stream.
pub(crate) fn inflate(data: &[u8]) -> Option<(Vec<u8>, usize)> {
    let mut inflater = Decompress::new(false);
    let mut out = Vec::new();

    loop {
        if out.len() == out.capacity() {
            out.try_reserve(out.capacity().max(MIN_OUTPUT_CHUNK)).ok()?;
        }

        let consumed = inflater.total_in() as usize;
        let produced = inflater.total_out();
        let status = inflater
            .decompress_vec(&data[consumed..], &mut out, FlushDecompress::None)
            .ok()?;

        match status {
            Status::StreamEnd => return Some((out, inflater.total_in() as usize)),
            // Stalled with room to spare means the input ran out mid-stream
            Status::Ok | Status::BufError
                if inflater.total_out() == produced
                    && inflater.total_in() as usize == consumed
                    && out.len() < out.capacity() =>
            {
                return None;
            }
            Status::Ok | Status::BufError => {}
        }
    }
}

/// Deflates `data` with `params`.
///
/// # Errors
///
/// Returns [`Error::Allocation`] if the output does not fit in memory.
pub(crate) fn deflate(data: &[u8], params: DeflateParams) -> Result<Vec<u8>> {
    let mut deflater = Compress::new(Compression::new(u32::from(params.level)), false);
    // Stored blocks make the output a little larger than the input at worst
    let mut out = crate::error::try_with_capacity(data.len() as u64 / 2 + 64)?;

    loop {
        if out.len() == out.capacity() {
            let additional = out.capacity().max(MIN_OUTPUT_CHUNK);
            out.try_reserve(additional)
                .map_err(|e| Error::Allocation {
                    requested: (out.capacity() + additional) as u64,
                    source: Some(e),
                })?;
        }

        let consumed = deflater.total_in() as usize;
        let status = deflater
            .compress_vec(&data[consumed..], &mut out, FlushCompress::Finish)
            .map_err(|e| Error::Codec {
                codec: "deflate",
                source: std::io::Error::other(e),
            })?;

        if status == Status::StreamEnd {
            return Ok(out);
        }
    }
}

/// Finds the settings that turn `decompressed` back into exactly `compressed`.
pub(crate) fn recover_params(decompressed: &[u8], compressed: &[u8]) -> Option<DeflateParams> {
    LEVELS
        .into_iter()
        .map(DeflateParams::with_level)
        .find(|&params| {
            deflate(decompressed, params).is_ok_and(|recompressed| recompressed == compressed)
        })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::DeflateEncoder;

    use super::*;

    fn sample() -> Vec<u8> {
        (0..5_000u32)
            .flat_map(|i| format!("line {} of {}\n", i % 97, i % 13).into_bytes())
            .collect()
    }

    fn reference_deflate(data: &[u8], level: u32) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), flate2::Compression::new(level));
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn inflate_reports_stream_length() {
        let data = sample();
        let mut compressed = reference_deflate(&data, 6);
        let stream_len = compressed.len();
        compressed.extend_from_slice(b"trailing bytes");

        let (inflated, consumed) = inflate(&compressed).unwrap();
        assert_eq!(inflated, data);
        assert_eq!(consumed, stream_len);
    }

    #[test]
    fn inflate_rejects_truncated_stream() {
        let compressed = reference_deflate(&sample(), 6);

        assert!(inflate(&compressed[..compressed.len() / 2]).is_none());
    }

    #[test]
    fn inflate_rejects_garbage() {
        assert!(inflate(&[0xff; 64]).is_none());
        assert!(inflate(&[]).is_none());
    }

    #[test]
    fn deflate_matches_encoder() {
        let data = sample();

        for level in [1, 6, 9] {
            assert_eq!(
                deflate(&data, DeflateParams::with_level(level as u8)).unwrap(),
                reference_deflate(&data, level),
            );
        }
    }

    #[test]
    fn recovers_level() {
        let data = sample();

        for level in [1, 4, 6, 9] {
            let compressed = reference_deflate(&data, level);
            let params = recover_params(&data, &compressed).unwrap();

            // Several levels may share an output; any of them reproduces the stream
            assert_eq!(deflate(&data, params).unwrap(), compressed);
        }
    }

    #[test]
    fn unrecoverable_stream() {
        let data = sample();
        let mut compressed = reference_deflate(&data, 6);
        compressed.push(0);

        assert_eq!(recover_params(&data, &compressed), None);
    }

    #[test]
    fn params_bytes() {
        let params = DeflateParams::with_level(6);

        assert_eq!(params.to_bytes(), [6, 15, 8, 0]);
        assert_eq!(DeflateParams::from_bytes([6, 15, 8, 0]).unwrap(), params);
        assert!(DeflateParams::from_bytes([6, 12, 8, 0]).is_err());
        assert!(DeflateParams::from_bytes([10, 15, 8, 0]).is_err());
    }
}
