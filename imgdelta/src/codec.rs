// Copyright 2024 Logan Magee
//
// SPDX-License-Identifier: LicenseRef-Proprietary

//! Compression codecs for the three patch streams.
//!
//! The patch format is defined in terms of a codec's compressed byte layout, so each codec carries
//! its own format tag. Patches written with one codec can only be read back with the same codec.

#[cfg(feature = "bzip2")]
use std::io::Read;
use std::io::Write;

use crate::error::{Error, Result};

/// Format tag of patches whose streams are compressed with zstd
pub const ZSTD_MAGIC: [u8; 8] = *b"ZSDIFF40";

/// Format tag of patches whose streams are compressed with bzip2, as written by classic bsdiff
pub const BZIP2_MAGIC: [u8; 8] = *b"BSDIFF40";

/// A byte-stream-in, byte-stream-out compressor.
pub trait Codec: Send + Sync {
    /// The format tag written at the start of patches using this codec
    fn magic(&self) -> [u8; 8];

    /// Compresses `data`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if the underlying compressor fails.
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompresses `data`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if `data` is not valid compressed data for this codec.
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Returns `false` if `data` is known not to be exactly one complete compressed frame.
    ///
    /// Codecs that cannot tell without decompressing return `true`.
    fn is_single_frame(&self, _data: &[u8]) -> bool {
        true
    }
}

/// The zstd codec.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ZstdCodec {
    level: i32,
    threads: u32,
}

impl ZstdCodec {
    /// Creates a zstd codec compressing at `level` with `threads` worker threads.
    ///
    /// See [`DiffConfig`](crate::DiffConfig) for the meaning of both values. Neither affects
    /// decompression.
    pub const fn new(level: i32, threads: u32) -> Self {
        Self { level, threads }
    }
}

impl Codec for ZstdCodec {
    fn magic(&self) -> [u8; 8] {
        ZSTD_MAGIC
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let codec_err = |source| Error::Codec {
            codec: "zstd",
            source,
        };

        let mut encoder = zstd::Encoder::new(Vec::new(), self.level).map_err(codec_err)?;
        #[cfg(feature = "diff")]
        encoder.multithread(self.threads).map_err(codec_err)?;
        encoder.write_all(data).map_err(codec_err)?;

        encoder.finish().map_err(codec_err)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::stream::decode_all(data).map_err(|source| Error::Codec {
            codec: "zstd",
            source,
        })
    }

    fn is_single_frame(&self, data: &[u8]) -> bool {
        zstd::zstd_safe::find_frame_compressed_size(data) == Ok(data.len())
    }
}

/// The bzip2 codec, compatible with classic bsdiff patches.
#[cfg(feature = "bzip2")]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Bzip2Codec {
    level: u32,
}

#[cfg(feature = "bzip2")]
impl Bzip2Codec {
    /// Creates a bzip2 codec compressing at `level`, clamped to 1-9.
    pub fn new(level: u32) -> Self {
        Self {
            level: level.clamp(1, 9),
        }
    }
}

#[cfg(feature = "bzip2")]
impl Codec for Bzip2Codec {
    fn magic(&self) -> [u8; 8] {
        BZIP2_MAGIC
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let codec_err = |source| Error::Codec {
            codec: "bzip2",
            source,
        };

        let mut encoder =
            bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::new(self.level));
        encoder.write_all(data).map_err(codec_err)?;

        encoder.finish().map_err(codec_err)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        bzip2::read::BzDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|source| Error::Codec {
                codec: "bzip2",
                source,
            })?;

        Ok(out)
    }

    fn is_single_frame(&self, data: &[u8]) -> bool {
        let mut decoder = bzip2::Decompress::new(false);
        let mut scratch = vec![0; 32 * 1024];

        loop {
            let consumed = decoder.total_in() as usize;
            let produced = decoder.total_out();

            match decoder.decompress(&data[consumed..], &mut scratch) {
                Ok(bzip2::Status::StreamEnd) => return decoder.total_in() as usize == data.len(),
                // No progress with output room left means the input ended mid-stream
                Ok(_)
                    if decoder.total_in() as usize == consumed
                        && decoder.total_out() == produced =>
                {
                    return false;
                }
                Ok(_) => {}
                Err(_) => return false,
            }
        }
    }
}

/// Returns the codec that reads patches tagged with `magic`.
///
/// # Errors
///
/// Returns [`Error::Format`] if no codec compiled into this build uses `magic`.
pub fn codec_for_magic(magic: [u8; 8]) -> Result<Box<dyn Codec>> {
    match magic {
        // Decompression parameters are read from the stream itself
        ZSTD_MAGIC => Ok(Box::new(ZstdCodec::new(0, 0))),
        #[cfg(feature = "bzip2")]
        BZIP2_MAGIC => Ok(Box::new(Bzip2Codec::new(9))),
        _ => Err(Error::format(format!(
            "unrecognized format tag {}",
            magic.escape_ascii(),
        ))),
    }
}
