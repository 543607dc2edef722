// Copyright 2024 Logan Magee
//
// SPDX-License-Identifier: LicenseRef-Proprietary

use std::io::Write;

use log::debug;
use sufsort::SuffixArray;

#[cfg(feature = "bzip2")]
use crate::codec::Bzip2Codec;
use crate::{
    bsdiff::{ControlProducer, SearchParams},
    codec::{Codec, ZstdCodec},
    container,
    control::PatchStreams,
    error::{Error, Result},
};

/// Constructs a patch between two blobs with default options
///
/// The diffing algorithm used works on arbitrary blobs. It is particularly well-suited to
/// executables and firmware, where a new version mostly rearranges and lightly edits the bytes of
/// the old one.
///
/// The resulting data written to `patch` can later be applied to `old` to reconstruct `new` by
/// using a [`Patcher`](crate::Patcher).
///
/// This function is a shorthand for [`diff_with_config()`] called with the default options. If you
/// want to tune the algorithm configuration, see that function instead.
///
/// # Errors
///
/// Returns an error if compression fails or an I/O error occurs while writing the patch.
///
/// # Examples
///
/// ```
/// # fn main() -> imgdelta::Result<()> {
/// let old = b"Hello";
/// let new = b"Hero";
/// let mut patch = Vec::new();
///
/// imgdelta::diff(old, new, &mut patch)?;
///
/// # Ok(())
/// # }
/// ```
pub fn diff<W>(old: &[u8], new: &[u8], patch: &mut W) -> Result<()>
where
    W: Write + ?Sized,
{
    diff_with_config(old, new, patch, &DiffConfig::default())
}

/// Constructs a patch between two blobs
///
/// The resulting data written to `patch` can later be applied to `old` to reconstruct `new` by
/// using a [`Patcher`](crate::Patcher).
///
/// # Errors
///
/// Returns [`Error::Allocation`] if `old` is too large to index, and otherwise an error if
/// compression fails or an I/O error occurs while writing the patch.
///
/// # Examples
///
/// ```
/// # fn main() -> imgdelta::Result<()> {
/// use imgdelta::DiffConfig;
///
/// let old = b"Hello";
/// let new = b"Hero";
/// let mut patch = Vec::new();
///
/// imgdelta::diff_with_config(old, new, &mut patch, DiffConfig::new().compression_threads(0))?;
///
/// # Ok(())
/// # }
/// ```
pub fn diff_with_config<W>(
    old: &[u8],
    new: &[u8],
    patch: &mut W,
    config: &DiffConfig,
) -> Result<()>
where
    W: Write + ?Sized,
{
    check_source_len(old.len())?;
    let streams = encode_with_config(old, new, config);

    container::serialize(&streams, new.len() as u64, config.make_codec().as_ref(), patch)
}

/// Encodes `new` against `old` as uncompressed patch streams with default options.
///
/// Replaying the result with [`apply()`](crate::apply) reproduces `new` exactly.
///
/// # Examples
///
/// ```
/// use imgdelta::ControlTriple;
///
/// let streams = imgdelta::encode(b"", b"hello");
///
/// assert_eq!(
///     streams.controls,
///     [ControlTriple { copy_len: 0, extra_len: 5, seek: 0 }],
/// );
/// assert_eq!(streams.extra, b"hello");
/// ```
pub fn encode(old: &[u8], new: &[u8]) -> PatchStreams {
    encode_with_config(old, new, &DiffConfig::default())
}

/// Encodes `new` against `old` as uncompressed patch streams.
///
/// # Panics
///
/// Panics if `old` is longer than [`u32::MAX`] bytes. [`diff_with_config()`] reports this as an
/// error instead.
pub fn encode_with_config(old: &[u8], new: &[u8], config: &DiffConfig) -> PatchStreams {
    let index = SuffixArray::new(old);

    encode_indexed(&index, new, config)
}

/// Rejects sources the suffix array cannot index.
pub(crate) fn check_source_len(len: usize) -> Result<()> {
    if u32::try_from(len).is_err() {
        return Err(Error::Allocation {
            requested: len as u64,
            source: None,
        });
    }

    Ok(())
}

/// Encodes `new` against an already indexed source.
///
/// Building the suffix array dominates the cost of a diff, so callers encoding several targets
/// against one source share a single index.
pub(crate) fn encode_indexed(
    index: &SuffixArray<'_>,
    new: &[u8],
    config: &DiffConfig,
) -> PatchStreams {
    let mut streams = PatchStreams::default();
    ControlProducer::new(index, new, config.search_params()).encode_into(&mut streams);

    debug!(
        "encoded {} target bytes against {} source bytes: {} controls, {} diff, {} extra",
        new.len(),
        index.len(),
        streams.controls.len(),
        streams.diff.len(),
        streams.extra.len(),
    );

    streams
}

/// The codec a [`DiffConfig`] compresses patch streams with.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum CodecKind {
    /// zstd, tagged `ZSDIFF40`
    #[default]
    Zstd,
    /// bzip2, tagged `BSDIFF40` and readable by classic bspatch
    #[cfg(feature = "bzip2")]
    Bzip2,
}

/// Configuration for a diff operation.
///
/// This struct can be used to fine-tune parameters to the diffing algorithm. The defaults should
/// be optimal for most use cases, but you may wish to change them in especially
/// resource-constrained or powerful computing environments for better performance.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct DiffConfig {
    codec: CodecKind,
    compression_threads: u32,
    compression_level: i32,
    candidate_window: usize,
    mismatch_threshold: usize,
    min_deflate_chunk: usize,
    parallel: bool,
}

impl DiffConfig {
    /// Creates a new configuration for diff operations
    ///
    /// This configuration can be reused across diff operations.
    pub const fn new() -> Self {
        Self {
            codec: CodecKind::Zstd,
            compression_threads: Self::DEFAULT_COMPRESSION_THREADS,
            compression_level: Self::DEFAULT_COMPRESSION_LEVEL,
            candidate_window: Self::DEFAULT_CANDIDATE_WINDOW,
            mismatch_threshold: Self::DEFAULT_MISMATCH_THRESHOLD,
            min_deflate_chunk: Self::DEFAULT_MIN_DEFLATE_CHUNK,
            parallel: cfg!(feature = "parallel"),
        }
    }

    /// Sets the codec used to compress the patch streams.
    ///
    /// The codec determines the patch's format tag, and patches can only be applied by builds that
    /// include the same codec.
    pub fn codec(&mut self, codec: CodecKind) -> &mut Self {
        self.codec = codec;
        self
    }

    /// Sets the number of threads to use for compressing the patch file.
    ///
    /// Setting this to a value more than 0 allows compression to run on a separate thread than
    /// the caller, at a slight cost to maximum memory usage. Values above 1 result in greatly
    /// diminishing returns for patch-sized inputs.
    ///
    /// A value of 0 means that compression will run on the calling thread. This setting only
    /// affects zstd.
    pub fn compression_threads(&mut self, threads: u32) -> &mut Self {
        self.compression_threads = threads;
        self
    }

    /// Sets the compression level to use for compressing the patch file.
    ///
    /// For zstd, the compression level can be set to any value between -7 and 22 inclusive. Any
    /// value outside of this range will be clamped to fit inside the range. Levels 20-22 result in
    /// significantly higher memory usage.
    ///
    /// For bzip2 the level is clamped to 1-9.
    pub fn compression_level(&mut self, level: i32) -> &mut Self {
        self.compression_level = level;
        self
    }

    /// Sets how many lexicographically adjacent suffixes are examined on each side of the binary
    /// search result when looking for the longest match.
    ///
    /// Larger windows find better matches in highly repetitive sources at the cost of diff speed.
    /// Values below 1 are treated as 1.
    pub fn candidate_window(&mut self, window: usize) -> &mut Self {
        self.candidate_window = window;
        self
    }

    /// Sets how many more bytes a fresh match must cover than the current alignment already does
    /// before a new control is started for it.
    ///
    /// Lower values produce more, shorter controls.
    pub fn mismatch_threshold(&mut self, threshold: usize) -> &mut Self {
        self.mismatch_threshold = threshold;
        self
    }

    /// Sets the smallest decompressed size at which a deflate stream inside an image is diffed in
    /// decompressed form.
    ///
    /// Smaller streams are diffed as part of the surrounding bytes.
    pub fn min_deflate_chunk(&mut self, len: usize) -> &mut Self {
        self.min_deflate_chunk = len;
        self
    }

    /// Sets whether image chunks are diffed on multiple threads.
    ///
    /// This has no effect unless the `parallel` feature is enabled.
    pub fn parallel(&mut self, parallel: bool) -> &mut Self {
        self.parallel = parallel;
        self
    }

    pub(crate) fn make_codec(&self) -> Box<dyn Codec> {
        match self.codec {
            CodecKind::Zstd => Box::new(ZstdCodec::new(
                self.compression_level,
                self.compression_threads,
            )),
            #[cfg(feature = "bzip2")]
            CodecKind::Bzip2 => Box::new(Bzip2Codec::new(
                u32::try_from(self.compression_level).unwrap_or(1),
            )),
        }
    }

    pub(crate) fn search_params(&self) -> SearchParams {
        SearchParams {
            candidate_window: self.candidate_window,
            mismatch_threshold: self.mismatch_threshold,
        }
    }

    #[cfg(feature = "image")]
    pub(crate) fn min_deflate_len(&self) -> usize {
        self.min_deflate_chunk
    }

    /// Returns whether image chunks are diffed on multiple threads.
    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// The default number of compression threads to create
    ///
    /// We set this to 1 to ensure diffing and compression can run concurrently.
    pub const DEFAULT_COMPRESSION_THREADS: u32 = 1;

    /// The default compression level to use
    ///
    /// We set this to 19 because it obtains the highest compression ratio without incurring the
    /// significant memory costs of higher levels.
    pub const DEFAULT_COMPRESSION_LEVEL: i32 = 19;

    /// The default number of neighbouring suffixes examined on each side of a binary search
    pub const DEFAULT_CANDIDATE_WINDOW: usize = SuffixArray::DEFAULT_CANDIDATE_WINDOW;

    /// The default mismatch threshold
    pub const DEFAULT_MISMATCH_THRESHOLD: usize = 8;

    /// The default minimum decompressed size of a deflate chunk
    pub const DEFAULT_MIN_DEFLATE_CHUNK: usize = 512;
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self::new()
    }
}
