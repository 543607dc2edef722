// Copyright 2024 Logan Magee
//
// SPDX-License-Identifier: LicenseRef-Proprietary

//! Patches between images that embed deflate-compressed payloads.
//!
//! A small change to the uncompressed contents of a gzip member or zip entry rewrites most of its
//! compressed bytes, which defeats a plain binary diff. Image patches instead split the target
//! image into chunks: deflate streams are diffed in decompressed form and deflated again when the
//! patch is applied, and everything else is diffed as-is.

mod chunk;
mod deflate;
mod scan;

use std::{collections::HashMap, io::Write, ops::Range};

use log::{debug, trace, warn};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use sufsort::SuffixArray;

pub use self::{
    chunk::{Chunk, ChunkKind, IMAGE_MAGIC, ImagePatch},
    deflate::DeflateParams,
};
use self::scan::{DeflateEntry, EntryKey};
use crate::{
    DiffConfig,
    codec::Codec,
    container,
    diff::{self, check_source_len, encode_indexed},
    error::{self, Error, Result},
};

/// Returns `true` if `patch` starts with the image patch format tag.
///
/// # Examples
///
/// ```
/// # fn main() -> imgdelta::Result<()> {
/// let mut plain = Vec::new();
/// imgdelta::diff(b"old", b"new", &mut plain)?;
/// let mut image = Vec::new();
/// imgdelta::diff_image(b"old", b"new", &mut image)?;
///
/// assert!(!imgdelta::is_image_patch(&plain));
/// assert!(imgdelta::is_image_patch(&image));
/// # Ok(())
/// # }
/// ```
pub fn is_image_patch(patch: &[u8]) -> bool {
    patch.starts_with(&IMAGE_MAGIC)
}

/// Constructs an image patch between two images with default options
///
/// See [`diff_image_with_config()`].
///
/// # Errors
///
/// Returns an error if compression fails or an I/O error occurs while writing the patch.
pub fn diff_image<W>(old: &[u8], new: &[u8], patch: &mut W) -> Result<()>
where
    W: Write + ?Sized,
{
    diff_image_with_config(old, new, patch, &DiffConfig::default())
}

/// Constructs an image patch between two images
///
/// Gzip members and deflated zip entries of at least
/// [`min_deflate_chunk`](DiffConfig::min_deflate_chunk) decompressed bytes whose compressor
/// settings can be recovered become chunks of their own. Every chunk is encoded as whichever of
/// its literal bytes, a plain patch against the whole of `old`, or a plain patch between inflated
/// streams is smallest. Zip entries are paired with the `old` entry of the same name and gzip
/// members with the `old` member at the same position.
///
/// The resulting data written to `patch` can be applied with [`patch_image()`].
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
/// let old = b"image contents";
/// let new = b"new image contents";
/// let mut patch = Vec::new();
///
/// imgdelta::diff_image_with_config(old, new, &mut patch, DiffConfig::new().min_deflate_chunk(64))?;
///
/// assert_eq!(imgdelta::patch_image(old, &patch)?, new);
/// # Ok(())
/// # }
/// ```
pub fn diff_image_with_config<W>(
    old: &[u8],
    new: &[u8],
    patch: &mut W,
    config: &DiffConfig,
) -> Result<()>
where
    W: Write + ?Sized,
{
    check_source_len(old.len())?;
    let index = SuffixArray::new(old);
    let codec = config.make_codec();

    let old_entries = scan::scan(old);
    let mut by_key = HashMap::new();
    for entry in &old_entries {
        by_key.entry(&entry.key).or_insert(entry);
    }

    let regions = split(new, config);
    let session = DiffSession {
        old,
        new,
        index: &index,
        old_entries: &by_key,
        codec: codec.as_ref(),
        config,
    };

    #[cfg(feature = "parallel")]
    let chunks = if config.is_parallel() {
        regions
            .par_iter()
            .map(|region| session.encode(region))
            .collect::<Result<Vec<_>>>()?
    } else {
        regions
            .iter()
            .map(|region| session.encode(region))
            .collect::<Result<Vec<_>>>()?
    };
    #[cfg(not(feature = "parallel"))]
    let chunks = regions
        .iter()
        .map(|region| session.encode(region))
        .collect::<Result<Vec<_>>>()?;

    debug!(
        "split {} byte image into {} chunks ({} raw, {} normal, {} deflate)",
        new.len(),
        chunks.len(),
        count(&chunks, ChunkKind::Raw),
        count(&chunks, ChunkKind::Normal),
        count(&chunks, ChunkKind::Deflate),
    );

    chunk::write(old, new, &chunks, patch)
}

fn count(chunks: &[(Chunk, Vec<u8>)], kind: ChunkKind) -> usize {
    chunks.iter().filter(|(chunk, _)| chunk.kind() == kind).count()
}

/// A part of the target image to be encoded as one chunk
enum Region {
    Plain(Range<usize>),
    Deflate {
        entry: DeflateEntry,
        params: DeflateParams,
    },
}

impl Region {
    fn range(&self) -> Range<usize> {
        match self {
            Region::Plain(range) => range.clone(),
            Region::Deflate { entry, .. } => entry.range.clone(),
        }
    }
}

/// Splits `image` into regions that tile it in order.
fn split(image: &[u8], config: &DiffConfig) -> Vec<Region> {
    let mut regions = Vec::new();
    let mut pos = 0;

    for entry in scan::scan(image) {
        if entry.decompressed.len() < config.min_deflate_len() {
            trace!(
                "leaving {} byte deflate stream at {} in place",
                entry.decompressed.len(),
                entry.range.start,
            );
            continue;
        }

        let Some(params) = deflate::recover_params(&entry.decompressed, &image[entry.range.clone()])
        else {
            warn!(
                "could not recover compressor settings of deflate stream at {:?}, diffing it \
                 compressed",
                entry.range,
            );
            continue;
        };

        if pos < entry.range.start {
            regions.push(Region::Plain(pos..entry.range.start));
        }
        pos = entry.range.end;
        regions.push(Region::Deflate { entry, params });
    }

    if pos < image.len() {
        regions.push(Region::Plain(pos..image.len()));
    }

    regions
}

/// Everything shared by the chunks of one image diff
struct DiffSession<'a> {
    old: &'a [u8],
    new: &'a [u8],
    index: &'a SuffixArray<'a>,
    old_entries: &'a HashMap<&'a EntryKey, &'a DeflateEntry>,
    codec: &'a dyn Codec,
    config: &'a DiffConfig,
}

impl DiffSession<'_> {
    /// Encodes `region` as the smallest of its candidate chunks.
    fn encode(&self, region: &Region) -> Result<(Chunk, Vec<u8>)> {
        let range = region.range();
        let data = &self.new[range.clone()];
        let target = range.start as u64..range.end as u64;

        // Candidates in order of preference when sizes tie
        let mut best = (Chunk::raw(target.clone()), data.to_vec());

        let mut normal = Vec::new();
        let streams = encode_indexed(self.index, data, self.config);
        container::serialize(&streams, data.len() as u64, self.codec, &mut normal)?;
        if normal.len() < best.1.len() {
            best = (
                Chunk::normal(target.clone(), 0..self.old.len() as u64, normal.len() as u64),
                normal,
            );
        }

        if let Region::Deflate { entry, params } = region {
            if let Some(old_entry) = self.old_entries.get(&entry.key) {
                let mut sub_patch = Vec::new();
                diff::diff_with_config(
                    &old_entry.decompressed,
                    &entry.decompressed,
                    &mut sub_patch,
                    self.config,
                )?;

                if sub_patch.len() < best.1.len() {
                    let source = old_entry.range.start as u64..old_entry.range.end as u64;
                    best = (
                        Chunk::deflate(target, source, sub_patch.len() as u64, *params),
                        sub_patch,
                    );
                }
            }
        }

        trace!(
            "chunk {:?}: {:?}, {} byte sub-patch",
            best.0.target(),
            best.0.kind(),
            best.1.len(),
        );

        Ok(best)
    }
}

/// Reconstructs a new image from an old image and an image patch
///
/// The old image is checked against the hash recorded in the patch before anything else is done,
/// and the reconstructed image is checked against the recorded target hash before it is returned.
///
/// # Errors
///
/// Returns [`Error::SourceMismatch`] if `old` is not the image the patch was created against,
/// [`Error::Format`] if the patch directory is malformed, and [`Error::CorruptPatch`] if a chunk
/// fails to reconstruct or the result does not hash to the recorded target hash. Errors from the
/// plain sub-patches are passed through unchanged.
pub fn patch_image(old: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
    let image = ImagePatch::parse(patch)?;

    if old.len() as u64 != image.source_len() {
        return Err(Error::SourceMismatch(format!(
            "source is {} bytes, patch expects {}",
            old.len(),
            image.source_len(),
        )));
    }
    if blake3::hash(old).as_bytes() != image.source_hash() {
        return Err(Error::SourceMismatch("source hash differs".to_owned()));
    }

    let sub_patches: Vec<_> = image.sub_patches().collect();

    #[cfg(feature = "parallel")]
    let parts = sub_patches
        .par_iter()
        .map(|&(chunk, sub_patch)| apply_chunk(old, chunk, sub_patch))
        .collect::<Result<Vec<_>>>()?;
    #[cfg(not(feature = "parallel"))]
    let parts = sub_patches
        .iter()
        .map(|&(chunk, sub_patch)| apply_chunk(old, chunk, sub_patch))
        .collect::<Result<Vec<_>>>()?;

    let mut target = error::try_with_capacity(image.target_len())?;
    for part in parts {
        target.extend_from_slice(&part);
    }

    if blake3::hash(&target).as_bytes() != image.target_hash() {
        return Err(Error::corrupt("reconstructed image hash differs"));
    }

    debug!(
        "reconstructed {} byte image from {} chunks",
        target.len(),
        image.chunks().len(),
    );

    Ok(target)
}

fn apply_chunk(old: &[u8], chunk: &Chunk, sub_patch: &[u8]) -> Result<Vec<u8>> {
    // `ImagePatch::parse()` bounds the source range by the source length, which matches `old`
    let source = &old[chunk.source().start as usize..chunk.source().end as usize];

    let data = match chunk.kind() {
        ChunkKind::Raw => sub_patch.to_vec(),
        ChunkKind::Normal => crate::patch(source, sub_patch)?,
        ChunkKind::Deflate => {
            let params = chunk
                .deflate_params()
                .ok_or_else(|| Error::format("deflate chunk without settings"))?;
            let (inflated, consumed) = deflate::inflate(source)
                .filter(|&(_, consumed)| consumed == source.len())
                .ok_or_else(|| {
                    Error::corrupt(format!(
                        "source bytes {:?} are not a deflate stream",
                        chunk.source(),
                    ))
                })?;
            trace!("inflated {consumed} source bytes to {}", inflated.len());

            deflate::deflate(&crate::patch(&inflated, sub_patch)?, params)?
        }
    };

    let target = chunk.target();
    if data.len() as u64 != target.end - target.start {
        return Err(Error::corrupt(format!(
            "chunk {target:?} reconstructed to {} bytes",
            data.len(),
        )));
    }

    Ok(data)
}
