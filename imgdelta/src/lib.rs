// Copyright 2024 Logan Magee
//
// SPDX-License-Identifier: LicenseRef-Proprietary

//! Compact binary patches for executables and firmware images.
//!
//! This crate creates binary deltas between arbitrary blobs and applies them to reconstruct the
//! new blob. Matching is driven by a suffix array over the old blob, and the resulting control,
//! diff and extra streams are compressed independently behind a fixed 32-byte header, in the
//! spirit of bsdiff.
//!
//! Images that embed deflate streams, such as gzip-compressed kernels or zip archives, can be
//! diffed in [image mode](crate::diff_image), which diffs those streams in decompressed form.
//!
//! # Examples
//!
//! Creating a patch file between two executable versions:
//!
//! ```no_run
//! use std::fs::{self, File};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let old = fs::read("app-v1.exe")?;
//! let new = fs::read("app-v2.exe")?;
//! let mut patch = File::create("app-v1-to-v2.bsdiff")?;
//!
//! imgdelta::diff(&old, &new, &mut patch)?;
//!
//! # Ok(())
//! # }
//! ```
//!
//! Applying a patch file to create an updated executable:
//!
//! ```no_run
//! use std::fs::{self, File};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let old = fs::read("app-v1.exe")?;
//! let patch = fs::read("app-v1-to-v2.bsdiff")?;
//! let mut new = File::create("app-v2.exe")?;
//!
//! imgdelta::patch_to(&old, &patch, &mut new)?;
//!
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "diff")]
mod bsdiff;
pub mod codec;
pub mod container;
mod control;
#[cfg(feature = "diff")]
mod diff;
mod error;
mod header;
#[cfg(feature = "image")]
mod image;
#[cfg(feature = "patch")]
mod patch;

#[cfg(feature = "bzip2")]
pub use codec::Bzip2Codec;
pub use codec::{Codec, ZstdCodec, codec_for_magic};
pub use control::{ControlTriple, PatchStreams};
#[cfg(feature = "diff")]
pub use diff::{CodecKind, DiffConfig, diff, diff_with_config, encode, encode_with_config};
pub use error::{Error, ErrorKind, Result};
pub use header::{HEADER_LEN, PatchHeader};
#[cfg(feature = "image")]
pub use image::{
    Chunk, ChunkKind, DeflateParams, IMAGE_MAGIC, ImagePatch, diff_image, diff_image_with_config,
    is_image_patch, patch_image,
};
#[cfg(feature = "patch")]
pub use patch::{Patcher, apply, patch, patch_to};
