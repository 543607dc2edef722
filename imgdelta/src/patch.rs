// Copyright 2024 Logan Magee
//
// SPDX-License-Identifier: LicenseRef-Proprietary

use std::io::Write;

use log::debug;

use crate::{
    container,
    control::{ControlTriple, PatchStreams},
    error::{self, Error, Result},
    header::PatchHeader,
};

/// A patcher that reconstructs a new blob from an old blob and a patch
///
/// Creating a `Patcher` validates the patch header and decompresses every stream, so a patch
/// that fails to load never touches the old blob.
#[derive(Debug)]
pub struct Patcher<'a> {
    old: &'a [u8],
    header: PatchHeader,
    streams: PatchStreams,
}

impl<'a> Patcher<'a> {
    /// Creates a new `Patcher` for `old` and `patch`.
    ///
    /// # Errors
    ///
    /// Returns an error if the patch header is invalid or a stream fails to decompress. See
    /// [`container::deserialize()`] for details.
    ///
    /// # Examples
    ///
    /// ```
    /// use imgdelta::Patcher;
    ///
    /// # fn main() -> imgdelta::Result<()> {
    /// let old = b"Hello";
    /// let mut patch = Vec::new();
    /// imgdelta::diff(old, b"Hero", &mut patch)?;
    ///
    /// let patcher = Patcher::new(old, &patch)?;
    /// assert_eq!(patcher.target_len(), 4);
    /// assert_eq!(patcher.apply()?, b"Hero");
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(old: &'a [u8], patch: &[u8]) -> Result<Self> {
        let (header, streams) = container::deserialize(patch)?;

        Ok(Self {
            old,
            header,
            streams,
        })
    }

    /// The header of the loaded patch
    pub fn header(&self) -> &PatchHeader {
        &self.header
    }

    /// The length of the blob this patch reconstructs
    pub fn target_len(&self) -> u64 {
        self.header.target_len()
    }

    /// The decompressed streams of the loaded patch
    pub fn streams(&self) -> &PatchStreams {
        &self.streams
    }

    /// Reconstructs the new blob.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptPatch`] if the patch does not replay cleanly against the old blob
    /// and [`Error::Allocation`] if the new blob does not fit in memory.
    pub fn apply(&self) -> Result<Vec<u8>> {
        apply(self.old, &self.streams, self.header.target_len())
    }
}

/// Replays `streams` against `source` to reconstruct a target of exactly `target_len` bytes.
///
/// Replay starts with both the source and target cursors at 0. For each control, `copy_len` bytes
/// at the source cursor are added byte-wise to the next `copy_len` diff bytes, then the next
/// `extra_len` extra bytes are appended verbatim, then the source cursor moves by
/// `copy_len + seek`.
///
/// # Errors
///
/// Returns [`Error::CorruptPatch`] if a copy reads outside `source`, a stream runs out, the
/// controls overshoot `target_len`, or anything is left over once the controls are exhausted.
/// Returns [`Error::Allocation`] if `target_len` bytes cannot be allocated.
pub fn apply(source: &[u8], streams: &PatchStreams, target_len: u64) -> Result<Vec<u8>> {
    let mut target = error::try_with_capacity(target_len)?;
    let mut state = ApplyState::default();

    for (i, control) in streams.controls.iter().enumerate() {
        state
            .step(source, streams, control, target_len, &mut target)
            .map_err(|reason| Error::corrupt(format!("control {i}: {reason}")))?;
    }

    if target.len() as u64 != target_len {
        return Err(Error::corrupt(format!(
            "controls produced {} bytes, expected {target_len}",
            target.len(),
        )));
    }
    if state.diff_pos != streams.diff.len() || state.extra_pos != streams.extra.len() {
        return Err(Error::corrupt(format!(
            "{} diff and {} extra bytes left over",
            streams.diff.len() - state.diff_pos,
            streams.extra.len() - state.extra_pos,
        )));
    }

    debug!(
        "applied {} controls, reconstructed {} bytes",
        streams.controls.len(),
        target.len(),
    );

    Ok(target)
}

#[derive(Default)]
struct ApplyState {
    source_pos: i64,
    diff_pos: usize,
    extra_pos: usize,
}

impl ApplyState {
    fn step(
        &mut self,
        source: &[u8],
        streams: &PatchStreams,
        control: &ControlTriple,
        target_len: u64,
        target: &mut Vec<u8>,
    ) -> std::result::Result<(), String> {
        let produced = control
            .copy_len
            .checked_add(control.extra_len)
            .and_then(|len| len.checked_add(target.len() as u64))
            .filter(|&end| end <= target_len)
            .ok_or_else(|| format!("writes past the {target_len} byte target"))?;
        // Both lengths are bounded by `target_len`, which was allocated successfully
        let copy_len = control.copy_len as usize;
        let extra_len = control.extra_len as usize;

        if copy_len > 0 {
            let old = usize::try_from(self.source_pos)
                .ok()
                .and_then(|start| source.get(start..start.checked_add(copy_len)?))
                .ok_or_else(|| {
                    format!(
                        "copies {copy_len} bytes at source offset {} outside the {} byte source",
                        self.source_pos,
                        source.len(),
                    )
                })?;
            let diff = streams
                .diff
                .get(self.diff_pos..self.diff_pos + copy_len)
                .ok_or("diff stream exhausted")?;

            target.extend(old.iter().zip(diff).map(|(o, d)| o.wrapping_add(*d)));
            self.diff_pos += copy_len;
        }

        let extra = streams
            .extra
            .get(self.extra_pos..self.extra_pos + extra_len)
            .ok_or("extra stream exhausted")?;
        target.extend_from_slice(extra);
        self.extra_pos += extra_len;

        debug_assert_eq!(target.len() as u64, produced);

        self.source_pos = i64::try_from(copy_len)
            .ok()
            .and_then(|len| self.source_pos.checked_add(len)?.checked_add(control.seek))
            .ok_or("source cursor overflows")?;

        Ok(())
    }
}

/// Reconstructs a new blob from an old blob and a patch
///
/// This is a convenience method for creating a [`Patcher`] and applying it.
///
/// # Errors
///
/// Returns an error if the patch is malformed or does not apply to `old`.
///
/// # Examples
///
/// ```
/// # fn main() -> imgdelta::Result<()> {
/// let old = b"The quick brown fox";
/// let new = b"The quick red fox";
/// let mut patch = Vec::new();
/// imgdelta::diff(old, new, &mut patch)?;
///
/// assert_eq!(imgdelta::patch(old, &patch)?, new);
/// # Ok(())
/// # }
/// ```
pub fn patch(old: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
    Patcher::new(old, patch)?.apply()
}

/// Reconstructs a new blob from an old blob and a patch, writing it to `new`
///
/// Nothing is written to `new` unless the whole blob reconstructs successfully. If successful,
/// returns the number of bytes written to `new`.
///
/// # Errors
///
/// Returns an error if the patch is malformed, does not apply to `old`, or an I/O error occurs
/// while writing to `new`.
pub fn patch_to<W>(old: &[u8], patch: &[u8], new: &mut W) -> Result<u64>
where
    W: Write + ?Sized,
{
    let data = self::patch(old, patch)?;
    new.write_all(&data)?;

    Ok(data.len() as u64)
}
