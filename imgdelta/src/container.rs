// Copyright 2024 Logan Magee
//
// SPDX-License-Identifier: LicenseRef-Proprietary

use std::io::Write;

use log::trace;

use crate::{
    codec::{Codec, codec_for_magic},
    control::{self, PatchStreams},
    error::{Error, Result},
    header::{HEADER_LEN, PatchHeader},
};

/// Compresses `streams` with `codec` and writes them to `patch` behind a [`PatchHeader`].
///
/// # Errors
///
/// Returns an error if compression fails or an I/O error occurs while writing to `patch`.
///
/// # Examples
///
/// ```
/// # fn main() -> imgdelta::Result<()> {
/// use imgdelta::{ZstdCodec, container};
///
/// let streams = imgdelta::encode(b"Hello", b"Hero");
/// let mut patch = Vec::new();
/// container::serialize(&streams, 4, &ZstdCodec::new(3, 0), &mut patch)?;
///
/// let (header, decoded) = container::deserialize(&patch)?;
/// assert_eq!(header.target_len(), 4);
/// assert_eq!(decoded, streams);
/// # Ok(())
/// # }
/// ```
pub fn serialize<W>(
    streams: &PatchStreams,
    target_len: u64,
    codec: &dyn Codec,
    patch: &mut W,
) -> Result<()>
where
    W: Write + ?Sized,
{
    let control = codec.compress(&control::encode(&streams.controls))?;
    let diff = codec.compress(&streams.diff)?;
    let extra = codec.compress(&streams.extra)?;

    trace!(
        "compressed streams: control {} -> {}, diff {} -> {}, extra {} -> {}",
        streams.controls.len() * control::CONTROL_TRIPLE_LEN,
        control.len(),
        streams.diff.len(),
        diff.len(),
        streams.extra.len(),
        extra.len(),
    );

    PatchHeader::new(
        codec.magic(),
        control.len() as u64,
        diff.len() as u64,
        target_len,
    )
    .write(patch)?;
    patch.write_all(&control)?;
    patch.write_all(&diff)?;
    patch.write_all(&extra)?;

    Ok(())
}

/// Splits `patch` into its header and decompressed streams.
///
/// The codec is chosen by the header's format tag.
///
/// # Errors
///
/// Returns [`Error::Format`] if the header is malformed, its format tag is unknown, or its lengths
/// disagree with the body, [`Error::Codec`] if a stream fails to decompress, and
/// [`Error::CorruptPatch`] if the control stream is malformed.
pub fn deserialize(patch: &[u8]) -> Result<(PatchHeader, PatchStreams)> {
    let header = PatchHeader::parse(patch)?;
    let codec = codec_for_magic(header.magic())?;

    // `PatchHeader::parse()` guarantees both lengths fit inside `patch`
    let body = &patch[HEADER_LEN..];
    let (control, rest) = body.split_at(header.control_len() as usize);
    let (diff, extra) = rest.split_at(header.diff_len() as usize);

    for (name, segment) in [("control", control), ("diff", diff), ("extra", extra)] {
        if !codec.is_single_frame(segment) {
            return Err(Error::format(format!(
                "{name} stream length {} does not match its compressed frame",
                segment.len(),
            )));
        }
    }

    let streams = PatchStreams {
        controls: control::decode(&codec.decompress(control)?)?,
        diff: codec.decompress(diff)?,
        extra: codec.decompress(extra)?,
    };

    if streams.target_len() != header.target_len() {
        return Err(Error::format(format!(
            "header declares a {} byte target but the controls describe {} bytes",
            header.target_len(),
            streams.target_len(),
        )));
    }

    Ok((header, streams))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorKind, codec::ZstdCodec, control::ControlTriple};

    fn sample() -> (PatchStreams, Vec<u8>) {
        let streams = PatchStreams {
            controls: vec![
                ControlTriple {
                    copy_len: 3,
                    extra_len: 3,
                    seek: -3,
                },
                ControlTriple {
                    copy_len: 3,
                    extra_len: 0,
                    seek: 0,
                },
            ],
            diff: vec![0; 6],
            extra: b"XYZ".to_vec(),
        };
        let mut patch = Vec::new();
        serialize(&streams, 9, &ZstdCodec::new(19, 0), &mut patch).unwrap();

        (streams, patch)
    }

    #[test]
    fn header_lengths_match_segments() {
        let (streams, patch) = sample();
        let header = PatchHeader::parse(&patch).unwrap();
        let codec = ZstdCodec::new(19, 0);

        let control_end = HEADER_LEN + header.control_len() as usize;
        let diff_end = control_end + header.diff_len() as usize;
        assert_eq!(
            codec.decompress(&patch[HEADER_LEN..control_end]).unwrap(),
            control::encode(&streams.controls),
        );
        assert_eq!(
            codec.decompress(&patch[control_end..diff_end]).unwrap(),
            streams.diff,
        );
        assert_eq!(codec.decompress(&patch[diff_end..]).unwrap(), streams.extra);
    }

    #[test]
    fn deserialize_inverts_serialize() {
        let (streams, patch) = sample();
        let (header, decoded) = deserialize(&patch).unwrap();

        assert_eq!(header.magic(), *b"ZSDIFF40");
        assert_eq!(header.target_len(), 9);
        assert_eq!(decoded, streams);
    }

    #[test]
    fn corrupt_magic() {
        let (_, mut patch) = sample();
        patch[0] ^= 0xff;

        assert_eq!(deserialize(&patch).unwrap_err().kind(), ErrorKind::Format);
    }

    #[test]
    fn truncated_body() {
        let (_, patch) = sample();
        let header = PatchHeader::parse(&patch).unwrap();
        let cut = HEADER_LEN + (header.control_len() + header.diff_len()) as usize - 1;

        assert_eq!(deserialize(&patch[..cut]).unwrap_err().kind(), ErrorKind::Format);
    }

    #[test]
    fn every_header_byte_is_checked() {
        let (_, patch) = sample();

        for i in 0..HEADER_LEN {
            for flip in [0x01, 0x80, 0xff] {
                let mut corrupted = patch.clone();
                corrupted[i] ^= flip;

                let err = deserialize(&corrupted).unwrap_err();
                assert_eq!(err.kind(), ErrorKind::Format, "byte {i} flipped by {flip:#x}: {err}");
            }
        }
    }

    #[cfg(feature = "bzip2")]
    #[test]
    fn every_bzip2_header_byte_is_checked() {
        let (streams, _) = sample();
        let mut patch = Vec::new();
        serialize(&streams, 9, &crate::codec::Bzip2Codec::new(9), &mut patch).unwrap();
        assert_eq!(deserialize(&patch).unwrap().1, streams);

        for i in 0..HEADER_LEN {
            for flip in [0x01, 0x40, 0x80, 0xff] {
                let mut corrupted = patch.clone();
                corrupted[i] ^= flip;

                let err = deserialize(&corrupted).unwrap_err();
                assert_eq!(err.kind(), ErrorKind::Format, "byte {i} flipped by {flip:#x}: {err}");
            }
        }
    }

    #[cfg(feature = "bzip2")]
    #[test]
    fn zstd_body_under_bzip2_tag() {
        let (_, mut patch) = sample();
        // ZSDIFF40 and BSDIFF40 differ only in their first byte
        patch[0] = b'B';

        assert_eq!(deserialize(&patch).unwrap_err().kind(), ErrorKind::Format);
    }

    #[test]
    fn corrupt_stream_data() {
        let (_, mut patch) = sample();
        // Clobber the zstd frame magic of the control stream
        patch[HEADER_LEN] ^= 0xff;

        assert_eq!(deserialize(&patch).unwrap_err().kind(), ErrorKind::Codec);
    }
}
