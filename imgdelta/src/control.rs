// Copyright 2024 Logan Magee
//
// SPDX-License-Identifier: LicenseRef-Proprietary

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

/// The encoded size of a [`ControlTriple`] in bytes
pub const CONTROL_TRIPLE_LEN: usize = 24;

const SIGN_BIT: u64 = 1 << 63;

/// One step of patch reconstruction.
///
/// `copy_len` bytes are reconstructed by adding diff bytes to the source at the current source
/// cursor, then `extra_len` literal bytes are taken from the extra stream, then the source cursor
/// moves `copy_len + seek` bytes.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct ControlTriple {
    /// The number of bytes reconstructed from the source plus diff bytes
    pub copy_len: u64,
    /// The number of literal bytes taken from the extra stream
    pub extra_len: u64,
    /// The signed distance from the end of the copied source region to the next one
    pub seek: i64,
}

/// The three logical streams that describe a target in terms of a source.
///
/// Replaying every control in order, taking `copy_len` bytes from the source plus `diff` and then
/// `extra_len` bytes from `extra`, reproduces the target exactly.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PatchStreams {
    /// The control triples, in order
    pub controls: Vec<ControlTriple>,
    /// Byte-wise differences between target and source within copy regions
    pub diff: Vec<u8>,
    /// Literal target bytes outside copy regions
    pub extra: Vec<u8>,
}

impl PatchStreams {
    /// The length of the target these streams reconstruct
    pub fn target_len(&self) -> u64 {
        self.controls
            .iter()
            .fold(0u64, |len, control| {
                len.saturating_add(control.copy_len)
                    .saturating_add(control.extra_len)
            })
    }
}

/// Serializes `controls` into a control stream.
///
/// Each triple is written as three 64-bit little-endian sign-magnitude integers.
pub(crate) fn encode(controls: &[ControlTriple]) -> Vec<u8> {
    let mut out = vec![0; controls.len() * CONTROL_TRIPLE_LEN];

    for (control, buf) in controls
        .iter()
        .zip(out.chunks_exact_mut(CONTROL_TRIPLE_LEN))
    {
        offtout(control.copy_len as i64, &mut buf[..8]);
        offtout(control.extra_len as i64, &mut buf[8..16]);
        offtout(control.seek, &mut buf[16..]);
    }

    out
}

/// Parses a control stream produced by [`encode()`].
pub(crate) fn decode(stream: &[u8]) -> Result<Vec<ControlTriple>> {
    if stream.len() % CONTROL_TRIPLE_LEN != 0 {
        return Err(Error::corrupt(format!(
            "control stream length {} is not a multiple of {CONTROL_TRIPLE_LEN}",
            stream.len(),
        )));
    }

    stream
        .chunks_exact(CONTROL_TRIPLE_LEN)
        .enumerate()
        .map(|(i, buf)| {
            let len = |value: i64, what: &str| {
                u64::try_from(value).map_err(|_| {
                    Error::corrupt(format!("control {i} has negative {what} length {value}"))
                })
            };

            Ok(ControlTriple {
                copy_len: len(offtin(&buf[..8]), "copy")?,
                extra_len: len(offtin(&buf[8..16]), "extra")?,
                seek: offtin(&buf[16..]),
            })
        })
        .collect()
}

/// Writes `x` in sign-magnitude form: bit 63 holds the sign, the low 63 bits the magnitude.
fn offtout(x: i64, buf: &mut [u8]) {
    let encoded = if x < 0 {
        x.unsigned_abs() | SIGN_BIT
    } else {
        x as u64
    };

    LittleEndian::write_u64(buf, encoded);
}

fn offtin(buf: &[u8]) -> i64 {
    let encoded = LittleEndian::read_u64(buf);
    let magnitude = (encoded & !SIGN_BIT) as i64;

    if encoded & SIGN_BIT == 0 {
        magnitude
    } else {
        -magnitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_seek_sets_sign_bit() {
        let stream = encode(&[ControlTriple {
            copy_len: 1,
            extra_len: 2,
            seek: -3,
        }]);

        assert_eq!(stream.len(), CONTROL_TRIPLE_LEN);
        assert_eq!(&stream[..8], &1u64.to_le_bytes());
        assert_eq!(&stream[8..16], &2u64.to_le_bytes());
        assert_eq!(&stream[16..], &(3u64 | SIGN_BIT).to_le_bytes());
    }

    #[test]
    fn decode_matches_encode() {
        let controls = [
            ControlTriple {
                copy_len: 100,
                extra_len: 0,
                seek: 0,
            },
            ControlTriple {
                copy_len: 0,
                extra_len: 7,
                seek: -(1 << 40),
            },
            ControlTriple {
                copy_len: 5,
                extra_len: 5,
                seek: 12345,
            },
        ];

        assert_eq!(decode(&encode(&controls)).unwrap(), controls);
    }

    #[test]
    fn negative_zero_is_zero() {
        let mut stream = vec![0; CONTROL_TRIPLE_LEN];
        stream[16..].copy_from_slice(&SIGN_BIT.to_le_bytes());

        assert_eq!(decode(&stream).unwrap()[0].seek, 0);
    }

    #[test]
    fn ragged_stream() {
        let err = decode(&[0; CONTROL_TRIPLE_LEN + 1]).unwrap_err();

        assert!(matches!(err, Error::CorruptPatch(_)));
    }

    #[test]
    fn negative_copy_len() {
        let mut stream = vec![0; CONTROL_TRIPLE_LEN];
        stream[..8].copy_from_slice(&(4u64 | SIGN_BIT).to_le_bytes());

        assert!(matches!(decode(&stream), Err(Error::CorruptPatch(_))));
    }
}
