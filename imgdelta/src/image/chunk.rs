// Copyright 2024 Logan Magee
//
// SPDX-License-Identifier: LicenseRef-Proprietary

use std::{io::Write, ops::Range};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use integer_encoding::{VarIntReader, VarIntWriter};

use super::deflate::DeflateParams;
use crate::error::{Error, Result};

/// Format tag of image patches
pub const IMAGE_MAGIC: [u8; 8] = *b"IMGDELT1";

const HASH_LEN: usize = blake3::OUT_LEN;
const FIXED_LEN: usize = IMAGE_MAGIC.len() + 8 + 8 + HASH_LEN + HASH_LEN;

/// How a chunk of the target image is reconstructed
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum ChunkKind {
    /// The sub-patch is the literal target bytes
    Raw,
    /// The sub-patch is a plain patch against a source range
    Normal,
    /// The sub-patch is a plain patch between inflated source and target deflate streams, and the
    /// result is deflated again
    Deflate,
}

impl ChunkKind {
    fn tag(self) -> u8 {
        match self {
            ChunkKind::Raw => 0,
            ChunkKind::Normal => 1,
            ChunkKind::Deflate => 2,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(ChunkKind::Raw),
            1 => Ok(ChunkKind::Normal),
            2 => Ok(ChunkKind::Deflate),
            _ => Err(Error::format(format!("unknown chunk kind {tag}"))),
        }
    }
}

/// A directory entry of an image patch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Chunk {
    kind: ChunkKind,
    target: Range<u64>,
    source: Range<u64>,
    patch_len: u64,
    deflate: Option<DeflateParams>,
}

impl Chunk {
    pub(crate) fn raw(target: Range<u64>) -> Self {
        let patch_len = target.end - target.start;

        Self {
            kind: ChunkKind::Raw,
            target,
            source: 0..0,
            patch_len,
            deflate: None,
        }
    }

    pub(crate) fn normal(target: Range<u64>, source: Range<u64>, patch_len: u64) -> Self {
        Self {
            kind: ChunkKind::Normal,
            target,
            source,
            patch_len,
            deflate: None,
        }
    }

    pub(crate) fn deflate(
        target: Range<u64>,
        source: Range<u64>,
        patch_len: u64,
        params: DeflateParams,
    ) -> Self {
        Self {
            kind: ChunkKind::Deflate,
            target,
            source,
            patch_len,
            deflate: Some(params),
        }
    }

    /// How this chunk is reconstructed
    pub fn kind(&self) -> ChunkKind {
        self.kind
    }

    /// The bytes of the target image this chunk reconstructs
    pub fn target(&self) -> Range<u64> {
        self.target.clone()
    }

    /// The bytes of the source image this chunk is reconstructed from
    ///
    /// Empty for [`ChunkKind::Raw`].
    pub fn source(&self) -> Range<u64> {
        self.source.clone()
    }

    /// The length of this chunk's sub-patch
    pub fn patch_len(&self) -> u64 {
        self.patch_len
    }

    /// The settings that recompress a [`ChunkKind::Deflate`] chunk
    pub fn deflate_params(&self) -> Option<DeflateParams> {
        self.deflate
    }

    fn write_to(&self, out: &mut Vec<u8>) -> std::io::Result<()> {
        out.write_u8(self.kind.tag())?;
        out.write_varint(self.target.start)?;
        out.write_varint(self.target.end - self.target.start)?;
        out.write_varint(self.source.start)?;
        out.write_varint(self.source.end - self.source.start)?;
        out.write_varint(self.patch_len)?;
        if let Some(params) = self.deflate {
            out.write_all(&params.to_bytes())?;
        }

        Ok(())
    }

    fn read_from(reader: &mut &[u8]) -> Result<Self> {
        let truncated = |_| Error::format("image patch directory is truncated");

        let kind = ChunkKind::from_tag(reader.read_u8().map_err(truncated)?)?;
        let mut range = |what: &str| -> Result<Range<u64>> {
            let start: u64 = reader.read_varint().map_err(truncated)?;
            let len: u64 = reader.read_varint().map_err(truncated)?;
            let end = start
                .checked_add(len)
                .ok_or_else(|| Error::format(format!("{what} range overflows")))?;

            Ok(start..end)
        };
        let target = range("target")?;
        let source = range("source")?;
        let patch_len = reader.read_varint().map_err(truncated)?;

        let deflate = if kind == ChunkKind::Deflate {
            let mut params = [0; 4];
            std::io::Read::read_exact(reader, &mut params).map_err(truncated)?;
            Some(DeflateParams::from_bytes(params)?)
        } else {
            None
        };

        Ok(Self {
            kind,
            target,
            source,
            patch_len,
            deflate,
        })
    }
}

/// A parsed image patch.
///
/// An image patch reconstructs a target image chunk by chunk. Its layout is:
///
/// | Size     | Contents                                  |
/// |----------|-------------------------------------------|
/// | 8        | Format tag `IMGDELT1`                     |
/// | 8        | Source length (`u64` LE)                  |
/// | 8        | Target length (`u64` LE)                  |
/// | 32       | BLAKE3 hash of the source                 |
/// | 32       | BLAKE3 hash of the target                 |
/// | varint   | Chunk count                               |
/// | variable | One directory entry per chunk             |
/// | variable | The sub-patches, in directory order       |
///
/// A directory entry is a kind byte (0 raw, 1 normal, 2 deflate), then varints for the target
/// offset, target length, source offset, source length and sub-patch length, then for deflate
/// chunks the level, window bits, memory level and strategy as one byte each.
#[derive(Clone, Debug)]
pub struct ImagePatch<'a> {
    source_len: u64,
    target_len: u64,
    source_hash: [u8; HASH_LEN],
    target_hash: [u8; HASH_LEN],
    chunks: Vec<Chunk>,
    body: &'a [u8],
}

impl<'a> ImagePatch<'a> {
    /// Parses and validates the directory of `patch`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] if `patch` is not an image patch, if the chunks do not tile the
    /// target in order, or if a chunk's ranges or sub-patch lie outside their bounds.
    pub fn parse(patch: &'a [u8]) -> Result<Self> {
        if patch.len() < FIXED_LEN {
            return Err(Error::format(format!(
                "image patch is {} bytes, shorter than its {FIXED_LEN} byte header",
                patch.len(),
            )));
        }
        if patch[..IMAGE_MAGIC.len()] != IMAGE_MAGIC {
            return Err(Error::format("missing image patch format tag"));
        }

        let mut reader = &patch[IMAGE_MAGIC.len()..];
        let truncated = |_| Error::format("image patch header is truncated");
        let source_len = reader.read_u64::<LittleEndian>().map_err(truncated)?;
        let target_len = reader.read_u64::<LittleEndian>().map_err(truncated)?;
        let mut source_hash = [0; HASH_LEN];
        let mut target_hash = [0; HASH_LEN];
        std::io::Read::read_exact(&mut reader, &mut source_hash).map_err(truncated)?;
        std::io::Read::read_exact(&mut reader, &mut target_hash).map_err(truncated)?;

        let count: u64 = reader
            .read_varint()
            .map_err(|_| Error::format("image patch chunk count is truncated"))?;

        let mut chunks = Vec::new();
        let mut target_pos = 0;
        let mut body_len = 0u64;
        for i in 0..count {
            let chunk = Chunk::read_from(&mut reader)?;

            if chunk.target.start != target_pos || chunk.target.is_empty() {
                return Err(Error::format(format!(
                    "chunk {i} covers target bytes {:?}, expected a non-empty range from \
                     {target_pos}",
                    chunk.target,
                )));
            }
            if chunk.source.end > source_len {
                return Err(Error::format(format!(
                    "chunk {i} reads source bytes {:?} of a {source_len} byte source",
                    chunk.source,
                )));
            }
            if chunk.kind == ChunkKind::Raw && chunk.patch_len != chunk.target.end - target_pos {
                return Err(Error::format(format!(
                    "raw chunk {i} stores {} bytes for a {} byte range",
                    chunk.patch_len,
                    chunk.target.end - target_pos,
                )));
            }

            target_pos = chunk.target.end;
            body_len = body_len
                .checked_add(chunk.patch_len)
                .ok_or_else(|| Error::format("sub-patch lengths overflow"))?;
            chunks.push(chunk);
        }

        if target_pos != target_len {
            return Err(Error::format(format!(
                "chunks cover {target_pos} bytes of a {target_len} byte target",
            )));
        }
        if body_len != reader.len() as u64 {
            return Err(Error::format(format!(
                "directory describes {body_len} bytes of sub-patches but {} follow",
                reader.len(),
            )));
        }

        Ok(Self {
            source_len,
            target_len,
            source_hash,
            target_hash,
            chunks,
            body: reader,
        })
    }

    /// The length of the source image
    pub fn source_len(&self) -> u64 {
        self.source_len
    }

    /// The length of the target image
    pub fn target_len(&self) -> u64 {
        self.target_len
    }

    /// The BLAKE3 hash of the source image
    pub fn source_hash(&self) -> &[u8; HASH_LEN] {
        &self.source_hash
    }

    /// The BLAKE3 hash of the target image
    pub fn target_hash(&self) -> &[u8; HASH_LEN] {
        &self.target_hash
    }

    /// The directory, in target order
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Iterates over each chunk along with its sub-patch.
    pub fn sub_patches(&self) -> impl Iterator<Item = (&Chunk, &'a [u8])> {
        let body = self.body;

        self.chunks.iter().scan(0usize, move |offset, chunk| {
            // `parse()` checked that the lengths sum to the body length
            let start = *offset;
            *offset += chunk.patch_len as usize;

            Some((chunk, &body[start..*offset]))
        })
    }
}

/// Writes an image patch with the given directory and sub-patches.
pub(crate) fn write<W>(
    source: &[u8],
    target: &[u8],
    chunks: &[(Chunk, Vec<u8>)],
    patch: &mut W,
) -> Result<()>
where
    W: Write + ?Sized,
{
    let mut head = Vec::with_capacity(FIXED_LEN + chunks.len() * 16);
    head.extend_from_slice(&IMAGE_MAGIC);
    head.write_u64::<LittleEndian>(source.len() as u64)?;
    head.write_u64::<LittleEndian>(target.len() as u64)?;
    head.extend_from_slice(blake3::hash(source).as_bytes());
    head.extend_from_slice(blake3::hash(target).as_bytes());
    head.write_varint(chunks.len() as u64)?;
    for (chunk, _) in chunks {
        chunk.write_to(&mut head)?;
    }

    patch.write_all(&head)?;
    for (_, sub_patch) in chunks {
        patch.write_all(sub_patch)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn sample() -> Vec<u8> {
        let source = b"source image";
        let target = b"raw!normal";
        let chunks = vec![
            (Chunk::raw(0..4), b"raw!".to_vec()),
            (Chunk::normal(4..10, 0..12, 3), b"sub".to_vec()),
        ];

        let mut patch = Vec::new();
        write(source, target, &chunks, &mut patch).unwrap();
        patch
    }

    #[test]
    fn parse_reads_directory() {
        let patch = sample();
        let image = ImagePatch::parse(&patch).unwrap();

        assert_eq!(image.source_len(), 12);
        assert_eq!(image.target_len(), 10);
        assert_eq!(image.source_hash(), blake3::hash(b"source image").as_bytes());
        assert_eq!(image.chunks().len(), 2);
        assert_eq!(image.chunks()[1].kind(), ChunkKind::Normal);
        assert_eq!(image.chunks()[1].source(), 0..12);

        let subs: Vec<_> = image.sub_patches().map(|(_, sub)| sub).collect();
        assert_eq!(subs, [&b"raw!"[..], &b"sub"[..]]);
    }

    #[test]
    fn deflate_params_survive() {
        let params = DeflateParams::with_level(9);
        let chunks = vec![(Chunk::deflate(0..3, 2..5, 1, params), vec![0])];
        let mut patch = Vec::new();
        write(b"xxxxx", b"abc", &chunks, &mut patch).unwrap();

        let image = ImagePatch::parse(&patch).unwrap();
        assert_eq!(image.chunks()[0].deflate_params(), Some(params));
    }

    #[test]
    fn wrong_magic() {
        let mut patch = sample();
        patch[7] = b'2';

        assert_eq!(ImagePatch::parse(&patch).unwrap_err().kind(), ErrorKind::Format);
    }

    #[test]
    fn truncated_body() {
        let patch = sample();

        let err = ImagePatch::parse(&patch[..patch.len() - 1]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn gap_between_chunks() {
        let chunks = vec![
            (Chunk::raw(0..4), b"raw!".to_vec()),
            (Chunk::raw(5..10), b"gap!!".to_vec()),
        ];
        let mut patch = Vec::new();
        write(b"", b"raw!?gap!!", &chunks, &mut patch).unwrap();

        let err = ImagePatch::parse(&patch).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn source_range_out_of_bounds() {
        let chunks = vec![(Chunk::normal(0..3, 0..100, 1), vec![0])];
        let mut patch = Vec::new();
        write(b"short", b"abc", &chunks, &mut patch).unwrap();

        let err = ImagePatch::parse(&patch).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn empty_target_has_no_chunks() {
        let mut patch = Vec::new();
        write(b"anything", b"", &[], &mut patch).unwrap();

        let image = ImagePatch::parse(&patch).unwrap();
        assert!(image.chunks().is_empty());
        assert_eq!(image.target_len(), 0);
    }
}
