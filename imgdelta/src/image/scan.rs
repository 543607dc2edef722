// Copyright 2024 Logan Magee
//
// SPDX-License-Identifier: LicenseRef-Proprietary

//! Locating deflate streams inside gzip members and zip local file entries.

use std::ops::Range;

use byteorder::{ByteOrder, LittleEndian};
use flate2::Crc;

use super::deflate;

const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];
const GZIP_FIXED_HEADER_LEN: usize = 10;
const GZIP_TRAILER_LEN: usize = 8;
const FHCRC: u8 = 1 << 1;
const FEXTRA: u8 = 1 << 2;
const FNAME: u8 = 1 << 3;
const FCOMMENT: u8 = 1 << 4;
const GZIP_RESERVED_FLAGS: u8 = 0xe0;

const ZIP_LOCAL_MAGIC: [u8; 4] = *b"PK\x03\x04";
const ZIP_LOCAL_HEADER_LEN: usize = 30;
const ZIP_METHOD_DEFLATE: u16 = 8;
const ZIP_FLAG_ENCRYPTED: u16 = 1 << 0;
const ZIP_FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;

/// What a deflate stream is paired by between the source and target images
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub(crate) enum EntryKey {
    /// The `n`th gzip member of the image
    Gzip(usize),
    /// A zip entry's file name
    Zip(Vec<u8>),
}

/// A deflate stream found inside an image
#[derive(Debug)]
pub(crate) struct DeflateEntry {
    pub(crate) key: EntryKey,
    /// The compressed bytes within the image
    pub(crate) range: Range<usize>,
    pub(crate) decompressed: Vec<u8>,
}

/// Finds every gzip member and deflated zip entry in `image`, in order of appearance.
///
/// An entry is only reported if its deflate stream inflates cleanly and its checksum and length
/// fields agree with the inflated data, so stray magic bytes inside other data are skipped.
pub(crate) fn scan(image: &[u8]) -> Vec<DeflateEntry> {
    let mut entries = Vec::new();
    let mut gzip_members = 0;
    let mut pos = 0;

    while pos < image.len() {
        let rest = &image[pos..];
        let found = if rest.starts_with(&GZIP_MAGIC) {
            gzip_member(image, pos, gzip_members)
        } else if rest.starts_with(&ZIP_LOCAL_MAGIC) {
            zip_entry(image, pos)
        } else {
            None
        };

        match found {
            Some(entry) => {
                if matches!(entry.key, EntryKey::Gzip(_)) {
                    gzip_members += 1;
                }
                pos = entry.range.end;
                entries.push(entry);
            }
            None => pos += 1,
        }
    }

    entries
}

/// Parses the gzip member starting at `image[start..]`.
fn gzip_member(image: &[u8], start: usize, ordinal: usize) -> Option<DeflateEntry> {
    let header = image.get(start..start + GZIP_FIXED_HEADER_LEN)?;
    let flags = header[3];
    if flags & GZIP_RESERVED_FLAGS != 0 {
        return None;
    }

    let mut pos = start + GZIP_FIXED_HEADER_LEN;
    if flags & FEXTRA != 0 {
        let xlen = LittleEndian::read_u16(image.get(pos..pos + 2)?);
        pos += 2 + usize::from(xlen);
    }
    if flags & FNAME != 0 {
        pos = skip_zero_terminated(image, pos)?;
    }
    if flags & FCOMMENT != 0 {
        pos = skip_zero_terminated(image, pos)?;
    }
    if flags & FHCRC != 0 {
        pos += 2;
    }

    let (decompressed, len) = deflate::inflate(image.get(pos..)?)?;
    let range = pos..pos + len;

    let trailer = image.get(range.end..range.end + GZIP_TRAILER_LEN)?;
    if LittleEndian::read_u32(&trailer[..4]) != crc32(&decompressed)
        || LittleEndian::read_u32(&trailer[4..]) != decompressed.len() as u32
    {
        return None;
    }

    Some(DeflateEntry {
        key: EntryKey::Gzip(ordinal),
        range,
        decompressed,
    })
}

/// Parses the zip local file entry starting at `image[start..]`.
fn zip_entry(image: &[u8], start: usize) -> Option<DeflateEntry> {
    let header = image.get(start..start + ZIP_LOCAL_HEADER_LEN)?;
    let flags = LittleEndian::read_u16(&header[6..8]);
    let method = LittleEndian::read_u16(&header[8..10]);
    if method != ZIP_METHOD_DEFLATE || flags & ZIP_FLAG_ENCRYPTED != 0 {
        return None;
    }

    let crc = LittleEndian::read_u32(&header[14..18]);
    let compressed_len = LittleEndian::read_u32(&header[18..22]);
    let uncompressed_len = LittleEndian::read_u32(&header[22..26]);
    let name_len = usize::from(LittleEndian::read_u16(&header[26..28]));
    let extra_len = usize::from(LittleEndian::read_u16(&header[28..30]));

    let name_start = start + ZIP_LOCAL_HEADER_LEN;
    let name = image.get(name_start..name_start + name_len)?.to_vec();
    let pos = name_start + name_len + extra_len;

    let (decompressed, len) = deflate::inflate(image.get(pos..)?)?;

    // With a data descriptor the sizes and checksum follow the data instead
    if flags & ZIP_FLAG_DATA_DESCRIPTOR == 0
        && (compressed_len as usize != len
            || uncompressed_len as usize != decompressed.len()
            || crc != crc32(&decompressed))
    {
        return None;
    }

    Some(DeflateEntry {
        key: EntryKey::Zip(name),
        range: pos..pos + len,
        decompressed,
    })
}

fn skip_zero_terminated(image: &[u8], pos: usize) -> Option<usize> {
    let len = image.get(pos..)?.iter().position(|&b| b == 0)?;

    Some(pos + len + 1)
}

fn crc32(data: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(data);

    crc.sum()
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Write;

    use flate2::{
        Compression, GzBuilder,
        write::{DeflateEncoder, GzEncoder},
    };

    use super::*;

    pub(crate) fn gzip(data: &[u8], level: u32) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    /// A single zip local file entry without the central directory
    pub(crate) fn zip_local_entry(name: &[u8], data: &[u8], level: u32) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(level));
        encoder.write_all(data).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut entry = Vec::new();
        entry.extend_from_slice(&ZIP_LOCAL_MAGIC);
        entry.extend_from_slice(&20u16.to_le_bytes());
        entry.extend_from_slice(&0u16.to_le_bytes());
        entry.extend_from_slice(&ZIP_METHOD_DEFLATE.to_le_bytes());
        entry.extend_from_slice(&[0; 4]);
        entry.extend_from_slice(&crc32(data).to_le_bytes());
        entry.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        entry.extend_from_slice(&(data.len() as u32).to_le_bytes());
        entry.extend_from_slice(&(name.len() as u16).to_le_bytes());
        entry.extend_from_slice(&0u16.to_le_bytes());
        entry.extend_from_slice(name);
        entry.extend_from_slice(&compressed);

        entry
    }

    #[test]
    fn finds_gzip_members_in_order() {
        let mut image = b"boot header".to_vec();
        let first_start = image.len() + GZIP_FIXED_HEADER_LEN;
        image.extend(gzip(b"first member first member", 6));
        image.extend_from_slice(b"padding");
        image.extend(gzip(b"second member", 9));

        let entries = scan(&image);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, EntryKey::Gzip(0));
        assert_eq!(entries[0].range.start, first_start);
        assert_eq!(entries[0].decompressed, b"first member first member");
        assert_eq!(entries[1].key, EntryKey::Gzip(1));
        assert_eq!(entries[1].decompressed, b"second member");
    }

    #[test]
    fn honours_gzip_header_fields() {
        let mut encoder = GzBuilder::new()
            .filename("vmlinux")
            .comment("kernel")
            .extra(vec![1, 2, 3])
            .write(Vec::new(), Compression::default());
        encoder.write_all(b"kernel image").unwrap();
        let image = encoder.finish().unwrap();

        let entries = scan(&image);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].decompressed, b"kernel image");
        assert_eq!(entries[0].range.end, image.len() - GZIP_TRAILER_LEN);
    }

    #[test]
    fn finds_zip_entries_by_name() {
        let mut image = zip_local_entry(b"classes.dex", b"dex dex dex dex", 6);
        image.extend(zip_local_entry(b"res/layout.xml", b"<layout/>", 9));

        let entries = scan(&image);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, EntryKey::Zip(b"classes.dex".to_vec()));
        assert_eq!(entries[1].key, EntryKey::Zip(b"res/layout.xml".to_vec()));
        assert_eq!(entries[1].decompressed, b"<layout/>");
        assert_eq!(entries[1].range.end, image.len());
    }

    #[test]
    fn ignores_stray_magic() {
        let mut image = vec![0x1f, 0x8b, 0x08, 0x00, 0xff, 0xff];
        image.extend_from_slice(b"PK\x03\x04 not really a zip");

        assert!(scan(&image).is_empty());
    }

    #[test]
    fn rejects_bad_gzip_trailer() {
        let mut image = gzip(b"checksummed", 6);
        let len = image.len();
        image[len - 5] ^= 0xff;

        assert!(scan(&image).is_empty());
    }

    #[test]
    fn skips_stored_zip_entries() {
        let mut image = zip_local_entry(b"a", b"aaaa", 6);
        // Method 0 (stored)
        image[8] = 0;

        assert!(scan(&image).is_empty());
    }
}
