//! Structural fingerprints for audio/video containers.
//!
//! Platforms rewrite container metadata (titles, encoder tags, creation
//! times) without touching the media essence. Hashing raw bytes would make
//! such a file look like new content, so the fingerprint is built from the
//! container structure instead:
//!
//! - ISO base media files (mp4, m4v, mov, m4a): box types and payloads,
//!   skipping metadata boxes, with header timestamps zeroed and chunk
//!   offset tables reduced to their entry count.
//! - MPEG audio (mp3): the frame data between any ID3v2 and ID3v1 tags.
//!
//! The result is a SHA-256 rendered as 64 lowercase hex digits.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

const CHUNK_SIZE: usize = 64 * 1024;

/// Boxes whose payload is a sequence of child boxes.
const CONTAINER_BOXES: &[&[u8; 4]] = &[
    b"moov", b"trak", b"mdia", b"minf", b"stbl", b"dinf", b"edts", b"mvex", b"moof", b"traf",
];

/// Boxes a platform may rewrite without changing the media.
const METADATA_BOXES: &[&[u8; 4]] = &[b"udta", b"meta", b"free", b"skip", b"wide", b"uuid", b"pdin"];

/// Full boxes that start with creation/modification times.
const TIMESTAMPED_BOXES: &[&[u8; 4]] = &[b"mvhd", b"tkhd", b"mdhd"];

/// Absolute file offsets; they move whenever anything before `mdat` resizes.
const OFFSET_TABLES: &[&[u8; 4]] = &[b"stco", b"co64"];

/// Compute the structural fingerprint of an audio/video file.
pub fn structural_hash(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();

    let mut head = [0u8; 12];
    let n = read_up_to(&mut file, &mut head)?;
    file.seek(SeekFrom::Start(0))?;

    if n >= 8 && &head[4..8] == b"ftyp" {
        iso_bmff_hash(path, file, len)
    } else if (n >= 3 && &head[..3] == b"ID3") || (n >= 2 && is_frame_sync(&head[..2])) {
        mpeg_audio_hash(path, file, len)
    } else {
        Err(Error::format(path, "unrecognized media container"))
    }
}

#[derive(Debug, Clone, Copy)]
struct BoxHeader {
    kind: [u8; 4],
    header_len: u64,
    payload_len: u64,
}

impl BoxHeader {
    fn total_len(&self) -> u64 {
        self.header_len + self.payload_len
    }
}

/// Build a header from the 32-bit size field, checking it fits in `remaining`.
fn box_header(
    kind: [u8; 4],
    size32: u32,
    large_size: Option<u64>,
    remaining: u64,
) -> std::result::Result<BoxHeader, String> {
    let header_len = if large_size.is_some() { 16 } else { 8 };
    let size = match (size32, large_size) {
        (1, Some(large)) => large,
        (0, _) => remaining,
        (size, _) => u64::from(size),
    };
    if size < header_len || size > remaining {
        return Err(format!(
            "box '{}' declares {} bytes with {} available",
            fourcc(&kind),
            size,
            remaining
        ));
    }
    Ok(BoxHeader {
        kind,
        header_len,
        payload_len: size - header_len,
    })
}

fn read_box_header<R: Read>(reader: &mut R, remaining: u64) -> std::result::Result<BoxHeader, String> {
    let mut raw = [0u8; 8];
    reader
        .read_exact(&mut raw)
        .map_err(|_| "truncated box header".to_string())?;
    let size32 = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
    let kind = [raw[4], raw[5], raw[6], raw[7]];

    let large_size = if size32 == 1 {
        let mut large = [0u8; 8];
        reader
            .read_exact(&mut large)
            .map_err(|_| "truncated 64-bit box size".to_string())?;
        Some(u64::from_be_bytes(large))
    } else {
        None
    };

    box_header(kind, size32, large_size, remaining)
}

fn slice_box_header(bytes: &[u8]) -> std::result::Result<BoxHeader, String> {
    if bytes.len() < 8 {
        return Err("truncated child box header".to_string());
    }
    let size32 = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let kind = [bytes[4], bytes[5], bytes[6], bytes[7]];
    let large_size = if size32 == 1 {
        let raw = bytes
            .get(8..16)
            .ok_or_else(|| "truncated 64-bit child box size".to_string())?;
        let mut large = [0u8; 8];
        large.copy_from_slice(raw);
        Some(u64::from_be_bytes(large))
    } else {
        None
    };
    box_header(kind, size32, large_size, bytes.len() as u64)
}

fn iso_bmff_hash(path: &Path, file: File, len: u64) -> Result<String> {
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut pos = 0u64;
    let mut saw_movie = false;
    let mut saw_media_data = false;

    while pos < len {
        let header = read_box_header(&mut reader, len - pos).map_err(|m| Error::format(path, m))?;
        let kind = &header.kind;

        if METADATA_BOXES.contains(&kind) {
            reader.seek_relative(header.payload_len as i64)?;
        } else if CONTAINER_BOXES.contains(&kind) {
            saw_movie |= kind == b"moov" || kind == b"moof";
            let payload = read_payload(&mut reader, header.payload_len)?;
            hash_box(path, kind, &payload, &mut hasher)?;
        } else {
            saw_media_data |= kind == b"mdat";
            hasher.update(kind);
            hasher.update(header.payload_len.to_be_bytes());
            copy_into(&mut reader, header.payload_len, &mut hasher)?;
        }

        pos += header.total_len();
    }

    if !saw_movie {
        return Err(Error::format(path, "no movie box (moov/moof)"));
    }
    if !saw_media_data {
        return Err(Error::format(path, "no media data box (mdat)"));
    }

    Ok(format!("{:x}", hasher.finalize()))
}

fn hash_box(path: &Path, kind: &[u8; 4], payload: &[u8], hasher: &mut Sha256) -> Result<()> {
    hasher.update(kind);

    if CONTAINER_BOXES.contains(&kind) {
        let mut offset = 0usize;
        while offset < payload.len() {
            let child = slice_box_header(&payload[offset..])
                .map_err(|m| Error::format(path, format!("inside '{}': {}", fourcc(kind), m)))?;
            let start = offset + child.header_len as usize;
            let end = offset + child.total_len() as usize;
            if !METADATA_BOXES.contains(&&child.kind) {
                hash_box(path, &child.kind, &payload[start..end], hasher)?;
            }
            offset = end;
        }
    } else if TIMESTAMPED_BOXES.contains(&kind) {
        let mut owned = payload.to_vec();
        zero_timestamps(&mut owned);
        hasher.update((owned.len() as u64).to_be_bytes());
        hasher.update(&owned);
    } else if OFFSET_TABLES.contains(&kind) {
        // version/flags, then the entry count
        let count = payload
            .get(4..8)
            .ok_or_else(|| Error::format(path, format!("truncated '{}'", fourcc(kind))))?;
        hasher.update(count);
    } else {
        hasher.update((payload.len() as u64).to_be_bytes());
        hasher.update(payload);
    }
    Ok(())
}

/// Zero the creation and modification times of an mvhd/tkhd/mdhd payload.
fn zero_timestamps(payload: &mut [u8]) {
    let Some(&version) = payload.first() else {
        return;
    };
    // version 1 uses 64-bit times, version 0 32-bit; both follow 4 bytes of version/flags
    let range = if version == 1 { 4..20 } else { 4..12 };
    if let Some(times) = payload.get_mut(range) {
        times.fill(0);
    }
}

fn mpeg_audio_hash(path: &Path, mut file: File, len: u64) -> Result<String> {
    let mut start = 0u64;
    let mut tag = [0u8; 10];
    if read_up_to(&mut file, &mut tag)? == 10 && &tag[..3] == b"ID3" {
        let size = tag[6..10]
            .iter()
            .fold(0u64, |acc, b| (acc << 7) | u64::from(b & 0x7f));
        let footer = if tag[5] & 0x10 != 0 { 10 } else { 0 };
        start = 10 + size + footer;
    }

    let mut end = len;
    if len >= start + 128 {
        file.seek(SeekFrom::End(-128))?;
        let mut trailer = [0u8; 3];
        if read_up_to(&mut file, &mut trailer)? == 3 && &trailer == b"TAG" {
            end -= 128;
        }
    }

    if start + 2 > end {
        return Err(Error::format(path, "no audio frames"));
    }

    file.seek(SeekFrom::Start(start))?;
    let mut sync = [0u8; 2];
    file.read_exact(&mut sync)?;
    if !is_frame_sync(&sync) {
        return Err(Error::format(path, "audio data does not start with a frame sync"));
    }

    file.seek(SeekFrom::Start(start))?;
    let mut hasher = Sha256::new();
    hasher.update(b"mpga");
    copy_into(&mut BufReader::new(file), end - start, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn is_frame_sync(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0
}

fn read_payload<R: Read>(reader: &mut R, len: u64) -> std::io::Result<Vec<u8>> {
    let mut payload = Vec::with_capacity(len.min(16 * 1024 * 1024) as usize);
    reader.take(len).read_to_end(&mut payload)?;
    if (payload.len() as u64) < len {
        return Err(std::io::ErrorKind::UnexpectedEof.into());
    }
    Ok(payload)
}

/// Stream `len` bytes from `reader` into the hasher.
fn copy_into<R: Read>(reader: &mut R, len: u64, hasher: &mut Sha256) -> std::io::Result<()> {
    let mut remaining = len;
    let mut buffer = vec![0u8; CHUNK_SIZE];
    while remaining > 0 {
        let want = remaining.min(CHUNK_SIZE as u64) as usize;
        let n = reader.read(&mut buffer[..want])?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        hasher.update(&buffer[..n]);
        remaining -= n as u64;
    }
    Ok(())
}

fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

fn fourcc(kind: &[u8; 4]) -> String {
    String::from_utf8_lossy(kind).into_owned()
}
