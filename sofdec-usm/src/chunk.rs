//! USM chunk codec.
//!
//! A USM file is a flat sequence of chunks, each a 0x20 byte big-endian
//! header followed by the payload and zero padding.

use crate::{
    Error, Options, Result,
    mask::Masks,
    reader::Reader,
    table::{self, Table},
};
use std::{fmt, ops::Range};

pub(crate) const HEADER_SIZE: usize = 0x20;
// Header bytes after the chunk size field, before the payload.
const PAYLOAD_OFFSET: u8 = 0x18;
const CONTINUATION: u8 = 0x01;

/// Chunk signature, the first four bytes of every chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Signature {
    /// `CRID`, container directory.
    Crid,
    /// `@SFV`, video.
    Video,
    /// `@SFA`, audio.
    Audio,
    /// `@ALP`, alpha plane.
    Alpha,
    /// `@CUE`, cue points.
    Cue,
    /// `@SBT`, subtitles.
    Subtitle,
}

impl Signature {
    pub fn from_bytes(bytes: &[u8; 4]) -> Option<Self> {
        Some(match bytes {
            b"CRID" => Self::Crid,
            b"@SFV" => Self::Video,
            b"@SFA" => Self::Audio,
            b"@ALP" => Self::Alpha,
            b"@CUE" => Self::Cue,
            b"@SBT" => Self::Subtitle,
            _ => return None,
        })
    }

    pub fn as_bytes(self) -> &'static [u8; 4] {
        match self {
            Self::Crid => b"CRID",
            Self::Video => b"@SFV",
            Self::Audio => b"@SFA",
            Self::Alpha => b"@ALP",
            Self::Cue => b"@CUE",
            Self::Subtitle => b"@SBT",
        }
    }

    /// Signature as a big-endian integer, the form `CRIUSF_DIR_STREAM` stores
    /// in its `stmid` column.
    pub fn stream_id(self) -> u32 {
        u32::from_be_bytes(*self.as_bytes())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Every signature is ASCII.
        f.write_str(std::str::from_utf8(self.as_bytes()).unwrap_or("????"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum PayloadType {
    Stream = 0,
    Header = 1,
    SectionEnd = 2,
    Metadata = 3,
}

impl PayloadType {
    fn from_bits(value: u8) -> Self {
        match value & 0x03 {
            0 => Self::Stream,
            1 => Self::Header,
            2 => Self::SectionEnd,
            _ => Self::Metadata,
        }
    }
}

/// How many zero bytes follow a payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Padding {
    /// Exactly this many bytes.
    Fixed(u16),
    /// Pad the whole chunk (header included) to a multiple of this size.
    Align(usize),
    /// Pad small chunks up to 0xF0 bytes, larger ones to a multiple of 8.
    Metadata,
}

impl Padding {
    /// Padding bytes for a payload of `payload_len` bytes.
    pub fn size(self, payload_len: usize) -> usize {
        let size = HEADER_SIZE + payload_len;

        match self {
            Self::Fixed(x) => x as usize,
            Self::Align(x) if x > 1 => (x - size % x) % x,
            Self::Align(_) => 0,
            Self::Metadata if size <= 0xF0 => 0xF0 - size,
            Self::Metadata => (8 - size % 8) % 8,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Table(Table),
    Data(Vec<u8>),
}

impl Payload {
    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Self::Table(x) => Some(x),
            Self::Data(_) => None,
        }
    }

    pub fn as_data(&self) -> Option<&[u8]> {
        match self {
            Self::Table(_) => None,
            Self::Data(x) => Some(x),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
    pub signature: Signature,
    pub payload_type: PayloadType,
    pub channel: u8,
    /// The frame carried by this page continues in the next page of the same
    /// stream.
    pub continuation: bool,
    pub frame_time: u32,
    /// Frames per second times 100.
    pub frame_rate: u32,
    /// Non-zero on a `CRID` chunk written with a key, see [`Masks::check_value`].
    pub key_check: u32,
    pub padding: Padding,
    pub payload: Payload,
}

impl Chunk {
    pub fn new(signature: Signature, payload_type: PayloadType, payload: Payload) -> Self {
        Self {
            signature,
            payload_type,
            channel: 0,
            continuation: false,
            frame_time: 0,
            frame_rate: 0,
            key_check: 0,
            padding: Padding::Fixed(0),
            payload,
        }
    }

    /// `CRID` chunk carrying the container directory table.
    pub fn crid(table: Table) -> Self {
        Self {
            frame_rate: 3000,
            padding: Padding::Align(0x800),
            ..Self::new(Signature::Crid, PayloadType::Header, Payload::Table(table))
        }
    }

    /// Stream header table chunk.
    pub fn header(signature: Signature, channel: u8, table: Table) -> Self {
        let padding = match signature {
            Signature::Audio => Padding::Fixed(0x08),
            _ => Padding::Fixed(0x18),
        };

        Self {
            channel,
            frame_rate: 3000,
            padding,
            ..Self::new(signature, PayloadType::Header, Payload::Table(table))
        }
    }

    pub fn metadata(signature: Signature, channel: u8, table: Table) -> Self {
        Self {
            channel,
            frame_rate: 3000,
            padding: Padding::Metadata,
            ..Self::new(signature, PayloadType::Metadata, Payload::Table(table))
        }
    }

    /// Section end marker such as `#HEADER END`. `marker` must be at most 31
    /// bytes; it is padded with `=` and NUL terminated.
    pub fn section_end(signature: Signature, channel: u8, marker: &str) -> Self {
        let mut text = format!("{:<16}", marker).into_bytes();
        text.resize(31, b'=');
        text.push(0);

        Self {
            channel,
            frame_rate: 3000,
            ..Self::new(signature, PayloadType::SectionEnd, Payload::Data(text))
        }
    }

    /// Stream page.
    pub fn stream(signature: Signature, channel: u8, data: Vec<u8>, frame_time: u32, frame_rate: u32) -> Self {
        Self {
            channel,
            frame_time,
            frame_rate,
            padding: Padding::Align(0x20),
            ..Self::new(signature, PayloadType::Stream, Payload::Data(data))
        }
    }

    /// Text of a section end marker, with trailing `=` and NUL removed.
    pub fn section_marker(&self) -> Option<&str> {
        if self.payload_type != PayloadType::SectionEnd {
            return None;
        }

        let data = self.payload.as_data()?;
        let text = std::str::from_utf8(data.split(|&x| x == 0).next()?).ok()?;
        Some(text.trim_end_matches('=').trim_end())
    }

    /// Serialized length of the chunk, padding included.
    pub fn encoded_len(&self, options: &Options) -> Result<usize> {
        let payload = match &self.payload {
            Payload::Table(x) => x.encode(options.encoding())?.len(),
            Payload::Data(x) => x.len(),
        };
        Ok(HEADER_SIZE + payload + self.padding.size(payload))
    }
}

/// Serialize a chunk. Every size field is recomputed from the payload, and
/// stream payloads are encrypted when `masks` is given.
pub fn write_chunk(chunk: &Chunk, masks: Option<&Masks>, options: &Options) -> Result<Vec<u8>> {
    let mut payload = match &chunk.payload {
        Payload::Table(x) => x.encode(options.encoding())?,
        Payload::Data(x) => x.clone(),
    };

    if let (Some(masks), PayloadType::Stream) = (masks, chunk.payload_type) {
        masks.encrypt(chunk.signature, &mut payload);
    }

    let padding = chunk.padding.size(payload.len());
    let padding_u16 = u16::try_from(padding)
        .map_err(|_| Error::InvalidInput(format!("{} bytes of chunk padding do not fit", padding)))?;
    let chunk_size = u32::try_from(PAYLOAD_OFFSET as usize + payload.len() + padding).map_err(|_| {
        Error::InvalidInput(format!(
            "{} byte {} payload is too large for one chunk",
            payload.len(),
            chunk.signature
        ))
    })?;

    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len() + padding);
    out.extend_from_slice(chunk.signature.as_bytes());
    out.extend_from_slice(&chunk_size.to_be_bytes());
    out.push(0);
    out.push(PAYLOAD_OFFSET);
    out.extend_from_slice(&padding_u16.to_be_bytes());
    out.push(chunk.channel);
    out.push(0);
    out.push(if chunk.continuation { CONTINUATION } else { 0 });
    out.push(chunk.payload_type as u8);
    out.extend_from_slice(&chunk.frame_time.to_be_bytes());
    out.extend_from_slice(&chunk.frame_rate.to_be_bytes());
    out.extend_from_slice(&chunk.key_check.to_be_bytes());
    out.extend_from_slice(&[0; 4]);
    out.extend_from_slice(&payload);
    out.resize(out.len() + padding, 0);
    Ok(out)
}

/// Lazy iterator over the chunks of a USM buffer.
///
/// Chunks are parsed one at a time. After the first error the iterator yields
/// `None`.
pub struct ChunkReader<'a> {
    data: &'a [u8],
    position: usize,
    masks: Option<Masks>,
    options: Options,
    done: bool,
}

impl<'a> ChunkReader<'a> {
    pub fn new(data: &'a [u8], options: Options) -> Self {
        Self {
            data,
            position: 0,
            masks: None,
            options,
            done: false,
        }
    }

    /// Install the masks used to decrypt stream payloads of the chunks that
    /// follow.
    pub fn set_masks(&mut self, masks: Option<Masks>) {
        self.masks = masks;
    }

    /// Offset of the next chunk.
    pub fn position(&self) -> usize {
        self.position
    }

    fn read_chunk(&mut self) -> Result<Chunk> {
        let raw = RawChunk::parse(self.data, self.position)?;
        let mut payload = self.data[raw.payload.clone()].to_vec();

        if let (Some(masks), PayloadType::Stream) = (&self.masks, raw.payload_type) {
            masks.decrypt(raw.signature, &mut payload);
        }

        log::debug!(
            "{} chunk at {:#x} ({:?}, channel {}, {} byte payload)",
            raw.signature,
            self.position,
            raw.payload_type,
            raw.channel,
            payload.len()
        );

        let payload = if payload.starts_with(table::SIGNATURE) {
            Payload::Table(Table::decode(&payload, self.options.encoding())?)
        } else {
            Payload::Data(payload)
        };

        self.position = raw.end;

        Ok(Chunk {
            signature: raw.signature,
            payload_type: raw.payload_type,
            channel: raw.channel,
            continuation: raw.flags & CONTINUATION != 0,
            frame_time: raw.frame_time,
            frame_rate: raw.frame_rate,
            key_check: raw.key_check,
            padding: Padding::Fixed(raw.padding),
            payload,
        })
    }
}

/// Header fields of a chunk and where its payload lies, payload untouched.
pub(crate) struct RawChunk {
    pub(crate) signature: Signature,
    pub(crate) payload_type: PayloadType,
    pub(crate) channel: u8,
    pub(crate) flags: u8,
    pub(crate) frame_time: u32,
    pub(crate) frame_rate: u32,
    pub(crate) key_check: u32,
    pub(crate) padding: u16,
    /// Absolute range of the payload.
    pub(crate) payload: Range<usize>,
    /// Absolute offset just past the padding.
    pub(crate) end: usize,
}

impl RawChunk {
    pub(crate) fn parse(data: &[u8], offset: usize) -> Result<Self> {
        let available = data.len().saturating_sub(offset);
        let data = &data[offset.min(data.len())..];

        if available >= 4 {
            let signature: [u8; 4] = [data[0], data[1], data[2], data[3]];

            if Signature::from_bytes(&signature).is_none() {
                return Err(Error::UnknownSignature { signature, offset });
            }
        }

        let truncated = |needed: usize| Error::TruncatedChunk {
            offset,
            needed,
            available,
        };

        if available < HEADER_SIZE {
            return Err(truncated(HEADER_SIZE));
        }

        let mut header = Reader::new(&data[..HEADER_SIZE]);
        let eof = |_: std::io::Error| truncated(HEADER_SIZE);
        let signature = header
            .read_bytes(4)
            .ok()
            .and_then(|x| x.try_into().ok())
            .and_then(Signature::from_bytes)
            .ok_or_else(|| truncated(HEADER_SIZE))?;
        let chunk_size = header.read_u32().map_err(eof)? as usize;
        header.skip(1).map_err(eof)?;
        let payload_offset = header.read_u8().map_err(eof)? as usize;
        let padding = header.read_u16().map_err(eof)?;
        let channel = header.read_u8().map_err(eof)?;
        header.skip(1).map_err(eof)?;
        let flags = header.read_u8().map_err(eof)?;
        let payload_type = PayloadType::from_bits(header.read_u8().map_err(eof)?);
        let frame_time = header.read_u32().map_err(eof)?;
        let frame_rate = header.read_u32().map_err(eof)?;
        let key_check = header.read_u32().map_err(eof)?;

        let total = 8 + chunk_size;

        if total > available {
            return Err(truncated(total));
        }

        if payload_offset < PAYLOAD_OFFSET as usize || payload_offset + padding as usize > chunk_size {
            return Err(truncated(8 + payload_offset + padding as usize));
        }

        Ok(Self {
            signature,
            payload_type,
            channel,
            flags,
            frame_time,
            frame_rate,
            key_check,
            padding,
            payload: offset + 8 + payload_offset..offset + total - padding as usize,
            end: offset + total,
        })
    }
}

impl Iterator for ChunkReader<'_> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.position >= self.data.len() {
            return None;
        }

        let chunk = self.read_chunk();

        if chunk.is_err() {
            self.done = true;
        }

        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Key, table::Value};

    fn header_table() -> Table {
        Table::single(
            "AUDIO_HDRINFO",
            vec![("audio_codec", Value::I8(4)), ("sampling_rate", Value::I32(48000))],
        )
        .unwrap()
    }

    #[test]
    fn test_padding_rules() {
        assert_eq!(Padding::Fixed(8).size(100), 8);
        assert_eq!(Padding::Align(0x20).size(0x20), 0);
        assert_eq!(Padding::Align(0x20).size(10), 0x16);
        assert_eq!(Padding::Align(0x800).size(0x100), 0x6E0);
        assert_eq!(Padding::Metadata.size(0x40), 0x90);
        assert_eq!(Padding::Metadata.size(0xD1), 7);
    }

    #[test]
    fn test_section_end_text() {
        let chunk = Chunk::section_end(Signature::Video, 0, "#HEADER END");
        assert_eq!(
            chunk.payload.as_data().unwrap(),
            b"#HEADER END     ===============\0"
        );
        assert_eq!(chunk.section_marker(), Some("#HEADER END"));
    }

    #[test]
    fn test_header_layout() {
        let mut chunk = Chunk::stream(Signature::Video, 2, vec![0xAB; 10], 100, 2997);
        chunk.continuation = true;
        let data = write_chunk(&chunk, None, &Options::new()).unwrap();

        assert_eq!(data.len(), 0x40);
        assert_eq!(&data[..4], b"@SFV");
        assert_eq!(u32::from_be_bytes(data[4..8].try_into().unwrap()), 0x38);
        assert_eq!(data[9], 0x18);
        assert_eq!(u16::from_be_bytes(data[10..12].try_into().unwrap()), 0x16);
        assert_eq!(data[0x0C], 2);
        assert_eq!(data[0x0E], 1);
        assert_eq!(data[0x0F], 0);
        assert_eq!(&data[0x20..0x2A], &[0xAB; 10]);
    }

    #[test]
    fn test_round_trip() {
        let options = Options::new();
        let chunks = vec![
            Chunk::header(Signature::Audio, 0, header_table()),
            Chunk::section_end(Signature::Audio, 0, "#HEADER END"),
            Chunk::stream(Signature::Audio, 0, vec![7; 0x300], 0, 3000),
        ];

        let mut data = vec![];
        for chunk in &chunks {
            data.extend(write_chunk(chunk, None, &options).unwrap());
        }

        let read = ChunkReader::new(&data, options).collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(read.len(), 3);
        assert_eq!(read[0].payload, chunks[0].payload);
        assert_eq!(read[0].padding, Padding::Fixed(8));
        assert_eq!(read[2].payload.as_data(), Some(&[7u8; 0x300][..]));

        // Re-serializing a read chunk reproduces the bytes.
        let again: Vec<u8> = read
            .iter()
            .flat_map(|x| write_chunk(x, None, &options).unwrap())
            .collect();
        assert_eq!(again, data);
    }

    #[test]
    fn test_encrypted_round_trip() {
        let options = Options::new();
        let masks = Key::new(0x1234_5678_9ABC_DEF0).masks();
        let plain: Vec<u8> = (0..0x400).map(|x| x as u8).collect();
        let chunk = Chunk::stream(Signature::Video, 0, plain.clone(), 0, 3000);
        let data = write_chunk(&chunk, Some(&masks), &options).unwrap();
        assert_ne!(&data[0x20..0x420], &plain[..]);

        let mut reader = ChunkReader::new(&data, options);
        reader.set_masks(Some(masks));
        let read = reader.next().unwrap().unwrap();
        assert_eq!(read.payload.as_data(), Some(&plain[..]));
    }

    #[test]
    fn test_tables_are_never_masked() {
        let options = Options::new();
        let masks = Key::new(1).masks();
        let chunk = Chunk::header(Signature::Audio, 0, header_table());
        assert_eq!(
            write_chunk(&chunk, Some(&masks), &options).unwrap(),
            write_chunk(&chunk, None, &options).unwrap()
        );
    }

    #[test]
    fn test_unknown_signature() {
        let mut data = write_chunk(
            &Chunk::stream(Signature::Video, 0, vec![1; 4], 0, 3000),
            None,
            &Options::new(),
        )
        .unwrap();
        data[..4].copy_from_slice(b"@XYZ");

        let mut reader = ChunkReader::new(&data, Options::new());
        assert!(matches!(
            reader.next(),
            Some(Err(Error::UnknownSignature { offset: 0, .. }))
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_truncated_chunk() {
        let data = write_chunk(
            &Chunk::stream(Signature::Audio, 0, vec![1; 0x100], 0, 3000),
            None,
            &Options::new(),
        )
        .unwrap();

        let mut reader = ChunkReader::new(&data[..data.len() - 1], Options::new());
        assert!(matches!(
            reader.next(),
            Some(Err(Error::TruncatedChunk { offset: 0, .. }))
        ));
        assert!(reader.next().is_none());

        let mut reader = ChunkReader::new(&data[..0x10], Options::new());
        assert!(matches!(
            reader.next(),
            Some(Err(Error::TruncatedChunk { needed: 0x20, available: 0x10, .. }))
        ));
    }
}
