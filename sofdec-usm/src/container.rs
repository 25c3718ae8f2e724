//! Whole USM files.
//!
//! A file written by [`create`] is laid out as
//!
//! 1. `CRID` chunk holding `CRIUSF_DIR_STREAM`, padded to 0x800 bytes
//! 2. one `*_HDRINFO` header chunk per stream, then a `#HEADER END` marker per stream
//! 3. one `VIDEO_SEEKINFO` chunk per video stream with keyframes, then a
//!    `#METADATA END` marker per video stream
//! 4. stream pages interleaved by frame index, videos before audios, each
//!    stream closed by a `#CONTENTS END` marker

use crate::{
    Error, Options, Result,
    chunk::{Chunk, ChunkReader, Payload, PayloadType, RawChunk, Signature, write_chunk},
    codec::Codec,
    mask::{Key, Masks},
    media::{AudioParams, ElementaryStream, Frame, StreamParams, VideoParams},
    page::{Frames, Page, mux_frame},
    table::{Table, Value},
};
use std::{collections::BTreeSet, fmt, path::Path};

pub const DIRECTORY_TABLE: &str = "CRIUSF_DIR_STREAM";
pub const VIDEO_HEADER_TABLE: &str = "VIDEO_HDRINFO";
pub const AUDIO_HEADER_TABLE: &str = "AUDIO_HDRINFO";
pub const SEEK_TABLE: &str = "VIDEO_SEEKINFO";
/// `fmtver` written by [`create`].
pub const FORMAT_VERSION: i32 = 16777984;

const HEADER_END: &str = "#HEADER END";
const METADATA_END: &str = "#METADATA END";
const CONTENTS_END: &str = "#CONTENTS END";
// Byte offset of the key check inside a chunk header.
const KEY_CHECK_OFFSET: usize = 0x18;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StreamId {
    pub signature: Signature,
    pub channel: u8,
}

impl StreamId {
    pub fn new(signature: Signature, channel: u8) -> Self {
        Self { signature, channel }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.signature, self.channel)
    }
}

/// Container-wide fields of `CRIUSF_DIR_STREAM`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ContainerMetadata {
    pub filename: String,
    pub format_version: i32,
}

impl Default for ContainerMetadata {
    fn default() -> Self {
        Self {
            filename: String::new(),
            format_version: FORMAT_VERSION,
        }
    }
}

impl ContainerMetadata {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            ..Default::default()
        }
    }

    fn from_directory(directory: &Table) -> Self {
        Self {
            filename: directory.get_str(0, "filename").unwrap_or_default().to_owned(),
            format_version: directory
                .get_i64(0, "fmtver")
                .and_then(|x| i32::try_from(x).ok())
                .unwrap_or_default(),
        }
    }
}

/// One stream of a parsed container.
#[derive(Clone, Debug, PartialEq)]
pub struct Stream {
    pub id: StreamId,
    /// `VIDEO_HDRINFO` or `AUDIO_HDRINFO`.
    pub header: Option<Table>,
    pub seek: Option<Table>,
    /// Indices into [`Container::chunks`] of the stream's pages, in order.
    pub chunks: Vec<usize>,
}

impl Stream {
    fn new(id: StreamId) -> Self {
        Self {
            id,
            header: None,
            seek: None,
            chunks: vec![],
        }
    }

    pub fn codec(&self) -> Result<Codec> {
        let (table, column) = match self.id.signature {
            Signature::Video | Signature::Alpha => (VIDEO_HEADER_TABLE, "mpeg_codec"),
            Signature::Audio => (AUDIO_HEADER_TABLE, "audio_codec"),
            x => {
                return Err(Error::UnsupportedCodec(format!("{} streams are not extracted", x)));
            }
        };

        let value = self
            .header
            .as_ref()
            .and_then(|x| x.get_i64(0, column))
            .ok_or_else(|| Error::MissingTable(format!("{}.{} for {}", table, column, self.id)))?;

        match self.id.signature {
            Signature::Audio => Codec::from_audio(value),
            _ => Codec::from_video(value),
        }
    }

    /// Frame indices listed in the seek table.
    pub fn keyframes(&self) -> BTreeSet<usize> {
        let Some(seek) = &self.seek else {
            return BTreeSet::new();
        };

        (0..seek.len())
            .filter_map(|i| seek.get_i64(i, "ofs_frmid"))
            .filter_map(|x| usize::try_from(x).ok())
            .collect()
    }

    fn params(&self) -> StreamParams {
        let get = |column: &str| {
            self.header
                .as_ref()
                .and_then(|x| x.get_i64(0, column))
                .and_then(|x| u32::try_from(x).ok())
                .unwrap_or_default()
        };

        match self.id.signature {
            Signature::Audio => StreamParams::Audio(AudioParams {
                sampling_rate: get("sampling_rate"),
                num_channels: get("num_channels"),
            }),
            _ => StreamParams::Video(VideoParams {
                width: get("width"),
                height: get("height"),
                framerate_n: get("framerate_n"),
                framerate_d: get("framerate_d"),
            }),
        }
    }
}

/// In-memory model of a USM file.
#[derive(Clone, Debug, PartialEq)]
pub struct Container {
    pub metadata: ContainerMetadata,
    /// Key check recorded in the `CRID` header, 0 when absent.
    pub key_check: u32,
    pub directory: Table,
    /// Streams in order of first appearance.
    pub streams: Vec<Stream>,
    /// Every chunk of the file, `CRID` first. Stream payloads are decrypted.
    pub chunks: Vec<Chunk>,
    // Decrypted with a key the file gave no way to verify.
    unverified_key: bool,
}

impl Container {
    /// Parse a whole file, decrypting stream payloads with `key`.
    pub fn parse(data: &[u8], key: Option<Key>, options: Options) -> Result<Self> {
        Self::scan(data, Some(key), true, options)
    }

    // With `key` set to `None` stream payloads stay as stored and no key is
    // demanded.
    fn scan(data: &[u8], key: Option<Option<Key>>, keep_payloads: bool, options: Options) -> Result<Self> {
        check_signature(data)?;

        let mut reader = ChunkReader::new(data, options);
        let crid = reader.next().ok_or(Error::NotUsm(*Signature::Crid.as_bytes()))??;
        let directory = match &crid.payload {
            Payload::Table(x) if x.name() == DIRECTORY_TABLE => x.clone(),
            _ => return Err(Error::MissingTable(DIRECTORY_TABLE.to_owned())),
        };

        let masks = match key {
            Some(key) => resolve_masks(crid.key_check, key)?,
            None => None,
        };
        let unverified_key = masks.is_some() && crid.key_check == 0;

        if unverified_key {
            log::debug!("no key check recorded, decrypting with the supplied key unverified");
        }

        reader.set_masks(masks);

        let key_check = crid.key_check;
        let mut chunks = vec![crid];
        let mut streams: Vec<Stream> = vec![];

        for chunk in reader {
            let mut chunk = chunk.map_err(|e| retag(e, unverified_key))?;
            let index = chunks.len();

            if chunk.signature != Signature::Crid {
                let id = StreamId::new(chunk.signature, chunk.channel);
                let position = match streams.iter().position(|x| x.id == id) {
                    Some(x) => x,
                    None => {
                        streams.push(Stream::new(id));
                        streams.len() - 1
                    }
                };
                let stream = &mut streams[position];

                match (chunk.payload_type, &chunk.payload) {
                    (PayloadType::Stream, _) => stream.chunks.push(index),
                    (PayloadType::Header, Payload::Table(x)) if x.name().ends_with("_HDRINFO") => {
                        stream.header = Some(x.clone());
                    }
                    (PayloadType::Metadata, Payload::Table(x)) if x.name() == SEEK_TABLE => {
                        stream.seek = Some(x.clone());
                    }
                    _ => {}
                }

                if chunk.payload_type == PayloadType::Stream && !keep_payloads {
                    chunk.payload = Payload::Data(vec![]);
                }
            }

            chunks.push(chunk);
        }

        log::debug!("{} chunks in {} streams", chunks.len(), streams.len());

        Ok(Self {
            metadata: ContainerMetadata::from_directory(&directory),
            key_check,
            directory,
            streams,
            chunks,
            unverified_key,
        })
    }

    /// True when the file records that it was written with a key.
    pub fn is_encrypted(&self) -> bool {
        self.key_check != 0
    }

    pub fn stream(&self, id: StreamId) -> Option<&Stream> {
        self.streams.iter().find(|x| x.id == id)
    }

    /// Lazy frames of a stream. Unknown streams have no frames.
    pub fn frames(&self, id: StreamId) -> Frames<impl Iterator<Item = Result<Page>> + '_> {
        let indices = self.stream(id).map(|x| x.chunks.as_slice()).unwrap_or(&[]);
        let pages = indices.iter().map(move |&i| {
            let chunk = &self.chunks[i];

            match &chunk.payload {
                Payload::Data(x) => Ok(Page::new(x.clone(), chunk.continuation)),
                Payload::Table(x) => Err(Error::MalformedTable(format!(
                    "stream page of {} holds a {} table",
                    id,
                    x.name()
                ))),
            }
        });

        Frames::new(pages, id.to_string())
    }

    /// Serialize every chunk again, stream payloads encrypted with `key`.
    /// Tables are written in canonical layout.
    pub fn to_bytes(&self, key: Option<Key>, options: &Options) -> Result<Vec<u8>> {
        let masks = key.map(Masks::derive);
        let mut out = vec![];

        for (i, chunk) in self.chunks.iter().enumerate() {
            if i == 0 {
                let crid = Chunk {
                    key_check: masks.as_ref().map_or(0, Masks::check_value),
                    ..chunk.clone()
                };
                out.extend(write_chunk(&crid, None, options)?);
            } else {
                out.extend(write_chunk(chunk, masks.as_ref(), options)?);
            }
        }

        Ok(out)
    }

    fn elementary_stream(&self, stream: &Stream, codec: Codec) -> Result<ElementaryStream> {
        let keyframes = stream.keyframes();
        let frames = self
            .frames(stream.id)
            .enumerate()
            .map(|(i, x)| x.map(|data| Frame::new(data, keyframes.contains(&i))))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| retag(e, self.unverified_key))?;

        let filename = (1..self.directory.len())
            .find(|&row| {
                self.directory.get_i64(row, "stmid") == Some(stream.id.signature.stream_id() as i32 as i64)
                    && self.directory.get_i64(row, "chno") == Some(stream.id.channel as i64)
            })
            .and_then(|row| self.directory.get_str(row, "filename"))
            .unwrap_or_default()
            .to_owned();

        Ok(ElementaryStream {
            codec,
            channel: stream.id.channel,
            filename,
            params: stream.params(),
            frames,
            alpha: stream.id.signature == Signature::Alpha,
        })
    }
}

fn check_signature(data: &[u8]) -> Result<()> {
    if data.starts_with(Signature::Crid.as_bytes()) {
        return Ok(());
    }

    let mut signature = [0; 4];
    let n = data.len().min(4);
    signature[..n].copy_from_slice(&data[..n]);
    Err(Error::NotUsm(signature))
}

fn resolve_masks(key_check: u32, key: Option<Key>) -> Result<Option<Masks>> {
    match key {
        None if key_check != 0 => Err(Error::KeyRequired),
        None => Ok(None),
        Some(key) => {
            let masks = key.masks();

            if key_check != 0 && masks.check_value() != key_check {
                return Err(Error::DecryptionMismatch(format!(
                    "key {} does not match the recorded key check {:#010x}",
                    key, key_check
                )));
            }

            Ok(Some(masks))
        }
    }
}

fn retag(error: Error, unverified_key: bool) -> Error {
    if unverified_key && error.is_decode_err() {
        Error::DecryptionMismatch(error.to_string())
    } else {
        error
    }
}

/// Per-stream facts reported by [`probe`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StreamSummary {
    pub id: StreamId,
    /// `None` for streams this crate cannot extract.
    pub codec: Option<Codec>,
    pub frames: usize,
    pub pages: usize,
    pub keyframes: usize,
    pub header: Option<Table>,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Summary {
    pub metadata: ContainerMetadata,
    /// The file records that it was written with a key. Files from other
    /// writers never record one, so `false` does not prove the payloads are
    /// in the clear.
    pub encrypted: bool,
    pub streams: Vec<StreamSummary>,
}

/// Read the tables of a file without decrypting anything.
pub fn probe(data: &[u8], options: Options) -> Result<Summary> {
    let container = Container::scan(data, None, false, options)?;

    let streams = container
        .streams
        .iter()
        .map(|stream| StreamSummary {
            id: stream.id,
            codec: stream.codec().ok(),
            frames: stream
                .chunks
                .iter()
                .filter(|&&i| !container.chunks[i].continuation)
                .count(),
            pages: stream.chunks.len(),
            keyframes: stream.keyframes().len(),
            header: stream.header.clone(),
        })
        .collect();

    Ok(Summary {
        encrypted: container.is_encrypted(),
        metadata: container.metadata,
        streams,
    })
}

/// Frames of every extractable stream in a file.
#[derive(Clone, Debug, PartialEq)]
pub struct Extracted {
    pub metadata: ContainerMetadata,
    pub streams: Vec<ElementaryStream>,
}

/// Decrypt and demultiplex a whole file.
///
/// Streams with an unknown codec are skipped with a warning. The call only
/// fails with [`Error::UnsupportedCodec`] when no stream can be extracted.
pub fn extract(data: &[u8], key: Option<Key>, options: Options) -> Result<Extracted> {
    let container = Container::parse(data, key, options)?;
    let mut streams = vec![];
    let mut unsupported = vec![];

    for stream in &container.streams {
        if matches!(stream.id.signature, Signature::Cue | Signature::Subtitle) {
            log::debug!("skipping {} stream", stream.id);
            continue;
        }

        match stream.codec() {
            Ok(codec) => streams.push(container.elementary_stream(stream, codec)?),
            Err(e @ (Error::UnsupportedCodec(_) | Error::MissingTable(_))) => {
                log::warn!("skipping {}: {}", stream.id, e);
                unsupported.push(e);
            }
            Err(e) => return Err(e),
        }
    }

    if streams.is_empty() {
        if let Some(e) = unsupported.into_iter().next() {
            return Err(match e {
                Error::MissingTable(x) => Error::UnsupportedCodec(format!("no codec recorded ({})", x)),
                e => e,
            });
        }
    }

    Ok(Extracted {
        metadata: container.metadata,
        streams,
    })
}

/// Rewrite a file under another key, or in the clear when `to` is `None`.
///
/// Only stream payloads and the recorded key check change, every other byte
/// is kept.
pub fn reencrypt(data: &[u8], from: Option<Key>, to: Option<Key>, options: &Options) -> Result<Vec<u8>> {
    check_signature(data)?;

    let crid = RawChunk::parse(data, 0)?;
    let directory = &data[crid.payload.clone()];

    if !directory.starts_with(b"@UTF") || Table::decode(directory, options.encoding())?.name() != DIRECTORY_TABLE {
        return Err(Error::MissingTable(DIRECTORY_TABLE.to_owned()));
    }

    let from = resolve_masks(crid.key_check, from)?;
    let to = to.map(Masks::derive);
    let mut out = data.to_vec();
    let check = to.as_ref().map_or(0, Masks::check_value);
    out[KEY_CHECK_OFFSET..KEY_CHECK_OFFSET + 4].copy_from_slice(&check.to_be_bytes());

    let mut offset = crid.end;

    while offset < data.len() {
        let chunk = RawChunk::parse(data, offset)?;

        if chunk.payload_type == PayloadType::Stream {
            let payload = &mut out[chunk.payload.clone()];

            if let Some(masks) = &from {
                masks.decrypt(chunk.signature, payload);
            }

            if let Some(masks) = &to {
                masks.encrypt(chunk.signature, payload);
            }
        }

        offset = chunk.end;
    }

    Ok(out)
}

#[derive(Clone, Default)]
struct Written {
    max_frame: usize,
    max_chunk: usize,
    /// Frame index and offset from the start of the stream section.
    keyframes: Vec<(u32, u64)>,
}

/// Build a USM file from elementary streams.
///
/// At least one video stream is required. Streams are written videos first,
/// each kind ordered by channel.
pub fn create(
    streams: &[ElementaryStream],
    metadata: &ContainerMetadata,
    key: Option<Key>,
    options: &Options,
) -> Result<Vec<u8>> {
    validate(streams)?;

    let mut ordered: Vec<&ElementaryStream> = streams.iter().collect();
    ordered.sort_by_key(|x| (!x.codec.is_video(), x.channel));

    let masks = key.map(Masks::derive);
    let mut body = vec![];
    let mut written = vec![Written::default(); ordered.len()];
    let longest = ordered.iter().map(|x| x.frames.len()).max().unwrap_or(0);

    for index in 0..longest {
        for (stream, written) in ordered.iter().zip(written.iter_mut()) {
            let Some(frame) = stream.frames.get(index) else {
                continue;
            };

            if stream.codec.is_video() && frame.keyframe {
                written.keyframes.push((to_u32(index, "frame index")?, body.len() as u64));
            }

            let frame_time = frame_time(stream, index);
            let frame_rate = frame_rate(stream);

            for page in mux_frame(&frame.data, stream.codec.framing(), options.get_max_page_size()) {
                let chunk = Chunk {
                    continuation: page.continuation,
                    ..Chunk::stream(stream.signature(), stream.channel, page.data, frame_time, frame_rate)
                };
                let bytes = write_chunk(&chunk, masks.as_ref(), options)?;
                written.max_chunk = written.max_chunk.max(bytes.len());
                body.extend(bytes);
            }

            written.max_frame = written.max_frame.max(frame.data.len());

            if index + 1 == stream.frames.len() {
                let end = Chunk {
                    frame_rate,
                    ..Chunk::section_end(stream.signature(), stream.channel, CONTENTS_END)
                };
                body.extend(write_chunk(&end, None, options)?);
            }
        }
    }

    let filename = container_filename(metadata, &ordered);
    let directory = |filesize: u64| directory_table(metadata, &filename, &ordered, &written, filesize);
    let crid_len = Chunk::crid(directory(0)?).encoded_len(options)?;
    let header_len = header_section(&ordered, &written, 0, options)?.len();
    let body_start = (crid_len + header_len) as u64;
    let filesize = body_start + body.len() as u64;

    let crid = Chunk {
        key_check: masks.as_ref().map_or(0, Masks::check_value),
        ..Chunk::crid(directory(filesize)?)
    };

    let mut out = write_chunk(&crid, None, options)?;
    out.extend(header_section(&ordered, &written, body_start, options)?);
    out.extend(body);

    log::debug!(
        "wrote {} streams, {} bytes ({} of headers)",
        ordered.len(),
        out.len(),
        body_start
    );
    Ok(out)
}

fn validate(streams: &[ElementaryStream]) -> Result<()> {
    if !streams.iter().any(|x| x.codec.is_video() && !x.alpha) {
        return Err(Error::InvalidInput("at least one video stream is required".to_owned()));
    }

    let mut ids = BTreeSet::new();

    for stream in streams {
        let id = StreamId::new(stream.signature(), stream.channel);

        if stream.alpha {
            return Err(Error::InvalidInput(format!("{}: alpha streams cannot be written", id)));
        }

        if !ids.insert(id) {
            return Err(Error::InvalidInput(format!("{} is given twice", id)));
        }

        if stream.frames.is_empty() {
            return Err(Error::InvalidInput(format!("{} has no frames", id)));
        }

        match (stream.codec.is_video(), stream.params) {
            (true, StreamParams::Video(_)) => {}
            (false, StreamParams::Audio(x)) if x.sampling_rate > 0 => {}
            (false, StreamParams::Audio(_)) => {
                return Err(Error::InvalidInput(format!("{} has no sampling rate", id)));
            }
            _ => {
                return Err(Error::InvalidInput(format!(
                    "{} is {} but carries the other kind of parameters",
                    id, stream.codec
                )));
            }
        }
    }

    Ok(())
}

fn frame_time(stream: &ElementaryStream, index: usize) -> u32 {
    let time = match (stream.params, stream.codec.samples_per_frame()) {
        (StreamParams::Audio(x), Some(samples)) if x.sampling_rate > 0 => {
            index as u64 * samples as u64 * 3000 / x.sampling_rate as u64
        }
        _ => index as u64 * 100,
    };

    time.min(u32::MAX as u64) as u32
}

fn frame_rate(stream: &ElementaryStream) -> u32 {
    match stream.params {
        StreamParams::Video(x) => x.frame_rate_x100(),
        StreamParams::Audio(_) => 3000,
    }
}

fn duration(stream: &ElementaryStream) -> f64 {
    let frames = stream.frames.len() as f64;

    match stream.params {
        StreamParams::Video(x) if x.fps() > 0.0 => frames / x.fps(),
        StreamParams::Audio(x) if x.sampling_rate > 0 => {
            frames * stream.codec.samples_per_frame().unwrap_or(1) as f64 / x.sampling_rate as f64
        }
        _ => 0.0,
    }
}

fn bitrate(stream: &ElementaryStream) -> i32 {
    let duration = duration(stream);

    if duration > 0.0 {
        (stream.data_len() as f64 * 8.0 / duration).round() as i32
    } else {
        0
    }
}

fn container_filename(metadata: &ContainerMetadata, streams: &[&ElementaryStream]) -> String {
    let filename = if metadata.filename.is_empty() {
        streams
            .first()
            .and_then(|x| Path::new(&x.filename).file_stem())
            .map(|x| format!("{}.usm", x.to_string_lossy()))
            .unwrap_or_default()
    } else {
        metadata.filename.clone()
    };

    filename.replace('\\', "/")
}

fn directory_table(
    metadata: &ContainerMetadata,
    filename: &str,
    streams: &[&ElementaryStream],
    written: &[Written],
    filesize: u64,
) -> Result<Table> {
    let max_chunk = written.iter().map(|x| x.max_chunk).max().unwrap_or(1);
    let minbuf = (max_chunk as f64 * 1.98746).round() as u64;
    let minbuf = minbuf.next_multiple_of(0x10);
    let avbps: i64 = streams.iter().map(|x| bitrate(x) as i64).sum();

    let mut rows = vec![vec![
        ("fmtver", Value::I32(metadata.format_version)),
        ("filename", Value::String(filename.to_owned())),
        ("filesize", Value::I32(to_i32(filesize, "file size")?)),
        ("datasize", Value::I32(0)),
        ("stmid", Value::I32(0)),
        ("chno", Value::I16(-1)),
        ("minchk", Value::I16(1)),
        ("minbuf", Value::I32(to_i32(minbuf, "minbuf")?)),
        ("avbps", Value::I32(to_i32(avbps.max(0) as u64, "bitrate")?)),
    ]];

    for (stream, written) in streams.iter().zip(written) {
        let stream_filename = if stream.filename.is_empty() {
            filename.to_owned()
        } else {
            stream.filename.replace('\\', "/")
        };

        rows.push(vec![
            ("fmtver", Value::I32(metadata.format_version)),
            ("filename", Value::String(stream_filename)),
            ("filesize", Value::I32(to_i32(stream.data_len() as u64, "stream size")?)),
            ("datasize", Value::I32(0)),
            ("stmid", Value::I32(stream.signature().stream_id() as i32)),
            ("chno", Value::I16(stream.channel as i16)),
            ("minchk", Value::I16(if stream.codec.is_video() { 3 } else { 1 })),
            ("minbuf", Value::I32(to_i32(written.max_frame as u64, "minbuf")?)),
            ("avbps", Value::I32(bitrate(stream))),
        ]);
    }

    Table::infer(DIRECTORY_TABLE, rows)
}

fn header_table(stream: &ElementaryStream, written: &Written) -> Result<Table> {
    // Largest stream chunk minus the signature and size fields.
    let ixsize = Value::I32(to_i32(written.max_chunk.saturating_sub(8) as u64, "ixsize")?);
    let frames = Value::I32(to_i32(stream.frames.len() as u64, "frame count")?);

    match stream.params {
        StreamParams::Video(x) => Table::single(
            VIDEO_HEADER_TABLE,
            vec![
                ("width", Value::I32(x.width as i32)),
                ("height", Value::I32(x.height as i32)),
                ("mat_width", Value::I32(x.width as i32)),
                ("mat_height", Value::I32(x.height as i32)),
                ("disp_width", Value::I32(x.width as i32)),
                ("disp_height", Value::I32(x.height as i32)),
                ("scrn_width", Value::I32(0)),
                ("mpeg_dcprec", Value::I8(stream.codec.dc_precision())),
                ("mpeg_codec", Value::I8(stream.codec.id())),
                ("alpha_type", Value::I32(0)),
                ("total_frames", frames),
                ("framerate_n", Value::I32(x.framerate_n as i32)),
                ("framerate_d", Value::I32(x.framerate_d as i32)),
                ("metadata_count", Value::I32(1)),
                ("metadata_size", Value::I32(written.keyframes.len() as i32)),
                ("ixsize", ixsize),
                ("pre_padding", Value::I32(0)),
                ("max_picture_size", Value::I32(0)),
                ("color_space", Value::I32(0)),
                ("picture_type", Value::I32(0)),
            ],
        ),
        StreamParams::Audio(x) => Table::single(
            AUDIO_HEADER_TABLE,
            vec![
                ("audio_codec", Value::I8(stream.codec.id())),
                ("sampling_rate", Value::I32(x.sampling_rate as i32)),
                ("num_channels", Value::I32(x.num_channels as i32)),
                ("metadata_count", Value::I32(0)),
                ("metadata_size", Value::I32(0)),
                ("ixsize", ixsize),
                ("ambisonics", Value::I8(0)),
            ],
        ),
    }
}

fn seek_table(written: &Written, body_start: u64) -> Result<Table> {
    let rows = written
        .keyframes
        .iter()
        .map(|&(frame, offset)| {
            Ok(vec![
                ("ofs_byte", Value::I64(to_i64(body_start + offset)?)),
                ("ofs_frmid", Value::U32(frame)),
                ("num_skip", Value::U16(0)),
                ("resv", Value::U16(0)),
            ])
        })
        .collect::<Result<Vec<_>>>()?;

    Table::infer(SEEK_TABLE, rows)
}

/// Header, seek and section end chunks between `CRID` and the stream pages.
/// Its length does not depend on `body_start`.
fn header_section(
    streams: &[&ElementaryStream],
    written: &[Written],
    body_start: u64,
    options: &Options,
) -> Result<Vec<u8>> {
    let mut out = vec![];

    for (stream, written) in streams.iter().zip(written) {
        let chunk = Chunk::header(stream.signature(), stream.channel, header_table(stream, written)?);
        out.extend(write_chunk(&chunk, None, options)?);
    }

    for stream in streams {
        let chunk = Chunk::section_end(stream.signature(), stream.channel, HEADER_END);
        out.extend(write_chunk(&chunk, None, options)?);
    }

    for (stream, written) in streams.iter().zip(written) {
        if stream.codec.is_video() && !written.keyframes.is_empty() {
            let chunk = Chunk::metadata(stream.signature(), stream.channel, seek_table(written, body_start)?);
            out.extend(write_chunk(&chunk, None, options)?);
        }
    }

    for stream in streams.iter().filter(|x| x.codec.is_video()) {
        let chunk = Chunk::section_end(stream.signature(), stream.channel, METADATA_END);
        out.extend(write_chunk(&chunk, None, options)?);
    }

    Ok(out)
}

fn to_i32(value: u64, what: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| Error::InvalidInput(format!("{} {} does not fit in 32 bits", what, value)))
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| Error::InvalidInput(format!("offset {} does not fit in 63 bits", value)))
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::InvalidInput(format!("{} {} does not fit in 32 bits", what, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(frames: Vec<Frame>) -> ElementaryStream {
        ElementaryStream::video(Codec::Vp9, VideoParams::new(320, 240, 30.0), frames).filename("clip.ivf")
    }

    fn audio(frames: Vec<Frame>) -> ElementaryStream {
        ElementaryStream::audio(
            Codec::Hca,
            AudioParams {
                sampling_rate: 48000,
                num_channels: 2,
            },
            frames,
        )
    }

    fn frames(count: usize, size: usize) -> Vec<Frame> {
        (0..count)
            .map(|i| Frame::new((0..size).map(|x| (x + i) as u8).collect(), i % 10 == 0))
            .collect()
    }

    #[test]
    fn test_layout() {
        let options = Options::new();
        let data = create(
            &[video(frames(3, 0x300)), audio(frames(2, 0x200))],
            &ContainerMetadata::default(),
            None,
            &options,
        )
        .unwrap();

        let chunks = ChunkReader::new(&data, options).collect::<Result<Vec<_>>>().unwrap();
        let markers: Vec<_> = chunks.iter().filter_map(|x| x.section_marker()).collect();
        assert_eq!(
            markers,
            ["#HEADER END", "#HEADER END", "#METADATA END", "#CONTENTS END", "#CONTENTS END"]
        );

        let directory = chunks[0].payload.as_table().unwrap();
        assert_eq!(directory.name(), DIRECTORY_TABLE);
        assert_eq!(directory.len(), 3);
        assert_eq!(directory.get_str(0, "filename"), Some("clip.usm"));
        assert_eq!(directory.get_i64(0, "filesize"), Some(data.len() as i64));
        assert_eq!(directory.get_i64(1, "stmid"), Some(0x40534656));
        assert_eq!(directory.get_i64(2, "stmid"), Some(0x40534641));
        assert_eq!(&data[0x800..0x804], b"@SFV");

        // Keyframe 0 points at the first stream chunk.
        let seek = chunks
            .iter()
            .find_map(|x| x.payload.as_table().filter(|t| t.name() == SEEK_TABLE))
            .unwrap();
        let offset = seek.get_i64(0, "ofs_byte").unwrap() as usize;
        assert_eq!(&data[offset..offset + 4], b"@SFV");
        assert_eq!(data[offset + 0x0F], PayloadType::Stream as u8);
    }

    #[test]
    fn test_interleaving() {
        let options = Options::new();
        let data = create(
            &[audio(frames(2, 0x40)), video(frames(3, 0x40))],
            &ContainerMetadata::new("movie.usm"),
            None,
            &options,
        )
        .unwrap();

        let order: Vec<_> = ChunkReader::new(&data, options)
            .map(|x| x.unwrap())
            .filter(|x| x.payload_type == PayloadType::Stream)
            .map(|x| (x.signature, x.frame_time))
            .collect();
        assert_eq!(
            order,
            [
                (Signature::Video, 0),
                (Signature::Audio, 0),
                (Signature::Video, 100),
                (Signature::Audio, 64),
                (Signature::Video, 200),
            ]
        );
    }

    #[test]
    fn test_requires_video() {
        let result = create(&[audio(frames(1, 4))], &ContainerMetadata::default(), None, &Options::new());
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_rejects_alpha() {
        let mut alpha = video(frames(1, 4));
        alpha.alpha = true;
        let result = create(
            &[video(frames(1, 4)), alpha],
            &ContainerMetadata::default(),
            None,
            &Options::new(),
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_key_check() {
        let options = Options::new();
        let key = Key::new(0x8899AABBCCDDEEFF);
        let data = create(&[video(frames(2, 0x400))], &ContainerMetadata::default(), Some(key), &options).unwrap();

        assert!(probe(&data, options).unwrap().encrypted);
        assert!(matches!(Container::parse(&data, None, options), Err(Error::KeyRequired)));
        assert!(matches!(
            Container::parse(&data, Some(Key::new(1)), options),
            Err(Error::DecryptionMismatch(_))
        ));
        assert!(Container::parse(&data, Some(key), options).is_ok());
    }

    #[test]
    fn test_reencrypt_keeps_layout() {
        let options = Options::new();
        let streams = [video(frames(3, 0x500)), audio(frames(3, 0x300))];
        let metadata = ContainerMetadata::default();
        let key = Key::new(0xDEADBEEF);

        let plain = create(&streams, &metadata, None, &options).unwrap();
        let encrypted = create(&streams, &metadata, Some(key), &options).unwrap();

        assert_eq!(reencrypt(&plain, None, Some(key), &options).unwrap(), encrypted);
        assert_eq!(reencrypt(&encrypted, Some(key), None, &options).unwrap(), plain);
        assert!(matches!(
            reencrypt(&encrypted, None, None, &options),
            Err(Error::KeyRequired)
        ));
    }

    #[test]
    fn test_to_bytes_round_trip() {
        let options = Options::new();
        let key = Key::new(42);
        let data = create(&[video(frames(2, 0x400))], &ContainerMetadata::default(), Some(key), &options).unwrap();
        let container = Container::parse(&data, Some(key), options).unwrap();
        assert_eq!(container.to_bytes(Some(key), &options).unwrap(), data);
    }

    #[test]
    fn test_not_usm() {
        assert!(matches!(
            probe(b"RIFF....", Options::new()),
            Err(Error::NotUsm(x)) if &x == b"RIFF"
        ));
    }
}
