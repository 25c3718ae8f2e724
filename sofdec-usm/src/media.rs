//! Elementary streams going into or coming out of a USM container.
//!
//! The container never decodes frames. The readers here only find frame
//! boundaries and keyframes in the formats Sofdec streams are usually
//! prepared in: IVF files holding VP9, H.264 Annex-B byte streams and HCA
//! files. Concatenating the frames of a stream always reproduces its input.

/*
    REFERENCES
    ----------

    1. https://wiki.multimedia.cx/index.php/Duck_IVF
    2. https://storage.googleapis.com/downloads.webmproject.org/docs/vp9/vp9-bitstream-specification-v0.6-20160331-draft.pdf (6.2)
    3. https://www.itu.int/rec/T-REC-H.264 (7.3.1, B.1)
    4. https://github.com/vgmstream/vgmstream/blob/master/src/coding/hca_decoder_clhca.c
*/

use crate::{Error, Result, chunk::Signature, codec::Codec, page};
use bitstream_io::{BigEndian, BitRead, BitReader, ByteRead, ByteReader, LittleEndian};
use std::io::{self, Cursor};

const IVF_SIGNATURE: &[u8; 4] = b"DKIF";
const IVF_FRAME_HEADER_SIZE: usize = 12;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub keyframe: bool,
}

impl Frame {
    pub fn new(data: Vec<u8>, keyframe: bool) -> Self {
        Self { data, keyframe }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub framerate_n: u32,
    pub framerate_d: u32,
}

impl VideoParams {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self {
            width,
            height,
            framerate_n: (fps * 1000.0).round() as u32,
            framerate_d: 1000,
        }
    }

    pub fn fps(&self) -> f64 {
        if self.framerate_d == 0 {
            return 0.0;
        }

        self.framerate_n as f64 / self.framerate_d as f64
    }

    /// Frame rate as written in stream chunk headers.
    pub fn frame_rate_x100(&self) -> u32 {
        (self.fps() * 100.0).round() as u32
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AudioParams {
    pub sampling_rate: u32,
    pub num_channels: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamParams {
    Video(VideoParams),
    Audio(AudioParams),
}

/// Frames of one elementary stream, the unit a container is built from.
#[derive(Clone, Debug, PartialEq)]
pub struct ElementaryStream {
    pub codec: Codec,
    pub channel: u8,
    /// Source file name written to the stream directory.
    pub filename: String,
    pub params: StreamParams,
    pub frames: Vec<Frame>,
    /// Alpha plane of a video stream, carried in `@ALP` chunks.
    pub alpha: bool,
}

impl ElementaryStream {
    pub fn video(codec: Codec, params: VideoParams, frames: Vec<Frame>) -> Self {
        Self {
            codec,
            channel: 0,
            filename: String::new(),
            params: StreamParams::Video(params),
            frames,
            alpha: false,
        }
    }

    pub fn audio(codec: Codec, params: AudioParams, frames: Vec<Frame>) -> Self {
        Self {
            codec,
            channel: 0,
            filename: String::new(),
            params: StreamParams::Audio(params),
            frames,
            alpha: false,
        }
    }

    pub fn channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    pub fn signature(&self) -> Signature {
        if self.alpha {
            Signature::Alpha
        } else {
            self.codec.signature()
        }
    }

    /// Indices of keyframes.
    pub fn keyframes(&self) -> Vec<usize> {
        self.frames
            .iter()
            .enumerate()
            .filter(|(_, x)| x.keyframe)
            .map(|(i, _)| i)
            .collect()
    }

    /// Total bytes of all frames.
    pub fn data_len(&self) -> usize {
        self.frames.iter().map(|x| x.data.len()).sum()
    }

    /// Read a VP9 stream from an IVF file.
    ///
    /// The first frame carries the 32 byte file header and every frame its own
    /// 12 byte frame header.
    pub fn from_ivf(data: &[u8]) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidInput(format!("ivf: {}", reason));

        if data.len() < 32 || &data[..4] != IVF_SIGNATURE {
            return Err(invalid("missing DKIF header"));
        }

        let mut reader = ByteReader::endian(Cursor::new(&data[4..32]), LittleEndian);
        let eof = |_: io::Error| invalid("header is truncated");
        let _version = reader.read::<u16>().map_err(eof)?;
        let header_size = reader.read::<u16>().map_err(eof)? as usize;
        let mut fourcc = [0; 4];
        reader.read_bytes(&mut fourcc).map_err(eof)?;
        let width = reader.read::<u16>().map_err(eof)? as u32;
        let height = reader.read::<u16>().map_err(eof)? as u32;
        let rate = reader.read::<u32>().map_err(eof)?;
        let scale = reader.read::<u32>().map_err(eof)?;

        if &fourcc != b"VP90" {
            return Err(Error::UnsupportedCodec(format!(
                "ivf fourcc {}",
                String::from_utf8_lossy(&fourcc)
            )));
        }

        if header_size < 32 || header_size > data.len() {
            return Err(invalid("bad header size"));
        }

        let mut frames = vec![];
        let mut start = 0;
        let mut position = header_size;

        while position < data.len() {
            if position + IVF_FRAME_HEADER_SIZE > data.len() {
                return Err(invalid("frame header is truncated"));
            }

            let size = u32::from_le_bytes([
                data[position],
                data[position + 1],
                data[position + 2],
                data[position + 3],
            ]) as usize;
            let payload = position + IVF_FRAME_HEADER_SIZE;

            if payload + size > data.len() {
                return Err(invalid("frame is truncated"));
            }

            let keyframe = vp9_keyframe(&data[payload..payload + size]);
            frames.push(Frame::new(data[start..payload + size].to_vec(), keyframe));
            start = payload + size;
            position = start;
        }

        if frames.is_empty() {
            return Err(invalid("no frames"));
        }

        let params = VideoParams {
            width,
            height,
            framerate_n: rate,
            framerate_d: scale,
        };
        log::debug!(
            "ivf: {}x{} at {:.3} fps, {} frames",
            width,
            height,
            params.fps(),
            frames.len()
        );
        Ok(Self::video(Codec::Vp9, params, frames))
    }

    /// Split an H.264 Annex-B byte stream into access units.
    ///
    /// Dimensions and frame rate are not parsed from the stream, they come
    /// from `params`.
    pub fn from_annexb(data: &[u8], params: VideoParams) -> Result<Self> {
        let units = page::nal_boundaries(data);
        let mut frames: Vec<Frame> = vec![];
        let mut start = 0;
        let mut has_slice = false;
        let mut keyframe = false;

        for (i, &unit_start) in units.iter().enumerate() {
            let unit_end = units.get(i + 1).copied().unwrap_or(data.len());
            let Some((nal_type, first_slice)) = nal_info(&data[unit_start..unit_end]) else {
                continue;
            };
            let is_slice = (1..=5).contains(&nal_type);
            let starts_unit = matches!(nal_type, 6..=9 | 14..=18) || (is_slice && first_slice);

            if has_slice && starts_unit {
                frames.push(Frame::new(data[start..unit_start].to_vec(), keyframe));
                start = unit_start;
                has_slice = false;
                keyframe = false;
            }

            has_slice |= is_slice;
            keyframe |= nal_type == 5;
        }

        if start < data.len() {
            frames.push(Frame::new(data[start..].to_vec(), keyframe));
        }

        if frames.iter().all(|x| x.data.is_empty()) {
            return Err(Error::InvalidInput("h264: no access units".to_owned()));
        }

        Ok(Self::video(Codec::H264, params, frames))
    }

    /// Read an HCA file. The header is the first frame, followed by one
    /// frame per block.
    pub fn from_hca(data: &[u8]) -> Result<Self> {
        let header = HcaHeader::parse(data)?;
        let mut frames = vec![Frame::new(data[..header.size].to_vec(), false)];
        frames.extend(
            data[header.size..]
                .chunks(header.block_size)
                .map(|x| Frame::new(x.to_vec(), false)),
        );

        if frames.len() - 1 != header.block_count as usize {
            log::warn!(
                "hca: header declares {} blocks but {} are present",
                header.block_count,
                frames.len() - 1
            );
        }

        Ok(Self::audio(
            Codec::Hca,
            AudioParams {
                sampling_rate: header.sample_rate,
                num_channels: header.channels,
            },
            frames,
        ))
    }
}

/// NAL unit type and whether a slice starts a new picture
/// (`first_mb_in_slice` is 0).
fn nal_info(unit: &[u8]) -> Option<(u8, bool)> {
    let header = if unit.starts_with(&[0, 0, 1]) {
        3
    } else if unit.starts_with(&[0, 0, 0, 1]) {
        4
    } else {
        return None;
    };
    let nal_type = unit.get(header)? & 0x1F;
    let first_slice = unit.get(header + 1).is_some_and(|x| x & 0x80 != 0);
    Some((nal_type, first_slice))
}

/// True when a VP9 frame is a keyframe, from its uncompressed header.
fn vp9_keyframe(frame: &[u8]) -> bool {
    vp9_frame_type(frame).unwrap_or(false)
}

fn vp9_frame_type(frame: &[u8]) -> io::Result<bool> {
    let mut reader = BitReader::endian(Cursor::new(frame), BigEndian);

    if reader.read::<u8>(2)? != 2 {
        return Ok(false);
    }

    let low = reader.read_bit()? as u8;
    let high = reader.read_bit()? as u8;

    if (high << 1 | low) == 3 {
        reader.skip(1)?;
    }

    // show_existing_frame
    if reader.read_bit()? {
        return Ok(false);
    }

    // frame_type, 0 is KEY_FRAME
    Ok(!reader.read_bit()?)
}

struct HcaHeader {
    size: usize,
    channels: u32,
    sample_rate: u32,
    block_count: u32,
    block_size: usize,
}

impl HcaHeader {
    fn parse(data: &[u8]) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidInput(format!("hca: {}", reason));

        if data.len() < 8 || tag(&data[..4]) != *b"HCA\0" {
            return Err(invalid("missing HCA header"));
        }

        let size = u16::from_be_bytes([data[6], data[7]]) as usize;

        if size < 8 || size > data.len() {
            return Err(invalid("bad header size"));
        }

        let mut fmt = None;
        let mut block_size = None;
        let mut position = 8;

        while position + 4 <= size && (fmt.is_none() || block_size.is_none()) {
            let body = &data[position + 4..size];

            match &tag(&data[position..position + 4]) {
                b"fmt\0" if body.len() >= 8 => {
                    let channels = body[0] as u32;
                    let sample_rate = u32::from_be_bytes([0, body[1], body[2], body[3]]);
                    let block_count = u32::from_be_bytes([body[4], body[5], body[6], body[7]]);
                    fmt = Some((channels, sample_rate, block_count));
                    position += 16;
                }
                b"comp" if body.len() >= 2 => {
                    block_size = Some(u16::from_be_bytes([body[0], body[1]]) as usize);
                    position += 16;
                }
                b"dec\0" if body.len() >= 2 => {
                    block_size = Some(u16::from_be_bytes([body[0], body[1]]) as usize);
                    position += 12;
                }
                _ => break,
            }
        }

        let (channels, sample_rate, block_count) = fmt.ok_or_else(|| invalid("missing fmt chunk"))?;
        let block_size = block_size
            .filter(|&x| x > 0)
            .ok_or_else(|| invalid("missing comp or dec chunk"))?;

        Ok(Self {
            size,
            channels,
            sample_rate,
            block_count,
            block_size,
        })
    }
}

// Encrypted HCA files set the high bit of every tag byte.
fn tag(bytes: &[u8]) -> [u8; 4] {
    [bytes[0] & 0x7F, bytes[1] & 0x7F, bytes[2] & 0x7F, bytes[3] & 0x7F]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ivf(frames: &[&[u8]]) -> Vec<u8> {
        let mut data = b"DKIF".to_vec();
        data.extend(0u16.to_le_bytes());
        data.extend(32u16.to_le_bytes());
        data.extend(b"VP90");
        data.extend(640u16.to_le_bytes());
        data.extend(360u16.to_le_bytes());
        data.extend(30u32.to_le_bytes());
        data.extend(1u32.to_le_bytes());
        data.extend((frames.len() as u32).to_le_bytes());
        data.extend([0; 4]);

        for (i, frame) in frames.iter().enumerate() {
            data.extend((frame.len() as u32).to_le_bytes());
            data.extend((i as u64).to_le_bytes());
            data.extend(*frame);
        }

        data
    }

    #[test]
    fn test_ivf_frames() {
        // 0b10_0_0_0_0: keyframe, 0b10_0_0_0_1: inter frame
        let data = ivf(&[&[0x80, 1, 2], &[0x84, 3], &[0x80]]);
        let stream = ElementaryStream::from_ivf(&data).unwrap();

        assert_eq!(stream.codec, Codec::Vp9);
        assert_eq!(stream.frames.len(), 3);
        assert_eq!(stream.frames[0].data.len(), 32 + 12 + 3);
        assert_eq!(stream.keyframes(), vec![0, 2]);
        assert_eq!(stream.params, StreamParams::Video(VideoParams {
            width: 640,
            height: 360,
            framerate_n: 30,
            framerate_d: 1,
        }));

        let joined: Vec<u8> = stream.frames.iter().flat_map(|x| x.data.clone()).collect();
        assert_eq!(joined, data);
    }

    #[test]
    fn test_ivf_truncated() {
        let data = ivf(&[&[0x80, 1, 2]]);
        assert!(ElementaryStream::from_ivf(&data[..data.len() - 1]).is_err());
    }

    #[test]
    fn test_vp9_show_existing_frame() {
        assert!(!vp9_keyframe(&[0x88]));
        assert!(!vp9_keyframe(&[]));
    }

    #[test]
    fn test_annexb_access_units() {
        let mut data = vec![];
        data.extend([0, 0, 0, 1, 0x09, 0xF0]); // AUD
        data.extend([0, 0, 0, 1, 0x67, 0x42]); // SPS
        data.extend([0, 0, 0, 1, 0x68, 0xCE]); // PPS
        data.extend([0, 0, 1, 0x65, 0x88, 0x11]); // IDR slice
        data.extend([0, 0, 0, 1, 0x09, 0xF0]); // AUD
        data.extend([0, 0, 1, 0x41, 0x9A, 0x22]); // P slice
        data.extend([0, 0, 1, 0x41, 0x9B, 0x33]); // P slice, next picture

        let params = VideoParams::new(1280, 720, 29.97);
        let stream = ElementaryStream::from_annexb(&data, params).unwrap();

        assert_eq!(stream.frames.len(), 3);
        assert_eq!(stream.frames[0].data.len(), 24);
        assert_eq!(stream.keyframes(), vec![0]);
        assert_eq!(params.frame_rate_x100(), 2997);

        let joined: Vec<u8> = stream.frames.iter().flat_map(|x| x.data.clone()).collect();
        assert_eq!(joined, data);
    }

    fn hca(blocks: usize, block_size: u16) -> Vec<u8> {
        let mut data = vec![b'H' | 0x80, b'C' | 0x80, b'A' | 0x80, 0];
        data.extend(0x0200u16.to_be_bytes());
        data.extend(0x0028u16.to_be_bytes());
        data.extend(b"fmt\0");
        data.extend([2, 0x00, 0xBB, 0x80]);
        data.extend((blocks as u32).to_be_bytes());
        data.extend([0; 4]);
        data.extend(b"comp");
        data.extend(block_size.to_be_bytes());
        data.extend([0; 10]);
        data.resize(0x28, 0);

        for i in 0..blocks {
            data.extend(std::iter::repeat_n(i as u8, block_size as usize));
        }

        data
    }

    #[test]
    fn test_hca_blocks() {
        let data = hca(3, 0x100);
        let stream = ElementaryStream::from_hca(&data).unwrap();

        assert_eq!(stream.frames.len(), 4);
        assert_eq!(stream.frames[0].data.len(), 0x28);
        assert_eq!(stream.frames[3].data, vec![2; 0x100]);
        assert_eq!(
            stream.params,
            StreamParams::Audio(AudioParams {
                sampling_rate: 48000,
                num_channels: 2,
            })
        );
    }

    #[test]
    fn test_hca_missing_fmt() {
        let mut data = hca(1, 0x10);
        data[8..12].copy_from_slice(b"xxxx");
        assert!(matches!(
            ElementaryStream::from_hca(&data),
            Err(Error::InvalidInput(_))
        ));
    }
}
