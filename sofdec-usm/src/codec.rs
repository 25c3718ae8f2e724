use crate::{Error, Result, chunk::Signature};
use std::fmt;

/// Codec identity of a USM stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Codec {
    /// MPEG-1 video, `mpeg_codec` 1.
    Sofdec,
    /// `mpeg_codec` 5.
    H264,
    /// `mpeg_codec` 9.
    Vp9,
    /// `audio_codec` 2.
    Adx,
    /// `audio_codec` 4.
    Hca,
}

/// How a codec's frames may be split into pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Framing {
    /// Opaque frames, split into fixed-size slices only when too large.
    WholeFrame,
    /// Annex-B byte stream, split at NAL unit start codes.
    NalUnits,
}

impl Codec {
    /// Codec from a `VIDEO_HDRINFO` `mpeg_codec` value.
    pub fn from_video(mpeg_codec: i64) -> Result<Self> {
        match mpeg_codec {
            1 => Ok(Self::Sofdec),
            5 => Ok(Self::H264),
            9 => Ok(Self::Vp9),
            x => Err(Error::UnsupportedCodec(format!("video mpeg_codec {}", x))),
        }
    }

    /// Codec from an `AUDIO_HDRINFO` `audio_codec` value.
    pub fn from_audio(audio_codec: i64) -> Result<Self> {
        match audio_codec {
            2 => Ok(Self::Adx),
            4 => Ok(Self::Hca),
            x => Err(Error::UnsupportedCodec(format!("audio_codec {}", x))),
        }
    }

    /// Value stored in the `mpeg_codec` or `audio_codec` column.
    pub fn id(self) -> i8 {
        match self {
            Self::Sofdec => 1,
            Self::H264 => 5,
            Self::Vp9 => 9,
            Self::Adx => 2,
            Self::Hca => 4,
        }
    }

    /// `mpeg_dcprec` written for video codecs.
    pub fn dc_precision(self) -> i8 {
        match self {
            Self::H264 => 11,
            Self::Sofdec => 8,
            _ => 0,
        }
    }

    pub fn signature(self) -> Signature {
        if self.is_video() {
            Signature::Video
        } else {
            Signature::Audio
        }
    }

    pub fn is_video(self) -> bool {
        matches!(self, Self::Sofdec | Self::H264 | Self::Vp9)
    }

    pub fn framing(self) -> Framing {
        match self {
            Self::H264 => Framing::NalUnits,
            _ => Framing::WholeFrame,
        }
    }

    /// File extension of the extracted elementary stream.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Sofdec => "m1v",
            Self::H264 => "h264",
            Self::Vp9 => "ivf",
            Self::Adx => "adx",
            Self::Hca => "hca",
        }
    }

    /// Samples in one audio frame.
    pub fn samples_per_frame(self) -> Option<u32> {
        match self {
            Self::Hca => Some(1024),
            Self::Adx => Some(32),
            _ => None,
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sofdec => "MPEG-1",
            Self::H264 => "H.264",
            Self::Vp9 => "VP9",
            Self::Adx => "ADX",
            Self::Hca => "HCA",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_ids() {
        for codec in [Codec::Sofdec, Codec::H264, Codec::Vp9] {
            assert_eq!(Codec::from_video(codec.id().into()).unwrap(), codec);
        }

        for codec in [Codec::Adx, Codec::Hca] {
            assert_eq!(Codec::from_audio(codec.id().into()).unwrap(), codec);
        }

        assert!(matches!(Codec::from_video(3), Err(Error::UnsupportedCodec(_))));
        assert!(matches!(Codec::from_audio(9), Err(Error::UnsupportedCodec(_))));
    }
}
