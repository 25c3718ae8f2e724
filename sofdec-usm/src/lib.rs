#![cfg_attr(docsrs, feature(doc_cfg))]

//! This crate reads and writes CRI Sofdec USM containers, the movie format of
//! many console and mobile games.
//!
//! It has the pieces needed for the whole round trip: the `@UTF` table codec,
//! the key-derived payload masks, the chunk codec, page muxing and the
//! [`probe`], [`extract`], [`create`] and [`reencrypt`] entry points.
//!
//! # Example
//!
//! ```
//! use sofdec_usm::{ContainerMetadata, Codec, ElementaryStream, Frame, Key, Options, VideoParams};
//!
//! let frames = vec![Frame::new(vec![0xAA; 10], true)];
//! let video = ElementaryStream::video(Codec::Vp9, VideoParams::new(64, 64, 30.0), frames);
//! let key = Key::new(0x00112233_44556677);
//!
//! let data = sofdec_usm::create(&[video], &ContainerMetadata::new("demo.usm"), Some(key), &Options::new()).unwrap();
//! let extracted = sofdec_usm::extract(&data, Some(key), Options::new()).unwrap();
//! assert_eq!(extracted.streams[0].frames[0].data, vec![0xAA; 10]);
//! ```
//!
//! # Optional Features
//!
//! The following are a list of [Cargo features](https://doc.rust-lang.org/stable/cargo/reference/features.html#the-features-section) that can be
//! enabled or disabled:
//!
//! - **serde**: Derives `Serialize` for tables and probe summaries.

mod chunk;
mod codec;
mod container;
mod error;
mod mask;
mod media;
mod options;
mod page;
mod reader;
mod table;

pub use chunk::{Chunk, ChunkReader, Padding, Payload, PayloadType, Signature, write_chunk};
pub use codec::{Codec, Framing};
pub use container::{
    AUDIO_HEADER_TABLE, Container, ContainerMetadata, DIRECTORY_TABLE, Extracted, FORMAT_VERSION,
    SEEK_TABLE, Stream, StreamId, StreamSummary, Summary, VIDEO_HEADER_TABLE, create, extract,
    probe, reencrypt,
};
pub use error::Error;
pub use mask::{Cipher, Key, Masks};
pub use media::{AudioParams, ElementaryStream, Frame, StreamParams, VideoParams};
pub use options::{DEFAULT_MAX_PAGE_SIZE, Options};
pub use page::{Demuxer, Frames, Page, mux_frame};
pub use reader::Reader;
pub use table::{Column, ElementType, Storage, Table, Value};

/// A `Result` alias where the `Err` case is `sofdec_usm::Error`.
pub type Result<T> = std::result::Result<T, Error>;
