//! Error types for USM parsing, building and decryption.

use thiserror::Error;

/// Errors that can occur while reading or writing a USM container.
#[derive(Debug, Error)]
pub enum Error {
    /// An `@UTF` table is inconsistent with its buffer.
    #[error("malformed @UTF table: {0}")]
    MalformedTable(String),

    /// A chunk starts with a signature outside the recognized set.
    #[error("unknown chunk signature {} at offset {offset:#x}", hex::encode(.signature))]
    UnknownSignature { signature: [u8; 4], offset: usize },

    /// A chunk declares more bytes than the buffer holds, or inconsistent sizes.
    #[error("truncated chunk at offset {offset:#x}: needs {needed} bytes but {available} are left")]
    TruncatedChunk {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// A stream ended while a fragmented frame was still open.
    #[error("incomplete frame in {stream}: stream ended after {pages} continuation page(s)")]
    IncompleteFrame { stream: String, pages: usize },

    /// A stream uses a codec identity this crate does not handle.
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// Decoding failed in a way consistent with a wrong or missing key.
    #[error("decryption mismatch (wrong key?): {0}")]
    DecryptionMismatch(String),

    /// The file is flagged as encrypted but no key was supplied.
    #[error("file is encrypted, a key is required - use --key")]
    KeyRequired,

    /// The buffer does not start with a `CRID` chunk.
    #[error("not a USM file: expected CRID signature, found {}", hex::encode(.0))]
    NotUsm([u8; 4]),

    /// A table the container needs is absent.
    #[error("missing table: {0}")]
    MissingTable(String),

    /// Caller supplied data that cannot be written.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Returns true if the error comes from decoding payload bytes, the class of
    /// failures a wrong key produces.
    pub fn is_decode_err(&self) -> bool {
        matches!(
            self,
            Self::MalformedTable(_) | Self::IncompleteFrame { .. } | Self::TruncatedChunk { .. }
        )
    }
}
