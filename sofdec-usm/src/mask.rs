//! Key-derived payload masking.
//!
//! | Chunk        | Cipher | Masked range            |
//! |--------------|--------|-------------------------|
//! | `@SFV` `@ALP` | video  | `0x40..` (payload ≥ 0x240) |
//! | `@SFA`       | audio  | `0x140..`               |
//! | others       | none   | -                       |
//!
//! Only stream payloads are ever masked. Header, section end and metadata
//! payloads are stored in the clear, whatever the chunk kind.

use crate::{Error, chunk::Signature};
use std::{fmt, str::FromStr};

const VIDEO_MASK_SIZE: usize = 0x40;
const AUDIO_MASK_SIZE: usize = 0x20;
const VIDEO_OFFSET: usize = 0x40;
const VIDEO_MIN_SIZE: usize = 0x240;
const AUDIO_OFFSET: usize = 0x140;

/// A 64-bit USM key.
///
/// # Example
///
/// ```
/// use sofdec_usm::Key;
///
/// let key: Key = "0x00112233445566778899AABBCCDDEEFF".parse().unwrap();
/// assert_eq!(key.value(), 0x8899AABBCCDDEEFF);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Key(u64);

impl Key {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn masks(&self) -> Masks {
        Masks::derive(*self)
    }
}

impl From<u64> for Key {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Parses up to 32 hex digits with an optional `0x` prefix. Anything wider
/// than 16 digits keeps only the low 64 bits.
impl FromStr for Key {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim();
        let digits = digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
            .unwrap_or(digits);

        if digits.is_empty() || digits.len() > 32 {
            return Err(Error::InvalidInput(format!(
                "key {:?} must be 1 to 32 hex digits",
                s
            )));
        }

        u128::from_str_radix(digits, 16)
            .map(|x| Self(x as u64))
            .map_err(|_| Error::InvalidInput(format!("key {:?} is not hexadecimal", s)))
    }
}

/// Video and audio masks derived from a [`Key`].
#[derive(Clone, PartialEq, Eq)]
pub struct Masks {
    video: [u8; VIDEO_MASK_SIZE],
    audio: [u8; AUDIO_MASK_SIZE],
}

impl fmt::Debug for Masks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Masks")
            .field("video", &hex::encode(self.video))
            .field("audio", &hex::encode(self.audio))
            .finish()
    }
}

impl Masks {
    pub fn derive(key: Key) -> Self {
        let c = key.value().to_le_bytes();
        let mut k = [0u8; 0x20];

        k[0x00] = c[0];
        k[0x01] = c[1];
        k[0x02] = c[2];
        k[0x03] = c[3].wrapping_sub(0x34);
        k[0x04] = c[4].wrapping_add(0xF9);
        k[0x05] = c[5] ^ 0x13;
        k[0x06] = c[6].wrapping_add(0x61);
        k[0x07] = k[0x00] ^ 0xFF;
        k[0x08] = k[0x01].wrapping_add(k[0x02]);
        k[0x09] = k[0x01].wrapping_sub(k[0x07]);
        k[0x0A] = k[0x02] ^ 0xFF;
        k[0x0B] = k[0x01] ^ 0xFF;
        k[0x0C] = k[0x0B].wrapping_add(k[0x09]);
        k[0x0D] = k[0x08].wrapping_sub(k[0x03]);
        k[0x0E] = k[0x0D] ^ 0xFF;
        k[0x0F] = k[0x0A].wrapping_sub(k[0x0B]);
        k[0x10] = k[0x08].wrapping_sub(k[0x0F]);
        k[0x11] = k[0x10] ^ k[0x07];
        k[0x12] = k[0x0F] ^ 0xFF;
        k[0x13] = k[0x03] ^ 0x10;
        k[0x14] = k[0x04].wrapping_sub(0x32);
        k[0x15] = k[0x05].wrapping_add(0xED);
        k[0x16] = k[0x06] ^ 0xF3;
        k[0x17] = k[0x13].wrapping_sub(k[0x0F]);
        k[0x18] = k[0x15].wrapping_add(k[0x07]);
        k[0x19] = 0x21u8.wrapping_sub(k[0x13]);
        k[0x1A] = k[0x14] ^ k[0x17];
        k[0x1B] = k[0x16].wrapping_add(k[0x16]);
        k[0x1C] = k[0x17].wrapping_add(0x44);
        k[0x1D] = k[0x03].wrapping_add(k[0x04]);
        k[0x1E] = k[0x05].wrapping_sub(k[0x16]);
        k[0x1F] = k[0x1D] ^ k[0x13];

        let mut video = [0u8; VIDEO_MASK_SIZE];
        let mut audio = [0u8; AUDIO_MASK_SIZE];

        for i in 0..0x20 {
            video[i] = k[i];
            video[0x20 + i] = k[i] ^ 0xFF;
            audio[i] = if i % 2 != 0 {
                b"URUC"[(i >> 1) % 4]
            } else {
                k[i] ^ 0xFF
            };
        }

        Self { video, audio }
    }

    pub fn video(&self) -> &[u8; VIDEO_MASK_SIZE] {
        &self.video
    }

    pub fn audio(&self) -> &[u8; AUDIO_MASK_SIZE] {
        &self.audio
    }

    /// Non-zero fingerprint of the masks, recorded in the `CRID` chunk header.
    pub fn check_value(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.video);
        hasher.update(&self.audio);
        hasher.finalize().max(1)
    }

    pub fn encrypt(&self, signature: Signature, payload: &mut [u8]) {
        match Cipher::for_signature(signature) {
            Cipher::Video => encrypt_video(&self.video, payload),
            Cipher::Audio => crypt_audio(&self.audio, payload),
            Cipher::None => {}
        }
    }

    pub fn decrypt(&self, signature: Signature, payload: &mut [u8]) {
        match Cipher::for_signature(signature) {
            Cipher::Video => decrypt_video(&self.video, payload),
            Cipher::Audio => crypt_audio(&self.audio, payload),
            Cipher::None => {}
        }
    }
}

/// Which mask a chunk's stream payloads are masked with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cipher {
    Video,
    Audio,
    None,
}

impl Cipher {
    pub fn for_signature(signature: Signature) -> Self {
        match signature {
            Signature::Video | Signature::Alpha => Self::Video,
            Signature::Audio => Self::Audio,
            Signature::Crid | Signature::Cue | Signature::Subtitle => Self::None,
        }
    }
}

fn decrypt_video(mask: &[u8; VIDEO_MASK_SIZE], data: &mut [u8]) {
    if data.len() < VIDEO_MIN_SIZE {
        return;
    }

    let size = data.len() - VIDEO_OFFSET;
    let mut rolling = *mask;

    for i in 0x100..size {
        let m = 0x20 + i % 0x20;
        data[VIDEO_OFFSET + i] ^= rolling[m];
        rolling[m] = data[VIDEO_OFFSET + i] ^ mask[m];
    }

    for i in 0..0x100 {
        rolling[i % 0x20] ^= data[0x140 + i];
        data[VIDEO_OFFSET + i] ^= rolling[i % 0x20];
    }
}

fn encrypt_video(mask: &[u8; VIDEO_MASK_SIZE], data: &mut [u8]) {
    if data.len() < VIDEO_MIN_SIZE {
        return;
    }

    let size = data.len() - VIDEO_OFFSET;
    let mut rolling = *mask;

    for i in 0..0x100 {
        rolling[i % 0x20] ^= data[0x140 + i];
        data[VIDEO_OFFSET + i] ^= rolling[i % 0x20];
    }

    for i in 0x100..size {
        let m = 0x20 + i % 0x20;
        let plain = data[VIDEO_OFFSET + i];
        data[VIDEO_OFFSET + i] ^= rolling[m];
        rolling[m] = plain ^ mask[m];
    }
}

fn crypt_audio(mask: &[u8; AUDIO_MASK_SIZE], data: &mut [u8]) {
    for (i, byte) in data.iter_mut().enumerate().skip(AUDIO_OFFSET) {
        *byte ^= mask[i % AUDIO_MASK_SIZE];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(size: usize) -> Vec<u8> {
        (0..size).map(|x| (x * 7 + 3) as u8).collect()
    }

    #[test]
    fn test_key_parsing() {
        assert_eq!("0x1234".parse::<Key>().unwrap().value(), 0x1234);
        assert_eq!("ABCDEF".parse::<Key>().unwrap().value(), 0xABCDEF);
        assert_eq!(
            "0x00112233445566778899AABBCCDDEEFF".parse::<Key>().unwrap(),
            Key::new(0x8899AABBCCDDEEFF)
        );
        assert!("0x".parse::<Key>().is_err());
        assert!("xyz".parse::<Key>().is_err());
        assert!("1".repeat(33).parse::<Key>().is_err());
    }

    #[test]
    fn test_derive_zero_key() {
        let masks = Masks::derive(Key::new(0));
        assert_eq!(masks.video()[0x03], 0xCC);
        assert_eq!(masks.video()[0x07], 0xFF);
        assert_eq!(masks.video()[0x27], 0x00);
        assert_eq!(&masks.audio()[..4], &[0xFF, b'U', 0xFF, b'R']);
    }

    #[test]
    fn test_derive_is_pure() {
        let key = Key::new(0x8899AABBCCDDEEFF);
        assert_eq!(Masks::derive(key), Masks::derive(key));
        assert_ne!(Masks::derive(key), Masks::derive(Key::new(1)));
        assert_ne!(Masks::derive(key).check_value(), 0);
    }

    #[test]
    fn test_video_inverse() {
        let masks = Key::new(0x8899AABBCCDDEEFF).masks();

        for size in [0, 0x23F, 0x240, 0x241, 0x1000, 0x1234] {
            let plain = payload(size);
            let mut data = plain.clone();
            masks.encrypt(Signature::Video, &mut data);

            if size >= 0x240 {
                assert_ne!(data, plain);
                assert_eq!(&data[..0x40], &plain[..0x40]);
            } else {
                assert_eq!(data, plain);
            }

            masks.decrypt(Signature::Video, &mut data);
            assert_eq!(data, plain);
        }
    }

    #[test]
    fn test_audio_involution() {
        let masks = Key::new(0xDEADBEEF).masks();
        let plain = payload(0x400);
        let mut data = plain.clone();
        masks.encrypt(Signature::Audio, &mut data);
        assert_eq!(&data[..0x140], &plain[..0x140]);
        assert_ne!(&data[0x140..], &plain[0x140..]);
        masks.encrypt(Signature::Audio, &mut data);
        assert_eq!(data, plain);
    }

    #[test]
    fn test_unmasked_signatures() {
        let masks = Key::new(0xDEADBEEF).masks();
        let plain = payload(0x400);

        for signature in [Signature::Crid, Signature::Cue, Signature::Subtitle] {
            let mut data = plain.clone();
            masks.encrypt(signature, &mut data);
            assert_eq!(data, plain);
        }
    }
}
