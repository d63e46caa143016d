//! Binary form of a [`CodecImage`].
//!
//! Layout (little endian):
//!
//! ```text
//! magic "FTIM" | version u16 | flags u8 | root_occupancy u64 | name
//! rank count u32
//! per rank: id | extent u64 | format tag u8
//!           coord count u64 | coords u64...
//!           payload count u64 | (word tag u8, word u64)...
//! ```
//!
//! Strings are a u32 length followed by UTF-8 bytes. The whole buffer may be
//! wrapped in a zstd frame; [`decode_image`] detects this.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::encoder::{CodecError, CodecImage, PayloadWord, RankImage};
use crate::codec::format::FormatKind;
use crate::config::CodecConfig;

const MAGIC: &[u8; 4] = b"FTIM";
const VERSION: u16 = 1;
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Smallest encoding of one rank: empty id, extent, tag and two counts.
const MIN_RANK_BYTES: usize = 4 + 8 + 1 + 8 + 8;

const FLAG_CUMULATIVE: u8 = 0b1;
const WORD_VALUE: u8 = 0;
const WORD_POINTER: u8 = 1;

impl CodecImage {
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_slice(MAGIC);
        buf.put_u16_le(VERSION);
        buf.put_u8(if self.cumulative { FLAG_CUMULATIVE } else { 0 });
        buf.put_u64_le(self.root_occupancy as u64);
        put_str(&mut buf, &self.name);

        buf.put_u32_le(self.ranks.len() as u32);
        for (i, rank) in self.ranks.iter().enumerate() {
            put_str(&mut buf, &self.rank_ids[i]);
            buf.put_u64_le(self.shape[i] as u64);
            buf.put_u8(match self.formats[i] {
                FormatKind::Uncompressed => b'U',
                FormatKind::CoordinateList => b'C',
            });

            buf.put_u64_le(rank.coords.len() as u64);
            for &c in &rank.coords {
                buf.put_u64_le(c as u64);
            }

            buf.put_u64_le(rank.payloads.len() as u64);
            for word in &rank.payloads {
                match word {
                    PayloadWord::Value(v) => {
                        buf.put_u8(WORD_VALUE);
                        buf.put_f64_le(*v);
                    }
                    PayloadWord::Pointer(p) => {
                        buf.put_u8(WORD_POINTER);
                        buf.put_u64_le(*p);
                    }
                }
            }
        }
        buf.freeze()
    }

    pub fn from_bytes(mut buf: &[u8]) -> Result<Self, CodecError> {
        need(buf, 4)?;
        if &buf[..4] != MAGIC {
            return Err(CodecError::BadMagic);
        }
        buf.advance(4);
        need(buf, 2 + 1 + 8)?;
        let version = buf.get_u16_le();
        if version != VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let flags = buf.get_u8();
        let root_occupancy = buf.get_u64_le() as usize;
        let name = get_str(&mut buf)?;

        need(buf, 4)?;
        let rank_count = buf.get_u32_le() as usize;
        need(buf, rank_count.saturating_mul(MIN_RANK_BYTES))?;
        let mut rank_ids = Vec::with_capacity(rank_count);
        let mut shape = Vec::with_capacity(rank_count);
        let mut formats = Vec::with_capacity(rank_count);
        let mut ranks = Vec::with_capacity(rank_count);

        for _ in 0..rank_count {
            rank_ids.push(get_str(&mut buf)?);
            need(buf, 8 + 1)?;
            shape.push(buf.get_u64_le() as usize);
            formats.push(match buf.get_u8() {
                b'U' => FormatKind::Uncompressed,
                b'C' => FormatKind::CoordinateList,
                tag => return Err(CodecError::Corrupt(format!("unknown format tag {tag}"))),
            });

            need(buf, 8)?;
            let n = buf.get_u64_le() as usize;
            need(buf, n.saturating_mul(8))?;
            let coords = (0..n).map(|_| buf.get_u64_le() as usize).collect();

            need(buf, 8)?;
            let n = buf.get_u64_le() as usize;
            need(buf, n.saturating_mul(9))?;
            let mut payloads = Vec::with_capacity(n);
            for _ in 0..n {
                payloads.push(match buf.get_u8() {
                    WORD_VALUE => PayloadWord::Value(buf.get_f64_le()),
                    WORD_POINTER => PayloadWord::Pointer(buf.get_u64_le()),
                    tag => return Err(CodecError::Corrupt(format!("unknown word tag {tag}"))),
                });
            }
            ranks.push(RankImage { coords, payloads });
        }

        Ok(Self {
            name,
            rank_ids,
            shape,
            formats,
            cumulative: flags & FLAG_CUMULATIVE != 0,
            root_occupancy,
            ranks,
        })
    }
}

/// Serialize an image, zstd-compressing it when the config asks for it.
pub fn encode_image(image: &CodecImage, config: &CodecConfig) -> Result<Vec<u8>, CodecError> {
    let raw = image.to_bytes();
    if config.compress_image {
        Ok(zstd::encode_all(raw.as_ref(), config.zstd_level)?)
    } else {
        Ok(raw.to_vec())
    }
}

/// Parse an image written by [`encode_image`], compressed or not.
pub fn decode_image(data: &[u8]) -> Result<CodecImage, CodecError> {
    if data.starts_with(&ZSTD_MAGIC) {
        let raw = zstd::decode_all(data)?;
        CodecImage::from_bytes(&raw)
    } else {
        CodecImage::from_bytes(data)
    }
}

fn need(buf: &[u8], n: usize) -> Result<(), CodecError> {
    if buf.remaining() < n {
        return Err(CodecError::Corrupt(format!(
            "needed {n} bytes, {} left",
            buf.remaining()
        )));
    }
    Ok(())
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn get_str(buf: &mut &[u8]) -> Result<String, CodecError> {
    need(*buf, 4)?;
    let len = buf.get_u32_le() as usize;
    need(*buf, len)?;
    let s = String::from_utf8(buf[..len].to_vec())
        .map_err(|e| CodecError::Corrupt(format!("bad string: {e}")))?;
    buf.advance(len);
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encoder::Codec;
    use crate::fiber::{Fiber, Tensor};

    fn image() -> CodecImage {
        let root = Fiber::from_dense_rows(&[
            vec![1.0, 0.0, 2.5],
            vec![0.0, 0.0, 0.0],
            vec![0.0, 3.0, 0.0],
        ]);
        let t = Tensor::new("A", vec!["M".into(), "K".into()], vec![3, 3], root).unwrap();
        Codec::new(
            vec![FormatKind::Uncompressed, FormatKind::CoordinateList],
            CodecConfig::default(),
        )
        .encode(&t)
        .unwrap()
    }

    #[test]
    fn test_binary_image_preserves_buffers() {
        let image = image();
        let parsed = CodecImage::from_bytes(&image.to_bytes()).unwrap();
        assert_eq!(parsed, image);
    }

    #[test]
    fn test_compressed_image() {
        let config = CodecConfig {
            compress_image: true,
            ..Default::default()
        };
        let data = encode_image(&image(), &config).unwrap();
        assert!(data.starts_with(&ZSTD_MAGIC));
        assert_eq!(decode_image(&data).unwrap(), image());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            CodecImage::from_bytes(b"NOPE"),
            Err(CodecError::BadMagic)
        ));
        let mut bytes = image().to_bytes().to_vec();
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(
            CodecImage::from_bytes(&bytes),
            Err(CodecError::Corrupt(_))
        ));
    }

    #[test]
    fn test_rejects_rank_count_past_end() {
        let image = image();
        let mut bytes = image.to_bytes().to_vec();
        // The rank count follows magic, version, flags, occupancy and name.
        let at = 4 + 2 + 1 + 8 + 4 + image.name.len();
        bytes[at..at + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            CodecImage::from_bytes(&bytes),
            Err(CodecError::Corrupt(_))
        ));
    }
}
