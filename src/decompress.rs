//! Response body decompression.
//!
//! Wire bytes go in, decoded bytes come out, one bounded step at a time. A step consumes what
//! the codec can take without producing more than its internal buffer holds, so a small
//! compressed body can't blow up into one huge allocation. [`Decompressor::finish`] drains what
//! is left at the end of the body.

use std::io::{self, Write};

use flate2::write::{DeflateDecoder, GzDecoder, ZlibDecoder};

use crate::transaction::ContentEncoding;

/// First byte of a zlib stream using the deflate method with a 32K window.
const ZLIB_CMF: u8 = 0x78;

pub(crate) struct Decompressor {
    encoding: ContentEncoding,
    codec: Option<Codec>,
    seen_data: bool,
}

enum Codec {
    Gzip(GzDecoder<Vec<u8>>),
    Zlib(ZlibDecoder<Vec<u8>>),
    Raw(DeflateDecoder<Vec<u8>>),
}

/// Outcome of one [`Decompressor::step`].
#[derive(Debug)]
pub(crate) struct Decoded {
    /// Input bytes used. Zero for non-empty input means the compressed stream has ended.
    pub consumed: usize,
    pub output: Vec<u8>,
}

impl Decompressor {
    /// A decompressor for `encoding`, if it is one we can decode.
    pub fn new(encoding: ContentEncoding) -> Option<Self> {
        let codec = match encoding {
            ContentEncoding::Gzip => Some(Codec::Gzip(GzDecoder::new(Vec::new()))),
            // Chosen once the first byte is seen.
            ContentEncoding::Deflate => None,
            _ => return None,
        };
        Some(Decompressor {
            encoding,
            codec,
            seen_data: false,
        })
    }

    pub fn encoding(&self) -> ContentEncoding {
        self.encoding
    }

    /// Feed some of `data` to the codec.
    pub fn step(&mut self, data: &[u8]) -> io::Result<Decoded> {
        let Some(&first) = data.first() else {
            return Ok(Decoded {
                consumed: 0,
                output: Vec::new(),
            });
        };
        self.seen_data = true;

        // "deflate" is zlib wrapped according to RFC 2616, but plenty of servers send raw deflate.
        let codec = self.codec.get_or_insert_with(|| {
            if first == ZLIB_CMF {
                Codec::Zlib(ZlibDecoder::new(Vec::new()))
            } else {
                Codec::Raw(DeflateDecoder::new(Vec::new()))
            }
        });

        let consumed = codec.write(data)?;
        Ok(Decoded {
            consumed,
            output: codec.take_output(),
        })
    }

    /// Complete the stream, returning any buffered output.
    pub fn finish(&mut self) -> io::Result<Vec<u8>> {
        if !self.seen_data {
            return Ok(Vec::new());
        }
        match &mut self.codec {
            Some(codec) => codec.finish(),
            None => Ok(Vec::new()),
        }
    }
}

impl Codec {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self {
            Codec::Gzip(d) => d.write(data),
            Codec::Zlib(d) => d.write(data),
            Codec::Raw(d) => d.write(data),
        }
    }

    fn take_output(&mut self) -> Vec<u8> {
        match self {
            Codec::Gzip(d) => std::mem::take(d.get_mut()),
            Codec::Zlib(d) => std::mem::take(d.get_mut()),
            Codec::Raw(d) => std::mem::take(d.get_mut()),
        }
    }

    fn finish(&mut self) -> io::Result<Vec<u8>> {
        match self {
            Codec::Gzip(d) => d.try_finish()?,
            Codec::Zlib(d) => d.try_finish()?,
            Codec::Raw(d) => d.try_finish()?,
        }
        Ok(self.take_output())
    }
}

impl std::fmt::Debug for Decompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let codec = match &self.codec {
            None => "pending",
            Some(Codec::Gzip(_)) => "gzip",
            Some(Codec::Zlib(_)) => "zlib",
            Some(Codec::Raw(_)) => "raw",
        };
        f.debug_struct("Decompressor")
            .field("encoding", &self.encoding)
            .field("codec", &codec)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
    use flate2::Compression;

    use super::*;

    const TEXT: &[u8] = b"The quick brown fox jumps over the lazy dog. The quick brown fox.";

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut e = GzEncoder::new(Vec::new(), Compression::default());
        e.write_all(data).unwrap();
        e.finish().unwrap()
    }

    /// Decode all of `data`. Returns the output and whatever followed the compressed stream.
    fn decode(d: &mut Decompressor, mut data: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut out = Vec::new();
        while !data.is_empty() {
            let step = d.step(data).unwrap();
            out.extend(step.output);
            if step.consumed == 0 {
                break;
            }
            data = &data[step.consumed..];
        }
        (out, data.to_vec())
    }

    fn decode_in_pieces(d: &mut Decompressor, data: &[u8], size: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for piece in data.chunks(size) {
            let (o, rest) = decode(d, piece);
            out.extend(o);
            assert!(rest.is_empty());
        }
        out.extend(d.finish().unwrap());
        out
    }

    #[test]
    fn gzip_any_split() {
        let compressed = gzip(TEXT);
        for size in [1, 3, 7, compressed.len()] {
            let mut d = Decompressor::new(ContentEncoding::Gzip).unwrap();
            assert_eq!(decode_in_pieces(&mut d, &compressed, size), TEXT);
        }
    }

    #[test]
    fn deflate_sniffs_zlib() {
        let mut e = ZlibEncoder::new(Vec::new(), Compression::default());
        e.write_all(TEXT).unwrap();
        let compressed = e.finish().unwrap();
        assert_eq!(compressed[0], ZLIB_CMF);

        let mut d = Decompressor::new(ContentEncoding::Deflate).unwrap();
        assert_eq!(decode_in_pieces(&mut d, &compressed, 5), TEXT);
        assert!(format!("{:?}", d).contains("zlib"));
    }

    #[test]
    fn deflate_raw() {
        let mut e = DeflateEncoder::new(Vec::new(), Compression::default());
        e.write_all(TEXT).unwrap();
        let compressed = e.finish().unwrap();

        let mut d = Decompressor::new(ContentEncoding::Deflate).unwrap();
        assert_eq!(decode_in_pieces(&mut d, &compressed, 4), TEXT);
        assert!(format!("{:?}", d).contains("raw"));
    }

    #[test]
    fn garbage_is_an_error() {
        let mut d = Decompressor::new(ContentEncoding::Gzip).unwrap();
        let r = d
            .step(b"this is not gzip at all, not even close")
            .and_then(|_| d.finish());
        assert!(r.is_err());
    }

    #[test]
    fn trailing_bytes_after_stream() {
        let mut data = gzip(TEXT);
        data.extend_from_slice(b"\r\n");

        let mut d = Decompressor::new(ContentEncoding::Gzip).unwrap();
        let (mut out, rest) = decode(&mut d, &data);
        out.extend(d.finish().unwrap());

        assert_eq!(out, TEXT);
        assert_eq!(rest, b"\r\n");
    }

    // The codec buffer plus the inflate window.
    const STEP_LIMIT: usize = 128 * 1024;

    #[test]
    fn output_is_bounded_per_step() {
        let plain = vec![0u8; 4 * 1024 * 1024];
        let compressed = gzip(&plain);

        let mut d = Decompressor::new(ContentEncoding::Gzip).unwrap();
        let mut total = 0;
        let mut data = &compressed[..];
        while !data.is_empty() {
            let step = d.step(data).unwrap();
            assert!(step.output.len() <= STEP_LIMIT, "{}", step.output.len());
            total += step.output.len();
            if step.consumed == 0 {
                break;
            }
            data = &data[step.consumed..];
        }
        let last = d.finish().unwrap();
        assert!(last.len() <= STEP_LIMIT);
        total += last.len();

        assert_eq!(total, plain.len());
    }

    #[test]
    fn empty_body_finishes_cleanly() {
        let mut d = Decompressor::new(ContentEncoding::Gzip).unwrap();
        assert_eq!(d.finish().unwrap(), b"");
    }

    #[test]
    fn unsupported_encodings() {
        assert!(Decompressor::new(ContentEncoding::None).is_none());
        assert!(Decompressor::new(ContentEncoding::Unknown).is_none());
    }
}
