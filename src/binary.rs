use std::io::Read;

use encoding_rs::{Decoder, DecoderResult, Encoding};
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};

use crate::error::{Error, Result};
use crate::options::{DecompressionFormat, ParseOptions};

/// Read size for the streaming decoder.
const STREAM_READ_SIZE: usize = 8 * 1024;

/// Resolve an Encoding Standard label.
fn lookup_charset(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(label.as_bytes()).ok_or_else(|| Error::InvalidCharset {
        label: label.to_string(),
    })
}

/// Build the decoder honoring the BOM policy: by default a leading BOM
/// matching the charset is stripped; `ignore_bom` passes it through.
fn new_decoder(encoding: &'static Encoding, ignore_bom: bool) -> Decoder {
    if ignore_bom {
        encoding.new_decoder_without_bom_handling()
    } else {
        encoding.new_decoder_with_bom_removal()
    }
}

/// Run one decode step. Under `fatal` a malformed sequence is an error;
/// otherwise it becomes U+FFFD.
fn decode_step(
    decoder: &mut Decoder,
    input: &[u8],
    last: bool,
    options: &ParseOptions,
    out: &mut String,
) -> Result<()> {
    if options.fatal {
        let mut read_total = 0;
        loop {
            let needed = decoder
                .max_utf8_buffer_length_without_replacement(input.len() - read_total)
                .unwrap_or(STREAM_READ_SIZE * 4)
                .max(4);
            out.reserve(needed);
            let (result, read) =
                decoder.decode_to_string_without_replacement(&input[read_total..], out, last);
            read_total += read;
            match result {
                DecoderResult::InputEmpty => return Ok(()),
                DecoderResult::OutputFull => continue,
                DecoderResult::Malformed(..) => {
                    return Err(Error::Decode {
                        charset: options.charset.clone(),
                        source_label: options.source.clone(),
                    });
                }
            }
        }
    } else {
        let mut read_total = 0;
        loop {
            let needed = decoder
                .max_utf8_buffer_length(input.len() - read_total)
                .unwrap_or(STREAM_READ_SIZE * 4)
                .max(4);
            out.reserve(needed);
            let (result, read, _replaced) =
                decoder.decode_to_string(&input[read_total..], out, last);
            read_total += read;
            match result {
                encoding_rs::CoderResult::InputEmpty => return Ok(()),
                encoding_rs::CoderResult::OutputFull => continue,
            }
        }
    }
}

fn decompress(bytes: &[u8], format: DecompressionFormat) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let result = match format {
        DecompressionFormat::Gzip => GzDecoder::new(bytes).read_to_end(&mut out),
        DecompressionFormat::Deflate => ZlibDecoder::new(bytes).read_to_end(&mut out),
        DecompressionFormat::DeflateRaw => DeflateDecoder::new(bytes).read_to_end(&mut out),
    };
    result.map_err(|e| Error::Decompress(e.to_string()))?;
    Ok(out)
}

/// One-shot binary front-end: size check, optional decompression, charset
/// decoding with BOM policy. The returned text is what the lexer consumes.
pub fn decode_buffer(bytes: &[u8], options: &ParseOptions) -> Result<String> {
    if bytes.len() > options.max_binary_size {
        return Err(Error::BinaryTooLarge {
            size: bytes.len(),
            limit: options.max_binary_size,
            source_label: options.source.clone(),
        });
    }
    let encoding = lookup_charset(&options.charset)?;

    let decompressed;
    let payload = match options.decompression {
        Some(format) => {
            decompressed = decompress(bytes, format)?;
            &decompressed[..]
        }
        None => bytes,
    };

    let mut decoder = new_decoder(encoding, options.ignore_bom);
    let mut out = String::new();
    decode_step(&mut decoder, payload, true, options, &mut out)?;
    Ok(out)
}

/// Streaming binary front-end over any byte reader.
///
/// Reads fixed-size blocks, applies the optional decompression transform,
/// and decodes incrementally; a trailing partial scalar sequence is held
/// back by the decoder and completed by the next block. Enforcing a size
/// cap on streamed inputs is the caller's concern;
/// [`DecodingReader::bytes_read`] exposes the running total of bytes
/// consumed after decompression to make that cheap.
pub struct DecodingReader {
    reader: Box<dyn Read + Send>,
    decoder: Decoder,
    options: ParseOptions,
    buf: Vec<u8>,
    bytes_read: usize,
    done: bool,
}

impl DecodingReader {
    pub fn new(reader: impl Read + Send + 'static, options: &ParseOptions) -> Result<Self> {
        options.validate()?;
        let encoding = lookup_charset(&options.charset)?;
        let reader: Box<dyn Read + Send> = match options.decompression {
            Some(DecompressionFormat::Gzip) => Box::new(GzDecoder::new(reader)),
            Some(DecompressionFormat::Deflate) => Box::new(ZlibDecoder::new(reader)),
            Some(DecompressionFormat::DeflateRaw) => Box::new(DeflateDecoder::new(reader)),
            None => Box::new(reader),
        };
        Ok(Self {
            reader,
            decoder: new_decoder(encoding, options.ignore_bom),
            options: options.clone(),
            buf: vec![0; STREAM_READ_SIZE],
            bytes_read: 0,
            done: false,
        })
    }

    /// Bytes consumed from the underlying reader so far, measured after
    /// decompression.
    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }

    /// Next decoded text chunk, or `None` at end of stream.
    pub fn next_chunk(&mut self) -> Result<Option<String>> {
        if self.done {
            return Ok(None);
        }
        loop {
            let n = self.reader.read(&mut self.buf)?;
            self.bytes_read += n;
            let mut out = String::new();
            if n == 0 {
                self.done = true;
                decode_step(&mut self.decoder, &[], true, &self.options, &mut out)?;
                return Ok(if out.is_empty() { None } else { Some(out) });
            }
            decode_step(&mut self.decoder, &self.buf[..n], false, &self.options, &mut out)?;
            if !out.is_empty() {
                return Ok(Some(out));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ParseOptions;
    use std::io::Cursor;
    use std::io::Write;

    #[test]
    fn test_utf8_passthrough() {
        let text = decode_buffer(b"a,b\n1,2\n", &ParseOptions::default()).unwrap();
        assert_eq!(text, "a,b\n1,2\n");
    }

    #[test]
    fn test_bom_stripped_by_default() {
        let text = decode_buffer(b"\xEF\xBB\xBFa,b\n", &ParseOptions::default()).unwrap();
        assert_eq!(text, "a,b\n");
    }

    #[test]
    fn test_ignore_bom_passes_it_through() {
        let opts = ParseOptions::default().ignore_bom(true);
        let text = decode_buffer(b"\xEF\xBB\xBFa,b\n", &opts).unwrap();
        assert_eq!(text, "\u{FEFF}a,b\n");
    }

    #[test]
    fn test_utf16le_decoding() {
        let mut bytes = Vec::new();
        for unit in "a,b\n".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let opts = ParseOptions::default().charset("utf-16le");
        assert_eq!(decode_buffer(&bytes, &opts).unwrap(), "a,b\n");
    }

    #[test]
    fn test_invalid_charset_label() {
        let opts = ParseOptions::default().charset("utf-99");
        let err = decode_buffer(b"a", &opts).unwrap_err();
        assert!(matches!(err, Error::InvalidCharset { .. }));
    }

    #[test]
    fn test_invalid_bytes_replaced_by_default() {
        let text = decode_buffer(b"a,\xFF\n", &ParseOptions::default()).unwrap();
        assert_eq!(text, "a,\u{FFFD}\n");
    }

    #[test]
    fn test_invalid_bytes_fatal() {
        let opts = ParseOptions::default().fatal(true);
        let err = decode_buffer(b"a,\xFF\n", &opts).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }

    #[test]
    fn test_binary_size_cap() {
        let opts = ParseOptions::default().max_binary_size(4);
        let err = decode_buffer(b"a,b\n1,2\n", &opts).unwrap_err();
        assert!(err.to_string().contains("Input size"));
        assert!(err.is_limit());
    }

    #[test]
    fn test_gzip_decompression() {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"a,b\n1,2\n").unwrap();
        let compressed = encoder.finish().unwrap();

        let opts = ParseOptions::default().decompression(DecompressionFormat::Gzip);
        assert_eq!(decode_buffer(&compressed, &opts).unwrap(), "a,b\n1,2\n");
    }

    #[test]
    fn test_corrupt_gzip_is_decompress_error() {
        let opts = ParseOptions::default().decompression(DecompressionFormat::Gzip);
        let err = decode_buffer(b"not gzip at all", &opts).unwrap_err();
        assert!(matches!(err, Error::Decompress(_)));
    }

    #[test]
    fn test_streaming_reader_reassembles_split_sequences() {
        // One 3-byte scalar split across block boundaries must decode
        // intact.
        let text = format!("{},x\n", "\u{65E5}".repeat(4000));
        let mut reader =
            DecodingReader::new(Cursor::new(text.clone().into_bytes()), &ParseOptions::default())
                .unwrap();
        let mut decoded = String::new();
        while let Some(chunk) = reader.next_chunk().unwrap() {
            decoded.push_str(&chunk);
        }
        assert_eq!(decoded, text);
        assert_eq!(reader.bytes_read(), text.len());
    }
}
