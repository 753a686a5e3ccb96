//! Incremental, error-tolerant byte-to-text decoding.

use encoding_rs::{CoderResult, Decoder, Encoding, UTF_8};

/// Streams raw output chunks into text.
///
/// Malformed input becomes U+FFFD instead of failing the run. A multi-byte
/// sequence split across two reads is held back until the next chunk completes
/// it.
pub struct TextDecoder {
    encoding: &'static Encoding,
    inner: Decoder,
    finished: bool,
}

impl std::fmt::Debug for TextDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextDecoder")
            .field("encoding", &self.encoding.name())
            .field("finished", &self.finished)
            .finish()
    }
}

impl Default for TextDecoder {
    fn default() -> Self {
        Self::utf8()
    }
}

impl TextDecoder {
    pub fn new(encoding: &'static Encoding) -> Self {
        Self {
            encoding,
            // Output is passed through verbatim, so a leading BOM stays in the text.
            inner: encoding.new_decoder_without_bom_handling(),
            finished: false,
        }
    }

    /// Decoder for the platform's preferred encoding.
    pub fn utf8() -> Self {
        Self::new(UTF_8)
    }

    /// Look up an encoding by its WHATWG label (`"utf-8"`, `"latin1"`, ...).
    pub fn for_label(label: &str) -> Option<Self> {
        Encoding::for_label(label.trim().as_bytes()).map(Self::new)
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    /// Decode one chunk, appending to `out`.
    pub fn push(&mut self, bytes: &[u8], out: &mut String) {
        self.decode(bytes, out, false);
    }

    /// Flush any incomplete trailing sequence as a replacement character.
    ///
    /// Further calls after this are no-ops.
    pub fn finish(&mut self, out: &mut String) {
        self.decode(&[], out, true);
        self.finished = true;
    }

    fn decode(&mut self, mut src: &[u8], out: &mut String, last: bool) {
        if self.finished {
            return;
        }
        loop {
            let needed = self
                .inner
                .max_utf8_buffer_length(src.len())
                .unwrap_or(src.len().saturating_mul(3).saturating_add(16));
            out.reserve(needed);
            let (result, read, _) = self.inner.decode_to_string(src, out, last);
            src = &src[read..];
            match result {
                CoderResult::InputEmpty => break,
                CoderResult::OutputFull => continue,
            }
        }
    }
}

/// Decode a complete buffer in one go.
pub fn decode_all(encoding: &'static Encoding, bytes: &[u8]) -> String {
    let mut out = String::new();
    let mut decoder = TextDecoder::new(encoding);
    decoder.push(bytes, &mut out);
    decoder.finish(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_ascii() {
        assert_eq!(decode_all(UTF_8, b"hello\n"), "hello\n");
    }

    #[test]
    fn split_multibyte_sequence_is_completed() {
        // "é" is 0xC3 0xA9
        let mut decoder = TextDecoder::utf8();
        let mut out = String::new();
        decoder.push(b"caf\xC3", &mut out);
        assert_eq!(out, "caf");
        decoder.push(b"\xA9!", &mut out);
        assert_eq!(out, "café!");
        decoder.finish(&mut out);
        assert_eq!(out, "café!");
    }

    #[test]
    fn four_byte_sequence_split_every_byte() {
        let crab = "🦀".as_bytes();
        let mut decoder = TextDecoder::utf8();
        let mut out = String::new();
        for byte in crab {
            decoder.push(std::slice::from_ref(byte), &mut out);
        }
        decoder.finish(&mut out);
        assert_eq!(out, "🦀");
    }

    #[test]
    fn invalid_bytes_are_replaced() {
        assert_eq!(decode_all(UTF_8, b"a\xFFb"), "a\u{FFFD}b");
    }

    #[test]
    fn truncated_tail_is_replaced_on_finish() {
        let mut decoder = TextDecoder::utf8();
        let mut out = String::new();
        decoder.push(b"ok\xE2\x82", &mut out);
        decoder.finish(&mut out);
        assert_eq!(out, "ok\u{FFFD}");

        decoder.push(b"ignored", &mut out);
        assert_eq!(out, "ok\u{FFFD}");
    }

    #[test]
    fn bom_is_preserved() {
        assert_eq!(decode_all(UTF_8, b"\xEF\xBB\xBFx"), "\u{FEFF}x");
    }

    #[test]
    fn labels() {
        let latin1 = TextDecoder::for_label("latin1").unwrap();
        assert_eq!(latin1.encoding().name(), "windows-1252");
        assert_eq!(decode_all(latin1.encoding(), b"caf\xE9"), "café");
        assert!(TextDecoder::for_label("no-such-encoding").is_none());
    }

    #[test]
    fn large_chunks() {
        let text = "ünïcödé ".repeat(10_000);
        assert_eq!(decode_all(UTF_8, text.as_bytes()), text);
    }
}
