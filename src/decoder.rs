use encoding_rs::{CoderResult, Decoder, UTF_8};

/// Incremental UTF-8 decoder for response bodies.
///
/// A multi-byte character may be split across two chunks; the decoder keeps
/// the incomplete prefix until the rest arrives instead of emitting U+FFFD.
/// Bytes that can never form a valid character are still replaced.
pub struct Utf8StreamDecoder {
    inner: Decoder,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self {
            inner: UTF_8.new_decoder(),
        }
    }

    /// Decode the next chunk, returning all text that is complete so far.
    pub fn feed(&mut self, bytes: &[u8]) -> String {
        let mut out = String::new();
        self.decode_into(bytes, &mut out, false);
        out
    }

    /// Flush whatever is still buffered at end of stream. A dangling partial
    /// sequence becomes a single replacement character.
    pub fn finish(mut self) -> String {
        let mut out = String::new();
        self.decode_into(&[], &mut out, true);
        out
    }

    fn decode_into(&mut self, mut src: &[u8], out: &mut String, last: bool) {
        loop {
            let needed = self
                .inner
                .max_utf8_buffer_length(src.len())
                .unwrap_or(src.len() * 3 + 16);
            out.reserve(needed);
            let (result, read, _had_replacements) = self.inner.decode_to_string(src, out, last);
            src = &src[read..];
            match result {
                CoderResult::InputEmpty => break,
                CoderResult::OutputFull => continue,
            }
        }
    }
}

impl Default for Utf8StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passthrough() {
        let mut decoder = Utf8StreamDecoder::new();
        assert_eq!(decoder.feed(b"Hello"), "Hello");
        assert_eq!(decoder.feed(b", world"), ", world");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_split_multibyte_character() {
        let bytes = "こんにちは".as_bytes();
        let mut decoder = Utf8StreamDecoder::new();
        // Each kana is three bytes; split the first one after its lead byte.
        let first = decoder.feed(&bytes[..1]);
        let second = decoder.feed(&bytes[1..4]);
        let rest = decoder.feed(&bytes[4..]);
        assert_eq!(first, "");
        assert_eq!(second, "こ");
        assert_eq!(rest, "んにちは");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_byte_at_a_time_emoji() {
        let text = "ok 😊 done";
        let mut decoder = Utf8StreamDecoder::new();
        let mut decoded = String::new();
        for b in text.as_bytes() {
            decoded.push_str(&decoder.feed(std::slice::from_ref(b)));
        }
        decoded.push_str(&decoder.finish());
        assert_eq!(decoded, text);
        assert!(!decoded.contains('\u{FFFD}'));
    }

    #[test]
    fn test_dangling_prefix_on_finish() {
        let mut decoder = Utf8StreamDecoder::new();
        assert_eq!(decoder.feed(&[b'a', 0xE3, 0x81]), "a");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }

    #[test]
    fn test_invalid_byte_replaced() {
        let mut decoder = Utf8StreamDecoder::new();
        assert_eq!(decoder.feed(&[b'x', 0xFF, b'y']), "x\u{FFFD}y");
    }
}
