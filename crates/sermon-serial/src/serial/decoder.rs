//! Incremental byte → text decoding.
//!
//! Hardware hands us bytes in whatever chunks the driver felt like
//! delivering, so a multi-byte character regularly straddles two reads.
//! `StreamDecoder` keeps the incomplete tail of each chunk in a small fixed
//! buffer and prepends it to the next one, so that the concatenation of all
//! fragments equals decoding the whole stream at once.

use crate::serial::types::TextEncoding;

/// Leftover buffer size. Far larger than any single encoded character.
pub const DEFAULT_CAPACITY: usize = 128;

/// Glyph substituted for malformed input.
pub const REPLACEMENT: char = '\u{2E2E}';

/// Stateful incremental decoder. One instance per byte stream.
#[derive(Debug)]
pub struct StreamDecoder {
    encoding: TextEncoding,
    buf: Box<[u8]>,
    /// Number of leftover bytes at the start of `buf`.
    len: usize,
}

impl StreamDecoder {
    pub fn new(encoding: TextEncoding) -> Self {
        Self::with_capacity(encoding, DEFAULT_CAPACITY)
    }

    /// # Panics
    ///
    /// If `capacity` cannot hold the longest character of `encoding`; a
    /// character that does not fit would otherwise be truncated silently.
    pub fn with_capacity(encoding: TextEncoding, capacity: usize) -> Self {
        assert!(
            capacity >= encoding.max_sequence_len(),
            "decoder capacity {} cannot hold a {}-byte {} character",
            capacity,
            encoding.max_sequence_len(),
            encoding.label()
        );
        Self {
            encoding,
            buf: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes held back waiting for the rest of a character.
    pub fn pending(&self) -> usize {
        self.len
    }

    /// Decode one chunk. Returns the text completed by this chunk, which is
    /// empty when the chunk only contained part of a character.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut out = String::with_capacity(chunk.len());
        let mut next = 0;
        while next < chunk.len() {
            let free = self.buf.len() - self.len;
            let take = free.min(chunk.len() - next);
            self.buf[self.len..self.len + take].copy_from_slice(&chunk[next..next + take]);
            self.len += take;
            next += take;

            self.decode_pending(&mut out);

            assert!(
                self.len < self.buf.len(),
                "decoder buffer full of undecodable {} bytes",
                self.encoding.label()
            );
        }
        out
    }

    /// Drop any leftover bytes and switch encoding. A character split across
    /// the switch is lost.
    pub fn reset(&mut self, encoding: TextEncoding) {
        if self.len > 0 {
            log::debug!(
                "Discarding {} pending byte(s) on switch {} -> {}",
                self.len,
                self.encoding.label(),
                encoding.label()
            );
        }
        assert!(
            self.buf.len() >= encoding.max_sequence_len(),
            "decoder capacity {} cannot hold a {}-byte {} character",
            self.buf.len(),
            encoding.max_sequence_len(),
            encoding.label()
        );
        self.encoding = encoding;
        self.len = 0;
    }

    /// Decode as much of the buffer as forms complete characters, then move
    /// the remainder to the front.
    fn decode_pending(&mut self, out: &mut String) {
        let consumed = match self.encoding {
            TextEncoding::Utf8 => decode_utf8(&self.buf[..self.len], out),
            TextEncoding::Latin1 => {
                out.extend(self.buf[..self.len].iter().map(|&b| char::from(b)));
                self.len
            }
            TextEncoding::Ascii => {
                out.extend(self.buf[..self.len].iter().map(|&b| {
                    if b.is_ascii() {
                        char::from(b)
                    } else {
                        REPLACEMENT
                    }
                }));
                self.len
            }
        };
        self.buf.copy_within(consumed..self.len, 0);
        self.len -= consumed;
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new(TextEncoding::default())
    }
}

/// Tolerant UTF-8 decode. Returns the number of bytes consumed; an
/// incomplete sequence at the very end is left unconsumed.
fn decode_utf8(bytes: &[u8], out: &mut String) -> usize {
    let mut start = 0;
    while start < bytes.len() {
        match std::str::from_utf8(&bytes[start..]) {
            Ok(s) => {
                out.push_str(s);
                return bytes.len();
            }
            Err(e) => {
                let valid_end = start + e.valid_up_to();
                if let Ok(s) = std::str::from_utf8(&bytes[start..valid_end]) {
                    out.push_str(s);
                }
                start = valid_end;
                match e.error_len() {
                    Some(bad) => {
                        out.push(REPLACEMENT);
                        start += bad;
                    }
                    None => return start,
                }
            }
        }
    }
    start
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn one_shot(encoding: TextEncoding, bytes: &[u8]) -> String {
        StreamDecoder::new(encoding).decode(bytes)
    }

    fn chunked(encoding: TextEncoding, bytes: &[u8], size: usize) -> String {
        let mut decoder = StreamDecoder::new(encoding);
        bytes.chunks(size).map(|c| decoder.decode(c)).collect()
    }

    #[test]
    fn test_ascii_chunks_emit_one_fragment_each() {
        let mut decoder = StreamDecoder::default();
        let fragments: Vec<String> = ["h", "e", "l", "l", "o"]
            .iter()
            .map(|c| decoder.decode(c.as_bytes()))
            .collect();
        assert_eq!(fragments, vec!["h", "e", "l", "l", "o"]);
        assert_eq!(fragments.concat(), "hello");
    }

    #[test]
    fn test_three_byte_char_split() {
        let euro = "€".as_bytes();
        assert_eq!(euro.len(), 3);
        let mut decoder = StreamDecoder::default();
        assert_eq!(decoder.decode(&euro[..1]), "");
        assert_eq!(decoder.pending(), 1);
        assert_eq!(decoder.decode(&euro[1..]), "€");
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_chunking_never_changes_output() {
        let text = "temp=21.5°C ✓ naïve 日本語 🦀🦀 done\r\n";
        let bytes = text.as_bytes();
        for size in 1..=bytes.len() {
            assert_eq!(chunked(TextEncoding::Utf8, bytes, size), text, "chunk size {size}");
        }
    }

    #[test]
    fn test_every_two_way_split() {
        let bytes = "a🦀b€c".as_bytes();
        let whole = one_shot(TextEncoding::Utf8, bytes);
        for cut in 0..=bytes.len() {
            let mut decoder = StreamDecoder::default();
            let mut joined = decoder.decode(&bytes[..cut]);
            joined.push_str(&decoder.decode(&bytes[cut..]));
            assert_eq!(joined, whole, "cut at {cut}");
        }
    }

    #[test]
    fn test_chunks_larger_than_capacity() {
        let text = "ü".repeat(500);
        let mut decoder = StreamDecoder::default();
        let mut out = decoder.decode(&text.as_bytes()[..777]);
        out.push_str(&decoder.decode(&text.as_bytes()[777..]));
        assert_eq!(out, text);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_malformed_bytes_replaced_not_fatal() {
        let mut decoder = StreamDecoder::default();
        let out = decoder.decode(&[b'o', b'k', 0xFF, b'!', 0xC3, 0x28]);
        assert_eq!(out, format!("ok{REPLACEMENT}!{REPLACEMENT}("));
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_malformed_matches_one_shot_under_chunking() {
        let bytes = [0xE2, 0x82, b'x', 0xF0, 0x9F, 0xA6, 0x80, 0x80, b'y'];
        let whole = one_shot(TextEncoding::Utf8, &bytes);
        for size in 1..=bytes.len() {
            assert_eq!(chunked(TextEncoding::Utf8, &bytes, size), whole);
        }
    }

    #[test]
    fn test_incomplete_tail_is_held_not_dropped() {
        let mut decoder = StreamDecoder::default();
        let crab = "🦀".as_bytes();
        assert_eq!(decoder.decode(&crab[..3]), "");
        assert_eq!(decoder.pending(), 3);
    }

    #[test]
    fn test_reset_discards_partial_character() {
        let mut decoder = StreamDecoder::default();
        assert_eq!(decoder.decode(&"é".as_bytes()[..1]), "");
        decoder.reset(TextEncoding::Latin1);
        assert_eq!(decoder.pending(), 0);
        assert_eq!(decoder.encoding(), TextEncoding::Latin1);
        assert_eq!(decoder.decode(&[0xE9]), "é");
    }

    #[test]
    fn test_ascii_replaces_high_bytes() {
        let mut decoder = StreamDecoder::new(TextEncoding::Ascii);
        assert_eq!(decoder.decode(&[b'A', 0xC8, b'B']), format!("A{REPLACEMENT}B"));
    }

    #[test]
    #[should_panic(expected = "cannot hold")]
    fn test_capacity_smaller_than_character_panics() {
        let _ = StreamDecoder::with_capacity(TextEncoding::Utf8, 3);
    }

    /// Split `bytes` at each cut (taken modulo the length), in order.
    fn pieces<'a>(bytes: &'a [u8], cuts: &[usize]) -> Vec<&'a [u8]> {
        let mut points: Vec<usize> = cuts.iter().map(|c| c % (bytes.len() + 1)).collect();
        points.sort_unstable();
        points.dedup();
        let mut out = Vec::with_capacity(points.len() + 1);
        let mut start = 0;
        for point in points {
            out.push(&bytes[start..point]);
            start = point;
        }
        out.push(&bytes[start..]);
        out
    }

    /// Valid characters interleaved with short runs of arbitrary bytes.
    fn mixed_stream() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(
            prop_oneof![
                any::<char>().prop_map(|c| c.to_string().into_bytes()),
                prop::collection::vec(any::<u8>(), 1..4),
            ],
            0..64,
        )
        .prop_map(|parts| parts.concat())
    }

    proptest! {
        #[test]
        fn test_any_text_survives_any_split(
            text in any::<String>(),
            cuts in prop::collection::vec(any::<usize>(), 0..16),
        ) {
            let mut decoder = StreamDecoder::default();
            let out: String = pieces(text.as_bytes(), &cuts)
                .into_iter()
                .map(|piece| decoder.decode(piece))
                .collect();
            prop_assert_eq!(out, text);
            prop_assert_eq!(decoder.pending(), 0);
        }

        #[test]
        fn test_any_bytes_decode_alike_whole_or_split(
            bytes in mixed_stream(),
            cuts in prop::collection::vec(any::<usize>(), 0..16),
        ) {
            let mut whole = StreamDecoder::default();
            let expected = whole.decode(&bytes);
            let mut decoder = StreamDecoder::default();
            let out: String = pieces(&bytes, &cuts)
                .into_iter()
                .map(|piece| decoder.decode(piece))
                .collect();
            prop_assert_eq!(out, expected);
            prop_assert_eq!(decoder.pending(), whole.pending());
        }

        #[test]
        fn test_latin1_emits_one_char_per_byte(
            bytes in prop::collection::vec(any::<u8>(), 0..256),
            cuts in prop::collection::vec(any::<usize>(), 0..8),
        ) {
            let mut decoder = StreamDecoder::new(TextEncoding::Latin1);
            let out: String = pieces(&bytes, &cuts)
                .into_iter()
                .map(|piece| decoder.decode(piece))
                .collect();
            prop_assert_eq!(out.chars().count(), bytes.len());
        }
    }

    #[test]
    fn test_minimum_capacity_still_decodes() {
        let text = "x🦀y";
        let mut decoder = StreamDecoder::with_capacity(TextEncoding::Utf8, 4);
        assert_eq!(decoder.decode(text.as_bytes()), text);
    }
}
