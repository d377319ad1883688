//! Incremental decoding of a generated token stream into printable text.
//!
//! The engine produces token ids one or a few at a time, and a token
//! boundary is not a character boundary: one Unicode character may span
//! several tokens, and the decode of a token sequence is not the
//! concatenation of its parts. [`TextStreamer`] therefore keeps the ids
//! seen since the last flush, re-decodes the whole cache on every
//! increment, and only forwards text once its tail can no longer change.

use tokio::sync::mpsc;
use tracing::debug;

/// Decodes a token id sequence to UTF-8 text.
///
/// Must be total over ids produced by the matching encoder. Note that
/// `decode(a ++ b)` need not equal `decode(a) ++ decode(b)` when a
/// multi-token character spans the boundary.
pub trait TokenDecoder {
    fn decode(&self, tokens: &[i32]) -> String;
}

/// Synchronous consumer of decoded text fragments.
///
/// Fragments arrive in order, without gaps or duplication. Returning
/// `false` asks the producer to stop; no further fragments are
/// delivered for the current generation after that.
pub trait StreamSink {
    fn emit(&mut self, text: &str) -> bool;
}

impl<F> StreamSink for F
where
    F: FnMut(&str) -> bool,
{
    fn emit(&mut self, text: &str) -> bool {
        self(text)
    }
}

/// Trailing characters that may be the first half of a wider symbol in
/// the target script; text ending in one is held until more arrives.
fn is_held_punct(c: char) -> bool {
    matches!(c, ',' | '!' | ':' | ';' | '?')
}

/// Turns a growing token id stream into printable text fragments.
///
/// One instance serves one generation request on one thread. Feed each
/// batch of new ids to [`put`](Self::put); call [`end`](Self::end) once
/// when the engine stops producing tokens.
pub struct TextStreamer<'a, D: ?Sized, S: ?Sized> {
    decoder: &'a D,
    sink: &'a mut S,
    /// Ids accumulated since the last newline flush.
    token_cache: Vec<i32>,
    /// Byte offset into `decode(token_cache)` already emitted.
    print_cursor: usize,
    /// The first `put` of a run carries the prompt echo and is dropped.
    skip_prompt: bool,
}

impl<'a, D, S> TextStreamer<'a, D, S>
where
    D: TokenDecoder + ?Sized,
    S: StreamSink + ?Sized,
{
    pub fn new(decoder: &'a D, sink: &'a mut S) -> Self {
        Self {
            decoder,
            sink,
            token_cache: Vec::new(),
            print_cursor: 0,
            skip_prompt: true,
        }
    }

    /// Accept newly produced token ids and emit whatever text is safe
    /// to print.
    ///
    /// Returns `false` once the sink has requested stop.
    pub fn put(&mut self, tokens: &[i32]) -> bool {
        if self.skip_prompt {
            self.skip_prompt = false;
            return true;
        }

        self.token_cache.extend_from_slice(tokens);
        let text = self.decoder.decode(&self.token_cache);
        let Some(last) = text.chars().last() else {
            // Nothing decodable yet; more tokens are needed.
            return true;
        };

        let mut keep_going = true;
        if last == '\n' {
            // A completed line cannot change retroactively: flush it
            // and start a fresh cache.
            let printable = &text[self.print_cursor..];
            if !printable.is_empty() {
                keep_going = self.sink.emit(printable);
            }
            self.token_cache.clear();
            self.print_cursor = 0;
        } else if is_held_punct(last) {
            // Hold: the trailing punctuation may still merge with the
            // next token into a wider symbol.
        } else if last == char::REPLACEMENT_CHARACTER {
            // Hold: mid multi-byte code point.
        } else {
            let printable = &text[self.print_cursor..];
            if !printable.is_empty() {
                keep_going = self.sink.emit(printable);
            }
            self.print_cursor = text.len();
        }
        keep_going
    }

    /// Flush whatever is still held back and reset for reuse.
    ///
    /// Call exactly once per generation, after the last `put`.
    pub fn end(&mut self) -> bool {
        let text = self.decoder.decode(&self.token_cache);
        let mut keep_going = true;
        if self.print_cursor < text.len() {
            keep_going = self.sink.emit(&text[self.print_cursor..]);
        }
        self.token_cache.clear();
        self.print_cursor = 0;
        self.skip_prompt = true;
        keep_going
    }
}

//  Sink adapters

/// Sink that accumulates every fragment into an owned string.
#[derive(Debug, Default)]
pub struct CollectSink {
    text: String,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

impl StreamSink for CollectSink {
    fn emit(&mut self, text: &str) -> bool {
        self.text.push_str(text);
        true
    }
}

/// Sink that forwards fragments over a tokio channel.
///
/// Intended for generation running inside `spawn_blocking` with an
/// async consumer on the other end; dropping the receiver stops
/// delivery.
pub struct ChannelSink {
    tx: mpsc::Sender<String>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }
}

impl StreamSink for ChannelSink {
    fn emit(&mut self, text: &str) -> bool {
        if self.tx.blocking_send(text.to_string()).is_err() {
            debug!("Stream receiver dropped; stopping delivery");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    /// Decoder over a fixed id → byte-sequence table. Invalid or
    /// incomplete UTF-8 decodes to replacement characters, exactly like
    /// a byte-level tokenizer mid-character.
    struct TableDecoder {
        table: HashMap<i32, Vec<u8>>,
    }

    impl TableDecoder {
        fn new(entries: &[(i32, &[u8])]) -> Self {
            let table = entries
                .iter()
                .map(|(id, bytes)| (*id, bytes.to_vec()))
                .collect();
            Self { table }
        }
    }

    impl TokenDecoder for TableDecoder {
        fn decode(&self, tokens: &[i32]) -> String {
            let mut bytes = Vec::new();
            for id in tokens {
                bytes.extend_from_slice(&self.table[id]);
            }
            String::from_utf8_lossy(&bytes).into_owned()
        }
    }

    /// Sink recording each fragment separately. The fragment list is
    /// behind a shared handle so it stays readable while a streamer
    /// holds the sink mutably.
    #[derive(Default)]
    struct RecordingSink {
        fragments: Rc<RefCell<Vec<String>>>,
    }

    impl RecordingSink {
        fn handle(&self) -> Rc<RefCell<Vec<String>>> {
            Rc::clone(&self.fragments)
        }
    }

    impl StreamSink for RecordingSink {
        fn emit(&mut self, text: &str) -> bool {
            self.fragments.borrow_mut().push(text.to_string());
            true
        }
    }

    const PROMPT: i32 = 0;

    #[test]
    fn prompt_is_discarded() {
        let decoder = TableDecoder::new(&[(PROMPT, b"echoed prompt\n"), (1, b"ok")]);
        let mut sink = RecordingSink::default();
        let fragments = sink.handle();
        let mut streamer = TextStreamer::new(&decoder, &mut sink);

        // The first put never reaches the sink, newline or not.
        assert!(streamer.put(&[PROMPT]));
        assert!(streamer.put(&[1]));
        streamer.end();

        assert_eq!(*fragments.borrow(), ["ok"]);
    }

    #[test]
    fn empty_decode_emits_nothing() {
        let decoder = TableDecoder::new(&[(PROMPT, b"p"), (1, b""), (2, b"hi")]);
        let mut sink = RecordingSink::default();
        let fragments = sink.handle();
        let mut streamer = TextStreamer::new(&decoder, &mut sink);

        streamer.put(&[PROMPT]);
        assert!(streamer.put(&[1]));
        assert!(fragments.borrow().is_empty());

        streamer.put(&[2]);
        assert_eq!(*fragments.borrow(), ["hi"]);
    }

    #[test]
    fn trailing_punctuation_is_held_until_finish() {
        let decoder = TableDecoder::new(&[(PROMPT, b"p"), (1, b"wait"), (2, b"?")]);
        let mut sink = RecordingSink::default();
        let fragments = sink.handle();
        let mut streamer = TextStreamer::new(&decoder, &mut sink);

        streamer.put(&[PROMPT]);
        streamer.put(&[1, 2]);
        assert!(fragments.borrow().is_empty());

        streamer.end();
        assert_eq!(*fragments.borrow(), ["wait?"]);
    }

    #[test]
    fn every_hold_punct_holds() {
        for punct in [",", "!", ":", ";", "?"] {
            let decoder = TableDecoder::new(&[(PROMPT, b"p"), (1, punct.as_bytes())]);
            let mut sink = RecordingSink::default();
            let fragments = sink.handle();
            let mut streamer = TextStreamer::new(&decoder, &mut sink);
            streamer.put(&[PROMPT]);
            streamer.put(&[1]);
            assert!(fragments.borrow().is_empty(), "{punct:?} was not held");
        }
    }

    #[test]
    fn newline_flushes_everything_held() {
        let decoder = TableDecoder::new(&[
            (PROMPT, b"p"),
            (1, b"Hello"),
            (2, b","),
            (3, b" world"),
            (4, b".\n"),
        ]);
        let mut sink = RecordingSink::default();
        let fragments = sink.handle();
        let mut streamer = TextStreamer::new(&decoder, &mut sink);

        streamer.put(&[PROMPT]);
        streamer.put(&[1, 2]); // "Hello," — held
        assert!(fragments.borrow().is_empty());
        streamer.put(&[3]); // "Hello, world" — safe tail, emitted
        streamer.put(&[4]); // newline — flush the remainder
        streamer.end();

        assert_eq!(*fragments.borrow(), ["Hello, world", ".\n"]);
        assert_eq!(fragments.borrow().concat(), "Hello, world.\n");
    }

    #[test]
    fn newline_flush_clears_the_cache() {
        let decoder = TableDecoder::new(&[
            (PROMPT, b"p"),
            (1, b"First line\n"),
            (2, b"Second"),
        ]);
        let mut sink = RecordingSink::default();
        let fragments = sink.handle();
        let mut streamer = TextStreamer::new(&decoder, &mut sink);

        streamer.put(&[PROMPT]);
        streamer.put(&[1]);
        // If the cache survived the flush, this would re-decode and
        // re-emit the first line.
        streamer.put(&[2]);
        streamer.end();

        assert_eq!(*fragments.borrow(), ["First line\n", "Second"]);
    }

    #[test]
    fn incomplete_multibyte_is_held() {
        // "é" is 0xC3 0xA9, split across two tokens.
        let decoder = TableDecoder::new(&[
            (PROMPT, b"p"),
            (1, b"caf"),
            (2, &[0xC3]),
            (3, &[0xA9]),
        ]);
        let mut sink = RecordingSink::default();
        let fragments = sink.handle();
        let mut streamer = TextStreamer::new(&decoder, &mut sink);

        streamer.put(&[PROMPT]);
        streamer.put(&[1]);
        streamer.put(&[2]); // "caf�" — held, mid-character
        assert_eq!(*fragments.borrow(), ["caf"]);
        streamer.put(&[3]);
        streamer.end();

        assert_eq!(fragments.borrow().concat(), "café");
    }

    #[test]
    fn four_byte_character_split_three_ways() {
        // U+1F600 is 0xF0 0x9F 0x98 0x80.
        let decoder = TableDecoder::new(&[
            (PROMPT, b"p"),
            (1, &[0xF0, 0x9F]),
            (2, &[0x98]),
            (3, &[0x80]),
        ]);
        let mut sink = RecordingSink::default();
        let fragments = sink.handle();
        let mut streamer = TextStreamer::new(&decoder, &mut sink);

        streamer.put(&[PROMPT]);
        streamer.put(&[1]);
        streamer.put(&[2]);
        assert!(fragments.borrow().is_empty());
        streamer.put(&[3]);
        streamer.end();

        assert_eq!(*fragments.borrow(), ["😀"]);
    }

    #[test]
    fn fragments_cover_the_output_exactly_once() {
        let decoder = TableDecoder::new(&[
            (PROMPT, b"the prompt"),
            (1, b"One"),
            (2, b","),
            (3, b" two"),
            (4, b"!\n"),
            (5, b"Three"),
            (6, b":"),
            (7, b" four"),
        ]);
        let mut sink = RecordingSink::default();
        let fragments = sink.handle();
        let mut streamer = TextStreamer::new(&decoder, &mut sink);

        streamer.put(&[PROMPT]);
        for id in 1..=7 {
            streamer.put(&[id]);
        }
        streamer.end();

        // Completeness and order; no gaps, no duplication.
        assert_eq!(fragments.borrow().concat(), "One, two!\nThree: four");
        for fragment in fragments.borrow().iter() {
            assert!(!fragment.is_empty());
        }
    }

    #[test]
    fn sink_false_propagates() {
        let decoder = TableDecoder::new(&[(PROMPT, b"p"), (1, b"a"), (2, b"b")]);
        let mut emitted = 0usize;
        let mut sink = |_: &str| {
            emitted += 1;
            false
        };
        let mut streamer = TextStreamer::new(&decoder, &mut sink);

        assert!(streamer.put(&[PROMPT]));
        assert!(!streamer.put(&[1]));
        // Held rounds do not touch the sink, so they report continue.
        assert_eq!(emitted, 1);
    }

    #[test]
    fn end_resets_for_reuse() {
        let decoder = TableDecoder::new(&[(PROMPT, b"p"), (1, b"first"), (2, b"second")]);
        let mut sink = RecordingSink::default();
        let fragments = sink.handle();
        let mut streamer = TextStreamer::new(&decoder, &mut sink);

        streamer.put(&[PROMPT]);
        streamer.put(&[1]);
        streamer.end();

        // Next run: the prompt skip applies again and no stale cache
        // bleeds through.
        streamer.put(&[PROMPT]);
        streamer.put(&[2]);
        streamer.end();

        assert_eq!(*fragments.borrow(), ["first", "second"]);
    }

    #[test]
    fn collect_sink_accumulates() {
        let decoder = TableDecoder::new(&[(PROMPT, b"p"), (1, b"Hello "), (2, b"world")]);
        let mut sink = CollectSink::new();
        let mut streamer = TextStreamer::new(&decoder, &mut sink);

        streamer.put(&[PROMPT]);
        streamer.put(&[1]);
        streamer.put(&[2]);
        streamer.end();

        assert_eq!(sink.as_str(), "Hello world");
    }

    #[test]
    fn channel_sink_stops_when_receiver_dropped() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut sink = ChannelSink::new(tx);

        assert!(sink.emit("still listening"));
        assert_eq!(rx.blocking_recv().as_deref(), Some("still listening"));

        drop(rx);
        assert!(!sink.emit("nobody home"));
    }
}
