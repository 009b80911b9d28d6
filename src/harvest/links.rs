//! Streaming hyperlink discovery.
//!
//! HTML is fed to an incremental `html5ever` tokenizer chunk by chunk, so links
//! reach the handler as soon as their tag has been read rather than after the
//! whole page has downloaded.

use futures::{Stream, StreamExt};
use html5ever::tendril::StrTendril;
use html5ever::tokenizer::states::RawKind;
use html5ever::tokenizer::{
    BufferQueue, TagKind, Token, TokenSink, TokenSinkResult, Tokenizer, TokenizerOpts,
};
use html5ever::TokenizerResult;
use regex::Regex;
use std::cell::RefCell;

use crate::config::anchored;
use crate::traits::FetchError;

/// Emits every anchor `href` whose value matches a pattern from its start.
#[derive(Debug, Clone)]
pub struct LinkExtractor {
    pattern: Regex,
}

impl LinkExtractor {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: anchored(pattern)?,
        })
    }

    /// Consumes `body` and calls `on_link` for each matching href, in document order.
    pub async fn extract<S, F>(&self, mut body: S, mut on_link: F) -> Result<(), FetchError>
    where
        S: Stream<Item = Result<bytes::Bytes, FetchError>> + Unpin,
        F: FnMut(String),
    {
        let mut tokenizer = LinkTokenizer::new(self.pattern.clone());
        while let Some(chunk) = body.next().await {
            tokenizer.feed(&chunk?, &mut on_link);
        }
        tokenizer.finish(&mut on_link);
        Ok(())
    }

    /// Synchronous form for an already-buffered document.
    pub fn extract_str<F>(&self, html: &str, mut on_link: F)
    where
        F: FnMut(String),
    {
        let mut tokenizer = LinkTokenizer::new(self.pattern.clone());
        tokenizer.feed(html.as_bytes(), &mut on_link);
        tokenizer.finish(&mut on_link);
    }
}

struct HrefSink {
    pattern: Regex,
    found: RefCell<Vec<String>>,
}

impl TokenSink for HrefSink {
    type Handle = ();

    fn process_token(&self, token: Token, _line_number: u64) -> TokenSinkResult<()> {
        let Token::TagToken(tag) = token else {
            return TokenSinkResult::Continue;
        };
        if tag.kind != TagKind::StartTag {
            return TokenSinkResult::Continue;
        }
        match &*tag.name {
            "a" => {
                let href = tag.attrs.iter().find(|attr| &*attr.name.local == "href");
                if let Some(attr) = href {
                    if self.pattern.is_match(&attr.value) {
                        self.found.borrow_mut().push(attr.value.to_string());
                    }
                }
                TokenSinkResult::Continue
            }
            // Element bodies are text up to the matching end tag.
            "script" => TokenSinkResult::RawData(RawKind::ScriptData),
            "style" => TokenSinkResult::RawData(RawKind::Rawtext),
            _ => TokenSinkResult::Continue,
        }
    }
}

/// Incremental tokenizer plus the UTF-8 bytes still waiting for their continuation.
struct LinkTokenizer {
    tokenizer: Tokenizer<HrefSink>,
    queue: BufferQueue,
    pending: Vec<u8>,
}

impl LinkTokenizer {
    fn new(pattern: Regex) -> Self {
        let sink = HrefSink {
            pattern,
            found: RefCell::new(Vec::new()),
        };
        Self {
            tokenizer: Tokenizer::new(sink, TokenizerOpts::default()),
            queue: BufferQueue::default(),
            pending: Vec::new(),
        }
    }

    fn feed(&mut self, chunk: &[u8], on_link: &mut impl FnMut(String)) {
        self.pending.extend_from_slice(chunk);
        let complete = complete_utf8_prefix(&self.pending);
        if complete == 0 {
            return;
        }
        let text = String::from_utf8_lossy(&self.pending[..complete]).into_owned();
        self.pending.drain(..complete);
        self.push(text, on_link);
    }

    fn finish(&mut self, on_link: &mut impl FnMut(String)) {
        if !self.pending.is_empty() {
            let text = String::from_utf8_lossy(&self.pending).into_owned();
            self.pending.clear();
            self.push(text, on_link);
        }
        self.tokenizer.end();
        self.drain(on_link);
    }

    fn push(&mut self, text: String, on_link: &mut impl FnMut(String)) {
        self.queue.push_back(StrTendril::from(text));
        loop {
            match self.tokenizer.feed(&self.queue) {
                TokenizerResult::Done => break,
                // The sink never requests script execution; resume after the pause.
                TokenizerResult::Script(()) => continue,
            }
        }
        self.drain(on_link);
    }

    fn drain(&mut self, on_link: &mut impl FnMut(String)) {
        let found = std::mem::take(&mut *self.tokenizer.sink.found.borrow_mut());
        for href in found {
            on_link(href);
        }
    }
}

/// Length of the longest prefix that does not end inside a multi-byte sequence.
///
/// Invalid bytes count as complete; they are replaced during decoding.
fn complete_utf8_prefix(bytes: &[u8]) -> usize {
    let mut start = 0;
    loop {
        match std::str::from_utf8(&bytes[start..]) {
            Ok(_) => return bytes.len(),
            Err(e) => match e.error_len() {
                Some(invalid) => start += e.valid_up_to() + invalid,
                None => return start + e.valid_up_to(),
            },
        }
    }
}
