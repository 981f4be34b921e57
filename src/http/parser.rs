//! Request parsing: a line sub-machine feeding a main state machine, both
//! restartable so a request split across reads parses identically to one
//! delivered whole.

use crate::http::request::{Method, RequestHead};
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    Complete,
    Incomplete,
    /// A bare LF or a CR followed by anything but LF.
    Malformed,
}

/// Scans `buf[*checked..len]` for the end of the current line, advancing
/// the cursor past the CRLF on `Complete`. Never inspects bytes at or
/// beyond `len`.
pub fn parse_line(buf: &[u8], checked: &mut usize, len: usize) -> LineStatus {
    while *checked < len {
        match buf[*checked] {
            b'\r' => {
                if *checked + 1 == len {
                    return LineStatus::Incomplete;
                }
                if buf[*checked + 1] == b'\n' {
                    *checked += 2;
                    return LineStatus::Complete;
                }
                return LineStatus::Malformed;
            }
            b'\n' => return LineStatus::Malformed,
            _ => *checked += 1,
        }
    }
    LineStatus::Incomplete
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    RequestLine,
    Headers,
    Body,
    Done,
}

/// What a call to [`Parser::advance`] concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Incomplete,
    Complete,
    /// Structurally invalid. Terminal.
    Malformed,
}

/// Incremental request parser over an externally owned read buffer.
#[derive(Debug, Default)]
pub struct Parser {
    state: ParseState,
    checked: usize,
    line_start: usize,
    body_start: usize,
    head: RequestHead,
}

impl Default for ParseState {
    fn default() -> Self {
        ParseState::RequestLine
    }
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    /// The parsed request head; meaningful once `advance` returned
    /// [`Advance::Complete`].
    pub fn head(&self) -> &RequestHead {
        &self.head
    }

    /// Index range of the request body within the read buffer.
    pub fn body_range(&self) -> Range<usize> {
        self.body_start..self.body_start + self.head.content_length
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Consumes as much of `buf[..len]` as possible, `landing` being the
    /// target substituted for a bare `/`.
    pub fn advance(&mut self, buf: &[u8], len: usize, landing: &str) -> Advance {
        loop {
            match self.state {
                ParseState::Done => return Advance::Complete,
                ParseState::Body => {
                    // The body is not line-structured; it is complete once
                    // content_length bytes sit past the header block. An
                    // absurd declared length saturates and can never be
                    // satisfied; the full read buffer then forces teardown.
                    if len >= self.body_start.saturating_add(self.head.content_length) {
                        self.state = ParseState::Done;
                        return Advance::Complete;
                    }
                    return Advance::Incomplete;
                }
                ParseState::RequestLine | ParseState::Headers => {}
            }

            match parse_line(buf, &mut self.checked, len) {
                LineStatus::Incomplete => return Advance::Incomplete,
                LineStatus::Malformed => return Advance::Malformed,
                LineStatus::Complete => {}
            }
            let line = &buf[self.line_start..self.checked - 2];
            self.line_start = self.checked;

            match self.state {
                ParseState::RequestLine => {
                    if self.parse_request_line(line, landing).is_err() {
                        return Advance::Malformed;
                    }
                    self.state = ParseState::Headers;
                }
                ParseState::Headers => {
                    if line.is_empty() {
                        if self.head.content_length > 0 {
                            self.body_start = self.checked;
                            self.state = ParseState::Body;
                        } else {
                            self.state = ParseState::Done;
                            return Advance::Complete;
                        }
                    } else {
                        self.parse_header(line);
                    }
                }
                ParseState::Body | ParseState::Done => unreachable!(),
            }
        }
    }

    fn parse_request_line(&mut self, line: &[u8], landing: &str) -> Result<(), ()> {
        let text = std::str::from_utf8(line).map_err(|_| ())?;
        let mut parts = text.split_ascii_whitespace();
        let method = parts.next().ok_or(())?;
        let target = parts.next().ok_or(())?;
        let version = parts.next().ok_or(())?;
        if parts.next().is_some() {
            return Err(());
        }

        self.head.method = Method::parse(method).ok_or(())?;
        if !version.eq_ignore_ascii_case("HTTP/1.1") {
            return Err(());
        }

        // An absolute-URI target is reduced to its path.
        let mut target = target;
        for scheme in ["http://", "https://"] {
            if target.len() >= scheme.len()
                && target[..scheme.len()].eq_ignore_ascii_case(scheme)
            {
                let rest = &target[scheme.len()..];
                target = &rest[rest.find('/').ok_or(())?..];
                break;
            }
        }
        if !target.starts_with('/') {
            return Err(());
        }

        self.head.target = if target == "/" {
            landing.to_string()
        } else {
            target.to_string()
        };
        Ok(())
    }

    /// Header parsing never fails: recognized names set fields, anything
    /// else is logged and skipped.
    fn parse_header(&mut self, line: &[u8]) {
        let Ok(text) = std::str::from_utf8(line) else {
            tracing::debug!("ignoring non-UTF-8 header line");
            return;
        };
        if let Some(value) = strip_prefix_ci(text, "connection:") {
            if value.trim().eq_ignore_ascii_case("keep-alive") {
                self.head.keep_alive = true;
            }
        } else if let Some(value) = strip_prefix_ci(text, "content-length:") {
            self.head.content_length = value.trim().parse().unwrap_or(0);
        } else if let Some(value) = strip_prefix_ci(text, "host:") {
            self.head.host = Some(value.trim().to_string());
        } else {
            tracing::debug!(header = text, "ignoring unrecognized header");
        }
    }
}

fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    if text.len() >= prefix.len() && text[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&text[prefix.len()..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advance_all(parser: &mut Parser, buf: &[u8]) -> Advance {
        parser.advance(buf, buf.len(), "/judge.html")
    }

    #[test]
    fn parse_simple_get() {
        let buf = b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let mut parser = Parser::new();
        assert_eq!(advance_all(&mut parser, buf), Advance::Complete);
        assert_eq!(parser.head().method, Method::Get);
        assert_eq!(parser.head().target, "/index.html");
        assert_eq!(parser.head().host.as_deref(), Some("example.com"));
        assert!(!parser.head().keep_alive);
    }

    #[test]
    fn bare_slash_is_rewritten_to_landing() {
        let buf = b"GET / HTTP/1.1\r\n\r\n";
        let mut parser = Parser::new();
        assert_eq!(advance_all(&mut parser, buf), Advance::Complete);
        assert_eq!(parser.head().target, "/judge.html");
    }

    #[test]
    fn line_machine_never_reads_past_len() {
        let buf = b"GET / HTTP/1.1\r\nXXXXXX";
        let mut checked = 0;
        let len = 16; // stop right after the CRLF
        assert_eq!(parse_line(buf, &mut checked, len), LineStatus::Complete);
        assert_eq!(checked, 16);
        assert!(checked <= len);
    }

    #[test]
    fn carriage_return_at_end_is_incomplete() {
        let buf = b"GET / HTTP/1.1\r";
        let mut checked = 0;
        assert_eq!(parse_line(buf, &mut checked, buf.len()), LineStatus::Incomplete);
    }

    #[test]
    fn bare_linefeed_is_malformed() {
        let buf = b"GET / HTTP/1.1\n";
        let mut checked = 0;
        assert_eq!(parse_line(buf, &mut checked, buf.len()), LineStatus::Malformed);
    }

    #[test]
    fn missing_version_is_malformed() {
        let buf = b"GET /\r\n\r\n";
        let mut parser = Parser::new();
        assert_eq!(advance_all(&mut parser, buf), Advance::Malformed);
    }

    #[test]
    fn unsupported_method_is_malformed() {
        let buf = b"PUT /x HTTP/1.1\r\n\r\n";
        let mut parser = Parser::new();
        assert_eq!(advance_all(&mut parser, buf), Advance::Malformed);
    }

    #[test]
    fn post_waits_for_full_body() {
        let buf = b"POST /3 HTTP/1.1\r\nContent-Length: 10\r\n\r\nuser=";
        let mut parser = Parser::new();
        assert_eq!(advance_all(&mut parser, buf), Advance::Incomplete);

        let full = b"POST /3 HTTP/1.1\r\nContent-Length: 10\r\n\r\nuser=ab&p=";
        let mut parser = Parser::new();
        assert_eq!(advance_all(&mut parser, full), Advance::Complete);
        assert_eq!(&full[parser.body_range()], b"user=ab&p=");
    }

    #[test]
    fn absolute_uri_scheme_is_stripped() {
        let buf = b"GET http://example.com/page.html HTTP/1.1\r\n\r\n";
        let mut parser = Parser::new();
        assert_eq!(advance_all(&mut parser, buf), Advance::Complete);
        assert_eq!(parser.head().target, "/page.html");
    }

    #[test]
    fn headers_are_case_insensitive() {
        let buf = b"GET /x HTTP/1.1\r\nCONNECTION: Keep-Alive\r\ncontent-length: 0\r\n\r\n";
        let mut parser = Parser::new();
        assert_eq!(advance_all(&mut parser, buf), Advance::Complete);
        assert!(parser.head().keep_alive);
    }

    #[test]
    fn split_reads_parse_identically() {
        let buf = b"POST /3 HTTP/1.1\r\nHost: h\r\nConnection: keep-alive\r\nContent-Length: 5\r\n\r\nhello";

        let mut whole = Parser::new();
        assert_eq!(advance_all(&mut whole, buf), Advance::Complete);

        // Feed one byte at a time; every prefix but the last is incomplete.
        let mut split = Parser::new();
        for len in 1..buf.len() {
            assert_eq!(split.advance(buf, len, "/judge.html"), Advance::Incomplete);
        }
        assert_eq!(split.advance(buf, buf.len(), "/judge.html"), Advance::Complete);

        assert_eq!(split.head().method, whole.head().method);
        assert_eq!(split.head().target, whole.head().target);
        assert_eq!(split.head().keep_alive, whole.head().keep_alive);
        assert_eq!(split.head().content_length, whole.head().content_length);
        assert_eq!(split.head().host, whole.head().host);
        assert_eq!(split.body_range(), whole.body_range());
    }

    #[test]
    fn reset_clears_state_between_requests() {
        let buf = b"GET /a HTTP/1.1\r\nConnection: keep-alive\r\n\r\n";
        let mut parser = Parser::new();
        assert_eq!(advance_all(&mut parser, buf), Advance::Complete);
        parser.reset();
        assert_eq!(parser.state(), ParseState::RequestLine);
        assert!(!parser.head().keep_alive);

        let next = b"GET /b HTTP/1.1\r\n\r\n";
        assert_eq!(advance_all(&mut parser, next), Advance::Complete);
        assert_eq!(parser.head().target, "/b");
    }
}
