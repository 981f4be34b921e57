//! Per-socket connection state: read buffer, parser, response buffers,
//! and the optional file mapping.

use crate::auth::{CredentialStore, InsertOutcome};
use crate::config::TriggerMode;
use crate::http::SiteContext;
use crate::http::parser::{Advance, Parser};
use crate::http::request::{self, Method};
use crate::http::response::{self, StatusCode};
use crate::http::routes::RouteAction;
use bytes::BytesMut;
use memmap2::Mmap;
use std::fs::File;
use std::io::{ErrorKind, IoSlice, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};

/// Classification of one parsed request, driving response assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    NoRequest,
    File,
    Bad,
    NoResource,
    Forbidden,
    Internal,
}

/// What the connection needs next; the event loop re-arms or tears down
/// accordingly after each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    AwaitRead,
    AwaitWrite,
    Closing,
}

pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    trigger: TriggerMode,
    read_buf: Box<[u8]>,
    read_idx: usize,
    parser: Parser,
    write_buf: BytesMut,
    sent: usize,
    to_send: usize,
    file: Option<Mmap>,
    keep_alive: bool,
    status: ConnStatus,
}

impl Connection {
    /// Wraps an accepted socket. The stream must already be nonblocking.
    pub fn new(stream: TcpStream, peer: SocketAddr, trigger: TriggerMode, read_cap: usize) -> Self {
        Self {
            stream,
            peer,
            trigger,
            read_buf: vec![0u8; read_cap].into_boxed_slice(),
            read_idx: 0,
            parser: Parser::new(),
            write_buf: BytesMut::new(),
            sent: 0,
            to_send: 0,
            file: None,
            keep_alive: false,
            status: ConnStatus::AwaitRead,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn status(&self) -> ConnStatus {
        self.status
    }

    /// Pulls available bytes into the read buffer: one read when level
    /// triggered, drain until `WouldBlock` when edge triggered. `false`
    /// means peer close, a hard error, or a buffer-overflowing request.
    pub fn read_from_socket(&mut self) -> bool {
        if self.read_idx >= self.read_buf.len() {
            return false;
        }
        loop {
            match self.stream.read(&mut self.read_buf[self.read_idx..]) {
                Ok(0) => return false,
                Ok(n) => {
                    self.read_idx += n;
                    if self.trigger == TriggerMode::Level || self.read_idx == self.read_buf.len() {
                        return true;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    // Under level triggering the kernel promised data, so
                    // nothing arriving means the notification was consumed
                    // elsewhere; treat it like a failed read.
                    return self.trigger == TriggerMode::Edge;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!(peer = %self.peer, error = %e, "read failed");
                    return false;
                }
            }
        }
    }

    /// One parse/resolve/respond step over whatever the read buffer holds.
    pub fn process(&mut self, site: &SiteContext, creds: &CredentialStore) {
        let outcome = match self
            .parser
            .advance(&self.read_buf, self.read_idx, &site.landing_page)
        {
            Advance::Incomplete => RequestOutcome::NoRequest,
            Advance::Malformed => RequestOutcome::Bad,
            Advance::Complete => self.resolve(site, creds),
        };
        if outcome == RequestOutcome::NoRequest {
            self.status = ConnStatus::AwaitRead;
            return;
        }
        self.build_response(outcome);
        self.status = ConnStatus::AwaitWrite;
    }

    fn resolve(&mut self, site: &SiteContext, creds: &CredentialStore) -> RequestOutcome {
        let head = self.parser.head();
        let method = head.method;
        let mut target = head.target.clone();

        let segment_start = target.rfind('/').map(|i| i + 1).unwrap_or(0);
        let prefix = target[segment_start..].chars().next();
        if let Some(digit) = prefix.filter(char::is_ascii_digit) {
            match site.routes.action(digit) {
                Some(RouteAction::Login) if method == Method::Post => {
                    let body = &self.read_buf[self.parser.body_range()];
                    let Some((user, password)) = request::parse_form(body) else {
                        return RequestOutcome::Bad;
                    };
                    target = if creds.verify(&user, &password) {
                        site.routes.welcome_page.clone()
                    } else {
                        site.routes.login_error_page.clone()
                    };
                }
                Some(RouteAction::Register) if method == Method::Post => {
                    let body = &self.read_buf[self.parser.body_range()];
                    let Some((user, password)) = request::parse_form(body) else {
                        return RequestOutcome::Bad;
                    };
                    target = match creds.insert(&user, &password) {
                        InsertOutcome::Inserted => site.routes.register_ok_page.clone(),
                        InsertOutcome::Duplicate => site.routes.register_conflict_page.clone(),
                    };
                }
                Some(RouteAction::Page(page)) => target = page.clone(),
                // Login/Register via GET, or an unmapped digit: fall
                // through to a literal file lookup.
                _ => {}
            }
        }

        let Some(path) = resolve_under_root(&site.doc_root, &target) else {
            return RequestOutcome::Bad;
        };
        let meta = match std::fs::metadata(&path) {
            Ok(meta) => meta,
            Err(_) => return RequestOutcome::NoResource,
        };
        if meta.mode() & 0o004 == 0 {
            return RequestOutcome::Forbidden;
        }
        if meta.is_dir() {
            return RequestOutcome::Bad;
        }
        if meta.len() == 0 {
            // A zero-length file cannot be mapped; answered inline.
            self.file = None;
            return RequestOutcome::File;
        }
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "open failed");
                return RequestOutcome::Internal;
            }
        };
        match unsafe { Mmap::map(&file) } {
            Ok(map) => {
                self.file = Some(map);
                RequestOutcome::File
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "mmap failed");
                RequestOutcome::Internal
            }
        }
    }

    fn build_response(&mut self, outcome: RequestOutcome) {
        // Protocol and server errors are terminal regardless of the
        // Connection header; resource errors follow normal persistence.
        self.keep_alive = match outcome {
            RequestOutcome::Bad | RequestOutcome::Internal => false,
            _ => self.parser.head().keep_alive,
        };
        match outcome {
            RequestOutcome::File => match &self.file {
                Some(map) => {
                    let file_len = map.len();
                    response::write_head(&mut self.write_buf, StatusCode::Ok, file_len, self.keep_alive);
                    self.to_send = self.write_buf.len() + file_len;
                }
                None => {
                    let body = response::EMPTY_PAGE;
                    response::write_head(&mut self.write_buf, StatusCode::Ok, body.len(), self.keep_alive);
                    self.write_buf.extend_from_slice(body.as_bytes());
                    self.to_send = self.write_buf.len();
                }
            },
            RequestOutcome::Bad => self.error_response(StatusCode::BadRequest),
            RequestOutcome::NoResource => self.error_response(StatusCode::NotFound),
            RequestOutcome::Forbidden => self.error_response(StatusCode::Forbidden),
            RequestOutcome::Internal => self.error_response(StatusCode::InternalError),
            RequestOutcome::NoRequest => unreachable!("no response for an incomplete request"),
        }
        self.sent = 0;
    }

    fn error_response(&mut self, status: StatusCode) {
        let body = status.error_body();
        response::write_head(&mut self.write_buf, status, body.len(), self.keep_alive);
        self.write_buf.extend_from_slice(body.as_bytes());
        self.to_send = self.write_buf.len();
    }

    /// Drains the response with scatter writes: segment 0 is the head
    /// buffer (plus any inline body), segment 1 the mapped file.
    pub fn write_to_socket(&mut self) {
        loop {
            if self.sent >= self.to_send {
                self.finish_response();
                return;
            }
            let result = {
                let head_len = self.write_buf.len();
                let mut bufs: [IoSlice; 2] = [IoSlice::new(&[]), IoSlice::new(&[])];
                let mut count = 0;
                if self.sent < head_len {
                    bufs[count] = IoSlice::new(&self.write_buf[self.sent..]);
                    count += 1;
                }
                if let Some(map) = &self.file {
                    let offset = self.sent.saturating_sub(head_len);
                    if offset < map.len() {
                        bufs[count] = IoSlice::new(&map[offset..]);
                        count += 1;
                    }
                }
                self.stream.write_vectored(&bufs[..count])
            };
            match result {
                Ok(n) => self.sent += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    self.status = ConnStatus::AwaitWrite;
                    return;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::debug!(peer = %self.peer, error = %e, "write failed");
                    self.file = None;
                    self.status = ConnStatus::Closing;
                    return;
                }
            }
        }
    }

    fn finish_response(&mut self) {
        self.file = None;
        if self.keep_alive {
            self.reset();
            self.status = ConnStatus::AwaitRead;
        } else {
            self.status = ConnStatus::Closing;
        }
    }

    fn reset(&mut self) {
        self.read_idx = 0;
        self.parser.reset();
        self.write_buf.clear();
        self.sent = 0;
        self.to_send = 0;
        self.keep_alive = false;
    }
}

/// Joins `target` onto the document root, refusing any path that could
/// escape it.
fn resolve_under_root(root: &Path, target: &str) -> Option<PathBuf> {
    let relative = target.trim_start_matches('/');
    let relative = Path::new(relative);
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => return None,
        }
    }
    Some(root.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_paths_join_under_root() {
        let root = Path::new("/srv/site");
        assert_eq!(
            resolve_under_root(root, "/log.html"),
            Some(PathBuf::from("/srv/site/log.html"))
        );
        assert_eq!(
            resolve_under_root(root, "/img/a.png"),
            Some(PathBuf::from("/srv/site/img/a.png"))
        );
    }

    #[test]
    fn traversal_is_refused() {
        let root = Path::new("/srv/site");
        assert_eq!(resolve_under_root(root, "/../etc/passwd"), None);
        assert_eq!(resolve_under_root(root, "/a/../../b"), None);
    }
}
