use bytes::BytesMut;
use std::fmt::Write;

pub const HTTP_VERSION: &str = "HTTP/1.1";

/// Served when the connection table is full: a complete pre-rendered
/// response written best-effort before the socket is dropped.
pub const BUSY_RESPONSE: &[u8] =
    b"HTTP/1.1 500 Internal Error\r\nContent-Length: 20\r\nConnection: close\r\n\r\nInternal server busy";

/// Body of a 200 response for a zero-length file, which cannot be mapped.
pub const EMPTY_PAGE: &str = "<html><body></body></html>";

const ERROR_400_BODY: &str = "Your request has bad syntax or is inherently impossible to satisfy.\n";
const ERROR_403_BODY: &str = "You do not have permission to get file from this server.\n";
const ERROR_404_BODY: &str = "The requested file was not found on this server.\n";
const ERROR_500_BODY: &str = "There was an unusual problem serving the requested file.\n";

/// HTTP status codes emitted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 200 OK
    Ok,
    /// 400 Bad Request
    BadRequest,
    /// 403 Forbidden
    Forbidden,
    /// 404 Not Found
    NotFound,
    /// 500 Internal Error
    InternalError,
}

impl StatusCode {
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::BadRequest => 400,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::InternalError => 500,
        }
    }

    /// Returns the reason phrase used on the status line.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::InternalError => "Internal Error",
        }
    }

    /// The fixed inline body sent with an error status; empty for `Ok`.
    pub fn error_body(&self) -> &'static str {
        match self {
            StatusCode::Ok => "",
            StatusCode::BadRequest => ERROR_400_BODY,
            StatusCode::Forbidden => ERROR_403_BODY,
            StatusCode::NotFound => ERROR_404_BODY,
            StatusCode::InternalError => ERROR_500_BODY,
        }
    }
}

/// Appends a full response head to `buf`: status line, `Content-Length`,
/// `Connection`, and the terminating blank line.
pub fn write_head(buf: &mut BytesMut, status: StatusCode, content_length: usize, keep_alive: bool) {
    let connection = if keep_alive { "keep-alive" } else { "close" };
    let _ = write!(
        buf,
        "{} {} {}\r\nContent-Length: {}\r\nConnection: {}\r\n\r\n",
        HTTP_VERSION,
        status.as_u16(),
        status.reason_phrase(),
        content_length,
        connection,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_layout() {
        let mut buf = BytesMut::new();
        write_head(&mut buf, StatusCode::Ok, 42, true);
        assert_eq!(
            &buf[..],
            b"HTTP/1.1 200 OK\r\nContent-Length: 42\r\nConnection: keep-alive\r\n\r\n"
        );
    }

    #[test]
    fn close_head() {
        let mut buf = BytesMut::new();
        write_head(&mut buf, StatusCode::NotFound, 7, false);
        let text = std::str::from_utf8(&buf).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn busy_response_is_well_formed() {
        let text = std::str::from_utf8(BUSY_RESPONSE).unwrap();
        assert!(text.starts_with("HTTP/1.1 500 Internal Error\r\n"));
        let body = text.split("\r\n\r\n").nth(1).unwrap();
        assert_eq!(body.len(), 20);
    }
}
