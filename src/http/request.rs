/// HTTP request methods accepted by the engine.
///
/// Only GET and POST are supported; anything else fails request-line
/// parsing. POST marks the request as carrying a form body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    /// Parses a method token, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("GET") {
            Some(Method::Get)
        } else if s.eq_ignore_ascii_case("POST") {
            Some(Method::Post)
        } else {
            None
        }
    }
}

impl Default for Method {
    fn default() -> Self {
        Method::Get
    }
}

/// The parsed request line plus the headers of interest.
///
/// Populated incrementally by the parser; only valid once the main state
/// machine reports a complete request.
#[derive(Debug, Clone, Default)]
pub struct RequestHead {
    pub method: Method,
    /// Request target, always beginning with `/` (a bare `/` has already
    /// been rewritten to the landing page).
    pub target: String,
    /// Set by `Connection: keep-alive`.
    pub keep_alive: bool,
    /// Value of `Content-Length`, zero when absent.
    pub content_length: usize,
    /// Value of `Host`, when present.
    pub host: Option<String>,
}

/// Extracts the username and password from a login/registration body of
/// the form `user=NAME&password=WORD` (a trailing `&` is tolerated).
pub fn parse_form(body: &[u8]) -> Option<(String, String)> {
    let text = std::str::from_utf8(body).ok()?;
    let mut user = None;
    let mut password = None;
    for pair in text.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=')?;
        match key {
            "user" => user = Some(value.to_string()),
            "password" => password = Some(value.to_string()),
            _ => {}
        }
    }
    Some((user?, password?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_with_both_fields() {
        let (user, password) = parse_form(b"user=bob&password=hunter2").unwrap();
        assert_eq!(user, "bob");
        assert_eq!(password, "hunter2");
    }

    #[test]
    fn form_missing_password_is_rejected() {
        assert!(parse_form(b"user=bob").is_none());
        assert!(parse_form(b"password=x").is_none());
        assert!(parse_form(b"").is_none());
    }

    #[test]
    fn form_ignores_unknown_keys() {
        let (user, password) = parse_form(b"csrf=tok&user=a&password=b").unwrap();
        assert_eq!(user, "a");
        assert_eq!(password, "b");
    }
}
