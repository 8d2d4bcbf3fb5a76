use std::collections::HashMap;

use crate::buffer::ByteBuffer;
use crate::db::DbPool;
use weblog::{debug, warn};

const DEFAULT_HTML: &[&str] = &["/index", "/register", "/login", "/welcome", "/video", "/picture"];

/// tag 0 = register, tag 1 = login.
fn default_html_tag(path: &str) -> Option<u8> {
    match path {
        "/register.html" => Some(0),
        "/login.html" => Some(1),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    RequestLine,
    Headers,
    Body,
    Finish,
}

impl Default for ParserState {
    fn default() -> Self {
        ParserState::RequestLine
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    NotApplicable,
    Success,
    Failure,
}

/// Line-oriented HTTP/1.1 request parser, adapted from the reference
/// server's `HttpRequest` (`httprequest.h`/.cpp).
#[derive(Debug, Default)]
pub struct HttpRequest {
    pub state: ParserState,
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub post: HashMap<String, String>,
}

impl HttpRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets to a fresh request cycle; called on keep-alive reuse.
    pub fn init(&mut self) {
        self.state = ParserState::RequestLine;
        self.method.clear();
        self.path.clear();
        self.version.clear();
        self.headers.clear();
        self.body.clear();
        self.post.clear();
    }

    pub fn parser_state(&self) -> ParserState {
        self.state
    }

    /// Case-insensitive per the resolved Connection-header open question
    /// (§9 of the distilled spec): the reference only honors exact-case
    /// `Connection`.
    pub fn is_keep_alive(&self) -> bool {
        if self.version != "1.1" {
            return false;
        }
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("connection"))
            .map(|(_, v)| v.eq_ignore_ascii_case("keep-alive"))
            .unwrap_or(false)
    }

    /// Drives the state machine across CRLF-delimited lines in `buf`,
    /// mirroring `HttpRequest::parse`. Returns `false` on a malformed
    /// request line.
    pub fn parse(&mut self, buf: &mut ByteBuffer) -> bool {
        const CRLF: &[u8] = b"\r\n";
        if buf.readable_bytes() == 0 {
            return false;
        }
        while buf.readable_bytes() > 0 && self.state != ParserState::Finish {
            let readable = buf.peek();
            let line_end = find_subsequence(readable, CRLF);
            let (line, consumed_to_end) = match line_end {
                Some(pos) => (readable[..pos].to_vec(), pos + CRLF.len()),
                None => (readable.to_vec(), readable.len()),
            };
            let line = String::from_utf8_lossy(&line).into_owned();

            match self.state {
                ParserState::RequestLine => {
                    if !self.parse_request_line(&line) {
                        return false;
                    }
                    self.normalize_path();
                }
                ParserState::Headers => {
                    self.parse_header(&line);
                    if buf.readable_bytes() <= 2 {
                        self.state = ParserState::Finish;
                    }
                }
                ParserState::Body => {
                    self.body = line.clone();
                    self.decode_form_if_applicable();
                    self.state = ParserState::Finish;
                    debug!("Body:{}, len:{}", self.body, self.body.len());
                }
                ParserState::Finish => break,
            }

            if line_end.is_none() {
                break;
            }
            buf.retrieve(consumed_to_end);
        }
        debug!("[{}], [{}], [{}]", self.method, self.path, self.version);
        true
    }

    fn parse_request_line(&mut self, line: &str) -> bool {
        let mut parts = line.splitn(3, ' ');
        let (Some(method), Some(path), Some(version_field)) =
            (parts.next(), parts.next(), parts.next())
        else {
            warn!("RequestLine error");
            return false;
        };
        let Some(version) = version_field.strip_prefix("HTTP/") else {
            warn!("RequestLine error");
            return false;
        };
        self.method = method.to_string();
        self.path = path.to_string();
        self.version = version.to_string();
        self.state = ParserState::Headers;
        true
    }

    /// `^([^:]*): ?(.*)$` — at most one space after the colon is part of the
    /// separator; further leading spaces belong to the value. A line with no
    /// colon is the blank terminator, so it ends the header section.
    fn parse_header(&mut self, line: &str) {
        match line.split_once(':') {
            Some((name, value)) => {
                let value = value.strip_prefix(' ').unwrap_or(value);
                self.headers.insert(name.to_string(), value.to_string());
            }
            None => self.state = ParserState::Body,
        }
    }

    fn normalize_path(&mut self) {
        if self.path == "/" {
            self.path = "/index.html".to_string();
        } else if DEFAULT_HTML.contains(&self.path.as_str()) {
            self.path.push_str(".html");
        }
    }

    fn decode_form_if_applicable(&mut self) {
        if self.method != "POST" {
            return;
        }
        if self.headers.get("Content-Type").map(String::as_str)
            != Some("application/x-www-form-urlencoded")
        {
            return;
        }
        self.parse_urlencoded();
    }

    /// Reproduces the reference decoder's quirk byte-for-byte (§9, resolved
    /// as bug-compatible): `%HH` is replaced in place by the two ASCII
    /// decimal digits of `16*hi + lo`, not the decoded byte itself.
    fn parse_urlencoded(&mut self) {
        if self.body.is_empty() {
            return;
        }
        let mut bytes = self.body.clone().into_bytes();
        let n = bytes.len();
        let mut key = String::new();
        let mut i = 0usize;
        let mut j = 0usize;
        while i < n {
            match bytes[i] {
                b'=' => {
                    key = String::from_utf8_lossy(&bytes[j..i]).into_owned();
                    j = i + 1;
                }
                b'+' => {
                    bytes[i] = b' ';
                }
                b'%' if i + 2 < n => {
                    let num = hex_digit(bytes[i + 1]) * 16 + hex_digit(bytes[i + 2]);
                    bytes[i + 2] = b'0' + (num % 10);
                    bytes[i + 1] = b'0' + (num / 10);
                    i += 2;
                }
                b'&' => {
                    let value = String::from_utf8_lossy(&bytes[j..i]).into_owned();
                    j = i + 1;
                    debug!("{} = {}", key, value);
                    self.post.insert(key.clone(), value);
                }
                _ => {}
            }
            i += 1;
        }
        if !self.post.contains_key(&key) && j < i {
            let value = String::from_utf8_lossy(&bytes[j..i]).into_owned();
            self.post.insert(key, value);
        }
    }

    /// After a finished parse, performs the DB-backed register/login
    /// dispatch and rewrites `path` to `/welcome.html` or `/error.html`.
    /// Split out from `parse` so the parser itself stays unit-testable
    /// without a live database (the parser/responder boundary spec.md
    /// draws; the DB is "invoked only behind the connection-pool façade").
    pub fn resolve_route(&mut self, db: &DbPool) -> VerifyOutcome {
        let Some(tag) = default_html_tag(&self.path) else {
            return VerifyOutcome::NotApplicable;
        };
        if self.method != "POST"
            || self.headers.get("Content-Type").map(String::as_str)
                != Some("application/x-www-form-urlencoded")
        {
            return VerifyOutcome::NotApplicable;
        }
        let is_login = tag == 1;
        let username = self.post.get("username").cloned().unwrap_or_default();
        let password = self.post.get("password").cloned().unwrap_or_default();
        let ok = verify_user(db, &username, &password, is_login);
        self.path = if ok {
            "/welcome.html".to_string()
        } else {
            "/error.html".to_string()
        };
        if ok {
            VerifyOutcome::Success
        } else {
            VerifyOutcome::Failure
        }
    }
}

fn hex_digit(ch: u8) -> u8 {
    match ch {
        b'A'..=b'F' => ch - b'A' + 10,
        b'a'..=b'f' => ch - b'a' + 10,
        b'0'..=b'9' => ch - b'0',
        _ => 0,
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// `SELECT`/`INSERT` against `user(username, password)`, mirroring
/// `HttpRequest::UserVerify`. Unlike the reference, a failed `INSERT` is
/// surfaced as a failure rather than being masked by an unconditional
/// `flag = true` (§9, resolved Open Question).
fn verify_user(db: &DbPool, name: &str, pwd: &str, is_login: bool) -> bool {
    use mysql::prelude::Queryable;

    if name.is_empty() || pwd.is_empty() {
        return false;
    }
    let mut conn = db.acquire();
    let escaped_name = name.replace('\'', "''");
    let query = format!(
        "SELECT username, password FROM user WHERE username='{}' LIMIT 1",
        escaped_name
    );
    let rows: Vec<(String, String)> = match conn.query(query) {
        Ok(rows) => rows,
        Err(_) => return false,
    };

    if is_login {
        return rows
            .first()
            .map(|(_, password)| password == pwd)
            .unwrap_or(false);
    }

    if !rows.is_empty() {
        return false;
    }
    let insert = format!(
        "INSERT INTO user(username, password) VALUES('{}','{}')",
        escaped_name,
        pwd.replace('\'', "''")
    );
    conn.query_drop(insert).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(raw: &[u8]) -> HttpRequest {
        let mut buf = ByteBuffer::new();
        buf.append(raw);
        let mut req = HttpRequest::new();
        req.parse(&mut buf);
        req
    }

    #[test]
    fn parses_simple_get_request_line() {
        let req = feed(b"GET /index HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n");
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/index.html");
        assert_eq!(req.version, "1.1");
        assert_eq!(req.parser_state(), ParserState::Finish);
        assert!(!req.is_keep_alive());
    }

    #[test]
    fn header_value_keeps_extra_leading_spaces_beyond_the_one_after_colon() {
        let req = feed(b"GET /index HTTP/1.1\r\nX-Custom:  v\r\nConnection: close\r\n\r\n");
        assert_eq!(req.headers.get("X-Custom").map(String::as_str), Some(" v"));
    }

    #[test]
    fn root_path_rewrites_to_index_html() {
        let req = feed(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n");
        assert_eq!(req.path, "/index.html");
    }

    #[test]
    fn keep_alive_is_case_insensitive_on_header_name() {
        let req = feed(b"GET /index HTTP/1.1\r\nconnection: keep-alive\r\n\r\n");
        assert!(req.is_keep_alive());
    }

    #[test]
    fn malformed_request_line_fails_parse() {
        let mut buf = ByteBuffer::new();
        buf.append(b"NOT A REQUEST LINE\r\n\r\n");
        let mut req = HttpRequest::new();
        assert!(!req.parse(&mut buf));
    }

    #[test]
    fn urlencoded_body_is_split_into_post_fields() {
        let mut buf = ByteBuffer::new();
        buf.append(
            b"POST /other HTTP/1.1\r\n\
Content-Type: application/x-www-form-urlencoded\r\n\
Content-Length: 27\r\n\r\n\
username=alice&password=hi",
        );
        let mut req = HttpRequest::new();
        req.parse(&mut buf);
        assert_eq!(req.post.get("username").map(String::as_str), Some("alice"));
        assert_eq!(req.post.get("password").map(String::as_str), Some("hi"));
    }

    #[test]
    fn percent_decode_reproduces_reference_quirk() {
        // '%41' => hi='4'(4) lo='1'(1) => num = 65 => digits '6','5' overwrite
        // the two bytes following '%', not a real 'A'.
        let mut buf = ByteBuffer::new();
        buf.append(
            b"POST /x HTTP/1.1\r\n\
Content-Type: application/x-www-form-urlencoded\r\n\r\n\
k=%41",
        );
        let mut req = HttpRequest::new();
        req.parse(&mut buf);
        assert_eq!(req.post.get("k").map(String::as_str), Some("65"));
    }

    #[test]
    fn plus_decodes_to_literal_space() {
        let mut buf = ByteBuffer::new();
        buf.append(
            b"POST /x HTTP/1.1\r\n\
Content-Type: application/x-www-form-urlencoded\r\n\r\n\
k=a+b",
        );
        let mut req = HttpRequest::new();
        req.parse(&mut buf);
        assert_eq!(req.post.get("k").map(String::as_str), Some("a b"));
    }
}
