use std::fs::File;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::buffer::ByteBuffer;
use weblog::debug;

fn code_status(code: u16) -> Option<&'static str> {
    match code {
        200 => Some("OK"),
        400 => Some("Bad Request"),
        403 => Some("Forbidden"),
        404 => Some("Not Found"),
        _ => None,
    }
}

fn code_path(code: u16) -> Option<&'static str> {
    match code {
        400 => Some("/400.html"),
        403 => Some("/403.html"),
        404 => Some("/404.html"),
        _ => None,
    }
}

fn suffix_mime(path: &str) -> &'static str {
    let Some(idx) = path.rfind('.') else {
        return "text/plain";
    };
    match &path[idx..] {
        ".html" => "text/html",
        ".xml" => "text/xml",
        ".xhtml" => "application/xhtml+xml",
        ".txt" => "text/plain",
        ".rtf" => "application/rtf",
        ".pdf" => "application/pdf",
        ".word" => "application/nsword",
        ".png" => "image/png",
        ".gif" => "image/gif",
        ".jpg" => "image/jpeg",
        ".jpeg" => "image/jpeg",
        ".au" => "audio/basic",
        ".mpeg" => "video/mpeg",
        ".mpg" => "video/mpeg",
        ".avi" => "video/x-msvideo",
        ".gz" => "application/x-gzip",
        ".tar" => "application/x-tar",
        // Trailing space preserved to match the reference table (§6).
        ".css" => "text/css ",
        ".js" => "text/javascript ",
        _ => "text/plain",
    }
}

/// Status/header/body builder with zero-copy file mapping, adapted from the
/// reference server's `HttpResponse` (`httpresponse.h`/.cpp).
pub struct HttpResponse {
    code: Option<u16>,
    path: String,
    src_dir: PathBuf,
    keep_alive: bool,
    mapped: Option<Mmap>,
}

impl Default for HttpResponse {
    fn default() -> Self {
        HttpResponse {
            code: None,
            path: String::new(),
            src_dir: PathBuf::new(),
            keep_alive: false,
            mapped: None,
        }
    }
}

impl HttpResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unmaps any previously held file before re-initializing for a new
    /// request cycle, mirroring `HttpResponse::Init`.
    pub fn init(&mut self, src_dir: PathBuf, path: String, keep_alive: bool, code: Option<u16>) {
        self.unmap_file();
        self.src_dir = src_dir;
        self.path = path;
        self.keep_alive = keep_alive;
        self.code = code;
    }

    pub fn mapped_file(&self) -> Option<&[u8]> {
        self.mapped.as_deref()
    }

    pub fn status_code(&self) -> Option<u16> {
        self.code
    }

    fn full_path(&self) -> PathBuf {
        let trimmed = self.path.trim_start_matches('/');
        self.src_dir.join(trimmed)
    }

    /// Builds the full response into `buf`: stat → error-page rewrite →
    /// status line → headers → body, exactly the five steps of
    /// `MakeResponse` (§4.7).
    pub fn make_response(&mut self, buf: &mut ByteBuffer) {
        let target = self.full_path();
        match std::fs::metadata(&target) {
            Ok(meta) if meta.is_dir() => self.code = Some(404),
            Ok(meta) if !world_readable(&meta) => self.code = Some(403),
            Ok(_) => {
                if self.code.is_none() {
                    self.code = Some(200);
                }
            }
            Err(_) => self.code = Some(404),
        }
        self.rewrite_error_page();
        self.add_status_line(buf);
        self.add_headers(buf);
        self.add_content(buf);
    }

    fn rewrite_error_page(&mut self) {
        if let Some(code) = self.code {
            if let Some(page) = code_path(code) {
                self.path = page.to_string();
            }
        }
    }

    fn add_status_line(&mut self, buf: &mut ByteBuffer) {
        let code = self.code.unwrap_or(400);
        let status = code_status(code).unwrap_or_else(|| {
            self.code = Some(400);
            code_status(400).unwrap()
        });
        let code = self.code.unwrap();
        buf.append(format!("HTTP/1.1 {code} {status}\r\n").as_bytes());
    }

    fn add_headers(&self, buf: &mut ByteBuffer) {
        buf.append(b"Connection: ");
        if self.keep_alive {
            buf.append(b"keep-alive\r\n");
            buf.append(b"keep-alive: max=6, timeout=120\r\n");
        } else {
            buf.append(b"close\r\n");
        }
        buf.append(format!("Content-type: {}\r\n", suffix_mime(&self.path)).as_bytes());
    }

    fn add_content(&mut self, buf: &mut ByteBuffer) {
        let target = self.full_path();
        let file = match File::open(&target) {
            Ok(f) => f,
            Err(_) => {
                self.error_content(buf, "File NotFound!");
                return;
            }
        };
        debug!("file path {:?}", target);
        let len = match file.metadata() {
            Ok(m) => m.len(),
            Err(_) => {
                self.error_content(buf, "File NotFound!");
                return;
            }
        };
        if len == 0 {
            self.mapped = None;
            buf.append(b"Content-length: 0\r\n\r\n");
            return;
        }
        let mmap = match unsafe { Mmap::map(&file) } {
            Ok(m) => m,
            Err(_) => {
                self.error_content(buf, "File NotFound!");
                return;
            }
        };
        buf.append(format!("Content-length: {len}\r\n\r\n").as_bytes());
        self.mapped = Some(mmap);
    }

    fn error_content(&mut self, buf: &mut ByteBuffer, message: &str) {
        let status = self.code.and_then(code_status).unwrap_or("Bad Request");
        let code = self.code.unwrap_or(400);
        let body = format!(
            "<html><title>Error</title><body bgcolor=\"ffffff\">{code} : {status}\n<p>{message}</p><hr><em>TinyWebServer</em></body></html>"
        );
        buf.append(format!("Content-length: {}\r\n\r\n", body.len()).as_bytes());
        buf.append(body.as_bytes());
        self.mapped = None;
    }

    /// Idempotent; must be called before a response is reset or its
    /// connection is torn down, per §4.7's invariant on `mapped-file-ptr`.
    pub fn unmap_file(&mut self) {
        self.mapped = None;
    }
}

#[cfg(unix)]
fn world_readable(meta: &std::fs::Metadata) -> bool {
    meta.mode() & 0o004 != 0
}

#[cfg(not(unix))]
fn world_readable(_meta: &std::fs::Metadata) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("webserver-response-test-{}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        dir
    }

    #[test]
    fn serves_existing_file_with_200() {
        let dir = tempdir();
        std::fs::write(dir.join("index.html"), b"<html>hi</html>").unwrap();
        let mut resp = HttpResponse::new();
        resp.init(dir.clone(), "/index.html".to_string(), false, None);
        let mut buf = ByteBuffer::new();
        resp.make_response(&mut buf);
        assert_eq!(resp.status_code(), Some(200));
        let out = String::from_utf8_lossy(buf.peek()).into_owned();
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.contains("Content-type: text/html"));
        assert!(out.contains("Connection: close"));
        assert_eq!(resp.mapped_file().unwrap(), b"<html>hi</html>");
    }

    #[test]
    fn missing_file_is_404() {
        let dir = tempdir();
        let mut resp = HttpResponse::new();
        resp.init(dir, "/does-not-exist.html".to_string(), false, None);
        let mut buf = ByteBuffer::new();
        resp.make_response(&mut buf);
        assert_eq!(resp.status_code(), Some(404));
        let out = String::from_utf8_lossy(buf.peek()).into_owned();
        assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn unknown_code_forced_to_400() {
        let dir = tempdir();
        std::fs::write(dir.join("x.html"), b"x").unwrap();
        let mut resp = HttpResponse::new();
        resp.init(dir, "/x.html".to_string(), false, Some(999));
        let mut buf = ByteBuffer::new();
        resp.make_response(&mut buf);
        assert_eq!(resp.status_code(), Some(400));
    }

    #[test]
    fn css_and_js_mime_types_keep_trailing_space() {
        assert_eq!(suffix_mime("/a.css"), "text/css ");
        assert_eq!(suffix_mime("/a.js"), "text/javascript ");
    }

    #[test]
    fn keep_alive_headers_are_emitted_when_requested() {
        let dir = tempdir();
        std::fs::write(dir.join("index.html"), b"ok").unwrap();
        let mut resp = HttpResponse::new();
        resp.init(dir, "/index.html".to_string(), true, None);
        let mut buf = ByteBuffer::new();
        resp.make_response(&mut buf);
        let out = String::from_utf8_lossy(buf.peek()).into_owned();
        assert!(out.contains("Connection: keep-alive\r\n"));
        assert!(out.contains("keep-alive: max=6, timeout=120\r\n"));
    }
}
