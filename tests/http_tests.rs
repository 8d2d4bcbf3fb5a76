use webserver::buffer::ByteBuffer;
use webserver::http::{HttpRequest, HttpResponse, ParserState};

fn feed(raw: &[u8]) -> HttpRequest {
    let mut buf = ByteBuffer::new();
    buf.append(raw);
    let mut req = HttpRequest::new();
    req.parse(&mut buf);
    req
}

#[test]
fn test_static_get_request_parses_to_finish() {
    let req = feed(b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n");
    assert_eq!(req.parser_state(), ParserState::Finish);
    assert_eq!(req.method, "GET");
    assert_eq!(req.path, "/index.html");
    assert!(!req.is_keep_alive());
}

#[test]
fn test_keep_alive_request_is_detected() {
    let req = feed(b"GET /index HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
    assert!(req.is_keep_alive());
}

#[test]
fn test_register_tag_routes_are_form_paths() {
    let req = feed(b"GET /register HTTP/1.1\r\nConnection: close\r\n\r\n");
    assert_eq!(req.path, "/register.html");
}

fn resources_dir() -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "webserver-http-tests-{}-{}",
        std::process::id(),
        line!()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_full_request_and_response_round_trip_for_static_get() {
    let dir = resources_dir();
    std::fs::write(dir.join("index.html"), b"hello world").unwrap();

    let req = feed(b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n");
    assert_eq!(req.path, "/index.html");

    let mut resp = HttpResponse::new();
    resp.init(dir, req.path.clone(), req.is_keep_alive(), None);
    let mut out = ByteBuffer::new();
    resp.make_response(&mut out);

    let rendered = String::from_utf8_lossy(out.peek()).into_owned();
    assert!(rendered.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(rendered.contains("Content-type: text/html\r\n"));
    assert!(rendered.contains("Connection: close\r\n"));
    assert_eq!(resp.mapped_file().unwrap(), b"hello world");
}

#[test]
fn test_not_found_falls_back_to_inline_error_body_when_no_error_page() {
    let dir = resources_dir();
    let req = feed(b"GET /nope HTTP/1.1\r\nConnection: close\r\n\r\n");

    let mut resp = HttpResponse::new();
    resp.init(dir, req.path.clone(), false, None);
    let mut out = ByteBuffer::new();
    resp.make_response(&mut out);

    let rendered = String::from_utf8_lossy(out.peek()).into_owned();
    assert!(rendered.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(rendered.contains("404 : Not Found"));
}
