use std::io::{self, ErrorKind, IoSlice, Read, Write};
use std::net::SocketAddr;
use std::path::PathBuf;

use mio::Token;
use mio::net::TcpStream;

use crate::buffer::ByteBuffer;
use crate::db::DbPool;
use crate::http::{HttpRequest, HttpResponse, ParserState};
use weblog::debug;

const WRITE_DRAIN_THRESHOLD: usize = 10 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Reading,
    Writing,
    Closing,
}

/// Outcome of one `handle_read_phase` call, told to the Reactor so it knows
/// which interest to re-arm.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    NeedMoreData,
    ResponseReady,
    Closed,
}

#[derive(Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    WouldBlock,
    Finished,
    Closed,
}

/// Per-client I/O state machine wrapping buffers and parser, adapted from
/// the reference server's `HttpConn` (`httpconn.h`/.cpp), pared down to the
/// static-file + form-endpoint surface this server exposes (no CGI, no
/// uploads, no sessions — out of scope per §1).
pub struct Connection {
    pub stream: TcpStream,
    pub token: Token,
    pub addr: SocketAddr,
    pub state: ConnState,
    read_buf: ByteBuffer,
    write_buf: ByteBuffer,
    request: HttpRequest,
    response: HttpResponse,
    file_offset: usize,
    resource_dir: PathBuf,
    edge_triggered_read: bool,
    edge_triggered_write: bool,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        token: Token,
        addr: SocketAddr,
        resource_dir: PathBuf,
        edge_triggered: bool,
    ) -> Self {
        Connection {
            stream,
            token,
            addr,
            state: ConnState::Reading,
            read_buf: ByteBuffer::new(),
            write_buf: ByteBuffer::new(),
            request: HttpRequest::new(),
            response: HttpResponse::new(),
            file_offset: 0,
            resource_dir,
            edge_triggered_read: edge_triggered,
            edge_triggered_write: edge_triggered,
        }
    }

    pub fn should_close(&self) -> bool {
        self.state == ConnState::Closing
    }

    /// Drains the socket (looping until `EAGAIN` under edge-triggering,
    /// otherwise a single attempt) and advances the parser. Mirrors
    /// `HttpConn::read` + `WebServer::OnProcess`.
    pub fn handle_read_phase(&mut self, db: &DbPool) -> ReadOutcome {
        loop {
            match self.read_buf.read_from_fd(&mut self.stream) {
                Ok(0) => return ReadOutcome::Closed,
                Ok(_) => {
                    if !self.edge_triggered_read {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(_) => return ReadOutcome::Closed,
            }
        }

        if self.read_buf.is_empty() {
            return ReadOutcome::NeedMoreData;
        }

        if !self.request.parse(&mut self.read_buf) {
            self.build_response(Some(400));
            self.state = ConnState::Writing;
            return ReadOutcome::ResponseReady;
        }

        if self.request.parser_state() != ParserState::Finish {
            return ReadOutcome::NeedMoreData;
        }

        self.request.resolve_route(db);
        self.build_response(None);
        self.state = ConnState::Writing;
        ReadOutcome::ResponseReady
    }

    fn build_response(&mut self, forced_code: Option<u16>) {
        let keep_alive = self.request.is_keep_alive();
        self.response.init(
            self.resource_dir.clone(),
            self.request.path.clone(),
            keep_alive,
            forced_code,
        );
        self.response.make_response(&mut self.write_buf);
        self.file_offset = 0;
    }

    /// Vectored write across `[write_buf, mapped_file]`, matching the
    /// `iov_pair` the Connection data model specifies. Repeats while
    /// edge-triggered or while more than `WRITE_DRAIN_THRESHOLD` bytes
    /// remain, mirroring `HttpConn::write`'s drain loop.
    pub fn handle_write_phase(&mut self) -> WriteOutcome {
        loop {
            let mapped_remaining = self.mapped_remaining();
            if self.write_buf.is_empty() && mapped_remaining.is_empty() {
                return self.finish_write();
            }
            match self.vectored_write_once(mapped_remaining.len()) {
                Ok(0) => return WriteOutcome::Closed,
                Ok(_) => {
                    let remaining = self.write_buf.readable_bytes() + self.mapped_remaining().len();
                    if !self.edge_triggered_write && remaining <= WRITE_DRAIN_THRESHOLD {
                        if remaining == 0 {
                            return self.finish_write();
                        }
                        return WriteOutcome::WouldBlock;
                    }
                    if remaining == 0 {
                        return self.finish_write();
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return WriteOutcome::WouldBlock,
                Err(_) => return WriteOutcome::Closed,
            }
        }
    }

    fn mapped_remaining(&self) -> &[u8] {
        match self.response.mapped_file() {
            Some(bytes) if self.file_offset < bytes.len() => &bytes[self.file_offset..],
            _ => &[],
        }
    }

    fn vectored_write_once(&mut self, _mapped_len: usize) -> io::Result<usize> {
        let header = self.write_buf.peek().to_vec();
        let mapped_remaining = self.mapped_remaining().to_vec();
        let slices = [IoSlice::new(&header), IoSlice::new(&mapped_remaining)];
        let n = self.stream.write_vectored(&slices)?;
        let from_header = n.min(header.len());
        self.write_buf.retrieve(from_header);
        let from_mapped = n - from_header;
        self.file_offset += from_mapped;
        Ok(n)
    }

    fn finish_write(&mut self) -> WriteOutcome {
        if self.request.is_keep_alive() {
            self.response.unmap_file();
            self.write_buf.retrieve_all();
            self.request.init();
            self.file_offset = 0;
            self.state = ConnState::Reading;
            // HTTP pipelining: if the client already sent the next request,
            // it is sitting in read_buf.
            if !self.read_buf.is_empty() {
                debug!("pipelined request present on token {:?}", self.token);
            }
            WriteOutcome::Finished
        } else {
            self.state = ConnState::Closing;
            WriteOutcome::Closed
        }
    }

    pub fn has_buffered_request(&self) -> bool {
        !self.read_buf.is_empty()
    }

    /// Idempotent teardown: unmaps any file and marks the connection
    /// terminal. The fd itself is closed by dropping `self.stream`.
    pub fn terminate(&mut self) {
        self.response.unmap_file();
        self.state = ConnState::Closing;
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}
