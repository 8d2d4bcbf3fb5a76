pub use crate::config::AppConfig;
pub use crate::error::{CleanError, Result};

pub use mio::{
    Events, Interest, Poll, Token,
    event::Event,
    net::{TcpListener, TcpStream},
};

pub use std::collections::HashMap;
pub use std::fs::{self, File};
pub use std::io::{self, ErrorKind, Read, Write};
pub use std::net::SocketAddr;
pub use std::path::{Path, PathBuf};
pub use std::sync::{Arc, Mutex};
pub use std::time::{Duration, Instant};

/// Connection accounting ceiling; exceeding it sends the literal
/// `"Server busy!"` payload and closes the new fd (§4.9).
pub const MAX_FD: usize = 65536;

/// Scratch region used by `ByteBuffer::read_from_fd`'s second scatter
/// vector; must stay ≥ 64 KiB.
pub const SCATTER_SCRATCH: usize = 65536;

pub const HTTP_OK: u16 = 200;
pub const HTTP_BAD_REQUEST: u16 = 400;
pub const HTTP_FORBIDDEN: u16 = 403;
pub const HTTP_NOT_FOUND: u16 = 404;
