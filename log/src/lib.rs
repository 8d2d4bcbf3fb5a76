//! Asynchronous, level-filtered, date/line-rotating log sink.
//!
//! Adapted from the reference server's `BlockDeque<T>` + `Log` singleton:
//! a single writer thread drains a bounded queue and rotates the backing
//! file when the calendar day changes or every 50,000 lines.

mod blockqueue;
mod logger;

pub use blockqueue::BlockQueue;
pub use logger::{Level, Logger};
