use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::JoinHandle;

use chrono::{Datelike, Local, Timelike};

use crate::blockqueue::BlockQueue;

const MAX_LINES_PER_FILE: usize = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Debug => "[debug]: ",
            Level::Info => "[info] : ",
            Level::Warn => "[warn] : ",
            Level::Error => "[error]: ",
        }
    }
}

struct RotatingFile {
    dir: PathBuf,
    suffix: String,
    day: (i32, u32, u32),
    lines_today: usize,
    file: File,
}

impl RotatingFile {
    fn open(dir: &PathBuf, suffix: &str, day: (i32, u32, u32)) -> std::io::Result<File> {
        fs::create_dir_all(dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(dir, fs::Permissions::from_mode(0o777));
        }
        let name = dir.join(format!("{:04}_{:02}_{:02}{}", day.0, day.1, day.2, suffix));
        OpenOptions::new().create(true).append(true).open(name)
    }

    fn new(dir: PathBuf, suffix: String, day: (i32, u32, u32)) -> std::io::Result<Self> {
        let file = Self::open(&dir, &suffix, day)?;
        Ok(RotatingFile {
            dir,
            suffix,
            day,
            lines_today: 0,
            file,
        })
    }

    /// Rolls over to a new file when the calendar day changes or every
    /// `MAX_LINES_PER_FILE` lines, exactly as the reference logger's
    /// `write()` rotation check does.
    fn write_line(&mut self, today: (i32, u32, u32), line: &str) -> std::io::Result<()> {
        if today != self.day {
            self.day = today;
            self.lines_today = 0;
            self.file = Self::open(&self.dir, &self.suffix, today)?;
        } else if self.lines_today > 0 && self.lines_today % MAX_LINES_PER_FILE == 0 {
            let name = self.dir.join(format!(
                "{:04}_{:02}_{:02}-{}{}",
                today.0,
                today.1,
                today.2,
                self.lines_today / MAX_LINES_PER_FILE,
                self.suffix
            ));
            self.file = OpenOptions::new().create(true).append(true).open(name)?;
        }
        self.lines_today += 1;
        writeln!(self.file, "{}", line)
    }
}

pub struct Logger {
    level: Level,
    queue: Option<Arc<BlockQueue<String>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    lines: AtomicUsize,
}

static LOGGER: OnceLock<Logger> = OnceLock::new();

impl Logger {
    /// Initializes the process-wide logger. `capacity == 0` disables the
    /// background writer thread and every call to `log` writes synchronously
    /// on the caller's thread instead — used by tests and by configurations
    /// with logging disabled.
    pub fn init(level: Level, dir: impl Into<PathBuf>, suffix: impl Into<String>, capacity: usize) {
        let dir = dir.into();
        let suffix = suffix.into();
        let start_date = today();
        let queue = if capacity > 0 {
            let queue: Arc<BlockQueue<String>> = Arc::new(BlockQueue::new(capacity));
            let consumer = queue.clone();
            let mut rotating = RotatingFile::new(dir, suffix, start_date)
                .expect("failed to open log file for writing");
            let handle = std::thread::Builder::new()
                .name("weblog-writer".into())
                .spawn(move || {
                    while let Some(line) = consumer.pop() {
                        let now = today();
                        let _ = rotating.write_line(now, &line);
                    }
                })
                .expect("failed to spawn log writer thread");
            LOGGER
                .set(Logger {
                    level,
                    queue: Some(queue),
                    writer: Mutex::new(Some(handle)),
                    lines: AtomicUsize::new(0),
                })
                .ok();
            return;
        } else {
            None
        };
        LOGGER
            .set(Logger {
                level,
                queue,
                writer: Mutex::new(None),
                lines: AtomicUsize::new(0),
            })
            .ok();
    }

    pub fn global() -> Option<&'static Logger> {
        LOGGER.get()
    }

    pub fn enabled(&self, level: Level) -> bool {
        level >= self.level
    }

    pub fn log(&self, level: Level, message: std::fmt::Arguments) {
        if !self.enabled(level) {
            return;
        }
        self.lines.fetch_add(1, Ordering::Relaxed);
        let now = Local::now();
        let line = format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02} {}{}",
            now.year(),
            now.month(),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
            level.tag(),
            message
        );
        match &self.queue {
            Some(queue) => {
                if let Err(line) = queue.try_push_back(line) {
                    eprintln!("{}", line);
                }
            }
            None => eprintln!("{}", line),
        }
    }

    /// Blocks until the writer thread has drained the queue, then joins it.
    pub fn flush(&self) {
        if let Some(queue) = &self.queue {
            queue.close();
        }
        if let Some(handle) = self.writer.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn today() -> (i32, u32, u32) {
    let now = Local::now();
    (now.year(), now.month(), now.day())
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        if let Some(logger) = $crate::Logger::global() {
            logger.log($crate::Level::Debug, format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        if let Some(logger) = $crate::Logger::global() {
            logger.log($crate::Level::Info, format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        if let Some(logger) = $crate::Logger::global() {
            logger.log($crate::Level::Warn, format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        if let Some(logger) = $crate::Logger::global() {
            logger.log($crate::Level::Error, format_args!($($arg)*));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering_matches_verbosity() {
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
    }
}
