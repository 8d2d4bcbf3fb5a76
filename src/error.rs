use core::fmt;
use std::{
    error::Error as StdError,
    fmt::{Debug, Display, Formatter},
};

pub struct CleanError(pub Box<dyn StdError>);

impl Debug for CleanError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "\r\x1b[K{}", self)
    }
}

impl Display for CleanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\x1b[31mERROR\x1b[0m: {}", self.0)
    }
}

impl StdError for CleanError {}

impl From<std::io::Error> for CleanError {
    fn from(e: std::io::Error) -> Self {
        CleanError(Box::new(e))
    }
}

impl From<mysql::Error> for CleanError {
    fn from(e: mysql::Error) -> Self {
        CleanError(Box::new(e))
    }
}

impl From<serde_yaml::Error> for CleanError {
    fn from(e: serde_yaml::Error) -> Self {
        CleanError(Box::new(e))
    }
}

impl From<std::net::AddrParseError> for CleanError {
    fn from(e: std::net::AddrParseError) -> Self {
        CleanError(Box::new(e))
    }
}

impl From<String> for CleanError {
    fn from(s: String) -> Self {
        CleanError(Box::new(Generic(s)))
    }
}

impl From<&str> for CleanError {
    fn from(s: &str) -> Self {
        CleanError(Box::new(Generic(s.to_string())))
    }
}

#[derive(Debug)]
struct Generic(String);

impl Display for Generic {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl StdError for Generic {}

pub type Result<T> = std::result::Result<T, CleanError>;
