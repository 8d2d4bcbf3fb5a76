use std::fs;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::Result;
use weblog::Level;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig {
            host: "localhost".into(),
            port: 3306,
            user: "root".into(),
            password: String::new(),
            dbname: "webserver".into(),
        }
    }
}

/// Process-wide configuration. Field names and defaults mirror the literal
/// arguments the reference server's `main.cpp` passes to `WebServer::WebServer`.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub port: u16,
    /// 0..=3, selects {LT,LT} {LT,ET} {ET,LT} {ET,ET} for {listener,connection}.
    pub trig_mode: u8,
    pub timeout_ms: i64,
    pub open_linger: bool,
    pub db: DbConfig,
    pub db_pool_size: usize,
    pub thread_count: usize,
    pub open_log: bool,
    pub log_level: u8,
    pub log_queue_capacity: usize,
    pub resource_dir: Option<PathBuf>,
    pub log_dir: PathBuf,
    pub log_suffix: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            port: 1316,
            trig_mode: 3,
            timeout_ms: 60_000,
            open_linger: false,
            db: DbConfig::default(),
            db_pool_size: 12,
            thread_count: 6,
            open_log: true,
            log_level: 1,
            log_queue_capacity: 1024,
            resource_dir: None,
            log_dir: PathBuf::from("./log"),
            log_suffix: ".log".into(),
        }
    }
}

impl AppConfig {
    pub fn from_str(content: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    pub fn log_level(&self) -> Level {
        match self.log_level {
            0 => Level::Debug,
            1 => Level::Info,
            2 => Level::Warn,
            _ => Level::Error,
        }
    }

    /// `<cwd>/resources` unless overridden, matching `srcDir_` in the
    /// reference `WebServer` constructor.
    pub fn resource_dir(&self) -> PathBuf {
        match &self.resource_dir {
            Some(p) => p.clone(),
            None => std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join("resources"),
        }
    }

    /// Per the four trigger modes in §4.9: bit 0 selects connection
    /// edge-triggering, bit 1 selects listener edge-triggering.
    pub fn listener_edge_triggered(&self) -> bool {
        matches!(self.trig_mode, 2 | 3)
    }

    pub fn connection_edge_triggered(&self) -> bool {
        matches!(self.trig_mode, 1 | 3)
    }

    pub fn display_config(&self) {
        println!("================ webserver ================");
        println!("Port: {}", self.port);
        println!(
            "Listener mode: {}, Connection mode: {}",
            if self.listener_edge_triggered() { "ET" } else { "LT" },
            if self.connection_edge_triggered() { "ET" } else { "LT" }
        );
        println!("Idle timeout: {} ms", self.timeout_ms);
        println!("Linger: {}", self.open_linger);
        println!("Worker threads: {}", self.thread_count);
        println!("DB pool size: {}", self.db_pool_size);
        println!("Logging: {}", self.open_log);
        println!("=============================================");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_main() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.port, 1316);
        assert_eq!(cfg.trig_mode, 3);
        assert_eq!(cfg.timeout_ms, 60_000);
        assert_eq!(cfg.db_pool_size, 12);
        assert_eq!(cfg.thread_count, 6);
    }

    #[test]
    fn trig_mode_three_is_fully_edge_triggered() {
        let mut cfg = AppConfig::default();
        cfg.trig_mode = 3;
        assert!(cfg.listener_edge_triggered());
        assert!(cfg.connection_edge_triggered());
        cfg.trig_mode = 0;
        assert!(!cfg.listener_edge_triggered());
        assert!(!cfg.connection_edge_triggered());
    }

    #[test]
    fn parses_partial_yaml_with_defaults() {
        let cfg = AppConfig::from_str("port: 8080\n").unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.thread_count, 6);
    }
}
