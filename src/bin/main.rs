use mio::Poll;
use webserver::{config::AppConfig, error::Result, reactor::Server};
use weblog::{Level, Logger, info, warn};

fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.yaml".to_string());
    let config = match AppConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("could not load {config_path}, using defaults: {e}");
            AppConfig::default()
        }
    };

    if config.open_log {
        Logger::init(config.log_level(), config.log_dir.clone(), config.log_suffix.clone(), config.log_queue_capacity);
    } else {
        Logger::init(Level::Error, config.log_dir.clone(), config.log_suffix.clone(), 0);
    }

    config.display_config();
    info!("starting up");

    let poll = Poll::new()?;
    let server = Server::new(config, &poll)?;
    let shutdown = server.shutdown_flag();
    ctrlc::set_handler(move || {
        warn!("received interrupt, shutting down");
        shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    })
    .expect("failed to install signal handler");

    server.run(poll)
}
