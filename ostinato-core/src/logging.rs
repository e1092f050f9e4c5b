use std::fs::File;
use std::path::PathBuf;

use simplelog::{Config, LevelFilter, WriteLogger};

/// Where the log file goes: `<config_dir>/ostinato/ostinato.log`.
pub fn log_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ostinato")
        .join("ostinato.log")
}

/// Install a file logger. Debug level when `verbose`, else warnings only.
///
/// Falls back to `/tmp/ostinato.log` when the config directory is not
/// writable. Returns an error if no log file can be created or a logger is
/// already installed.
pub fn init_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };

    let path = log_path();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let file = match File::create(&path) {
        Ok(file) => file,
        Err(_) => File::create("/tmp/ostinato.log")?,
    };

    WriteLogger::init(level, Config::default(), file)?;
    log::info!("ostinato starting (log level: {:?})", level);
    Ok(())
}
