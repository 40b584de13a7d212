//! Logger setup.
//!
//! gltree itself only emits through the `log` facade. Applications that do
//! not bring their own logger can call [`init_logging`] once at startup.

use std::str::FromStr;

use gltree_core::LogConfig;
use log::LevelFilter;
use thiserror::Error;

/// Failure to set up the logger.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("unknown log level `{0}`")]
    Level(String),
    #[error(transparent)]
    Init(#[from] fern::InitError),
}

/// Builds the dispatcher described by `config` without installing it.
pub fn dispatch(config: &LogConfig) -> Result<fern::Dispatch, LoggingError> {
    let level = LevelFilter::from_str(&config.level)
        .map_err(|_| LoggingError::Level(config.level.clone()))?;

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout());
    if let Some(path) = &config.file {
        dispatch = dispatch.chain(fern::log_file(path).map_err(fern::InitError::Io)?);
    }
    Ok(dispatch)
}

/// Installs the global logger. Fails if one is already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), LoggingError> {
    dispatch(config)?
        .apply()
        .map_err(|err| LoggingError::Init(err.into()))?;
    log::debug!("logging at {} level", config.level);
    Ok(())
}
