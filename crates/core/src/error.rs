//! Error types shared by the workspace crates.

use thiserror::Error;

/// Main error type for platform and configuration failures.
#[derive(Error, Debug)]
pub enum Error {
    /// Vulkan-related errors raised outside the RHI crate
    #[error("Vulkan error: {0}")]
    Vulkan(String),

    /// Window creation or management errors
    #[error("Window error: {0}")]
    Window(String),

    /// Event loop errors
    #[error("Event loop error: {0}")]
    EventLoop(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Result type alias using the workspace's Error type.
pub type Result<T> = std::result::Result<T, Error>;
