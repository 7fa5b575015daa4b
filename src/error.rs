//! Error types for the bottomside daemon

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Bottomside error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file error
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// MQTT client error
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// GPIO driver error
    #[error("GPIO error: {0}")]
    Gpio(#[from] rppal::gpio::Error),

    /// I2C driver error
    #[error("I2C error: {0}")]
    I2c(#[from] rppal::i2c::Error),

    /// Session not established
    #[error("Not connected: {0}")]
    NotConnected(&'static str),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
