use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid field calibration: {0}")]
    InvalidCalibration(String),

    #[error("history size must be positive")]
    InvalidHistorySize,

    #[error("invalid smoothing window {window} for polynomial order {order}")]
    InvalidSmoothingWindow { window: usize, order: usize },

    #[error("invalid frame rate: {0}")]
    InvalidFrameRate(f32),

    #[error("invalid value for `{name}`: {value}")]
    InvalidParameter { name: &'static str, value: f32 },

    #[error("Config Error: {0}")]
    ConfigParseError(#[from] serde_json::Error),

    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
