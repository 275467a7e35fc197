//! Audio I/O error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("no audio device found")]
    NoDevice,

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("failed to get device config: {0}")]
    ConfigError(String),

    #[error("failed to build stream: {0}")]
    StreamBuildError(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("backend error: {0}")]
    BackendError(String),
}

pub type AudioResult<T> = Result<T, AudioError>;
