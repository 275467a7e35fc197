//! Shared error type for the vox crates.
//!
//! Binary decoding and backend setup are the only layers that raise errors here;
//! playback-time operations (keying a voice, sending a macro message) stay silent
//! and local per the runtime's own rules, returning `Option`/`bool` instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxError {
    #[error("malformed audio group data: {0}")]
    Decode(String),

    #[error("audio backend error: {0}")]
    Audio(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("buffer underrun")]
    BufferUnderrun,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("state error: {0}")]
    State(String),
}

pub type VoxResult<T> = Result<T, VoxError>;
