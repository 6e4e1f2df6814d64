use thiserror::Error;

/// All errors produced by oneclock-core.
#[derive(Debug, Error)]
pub enum OneClockError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    StreamOpen(String),

    #[error("no output device found")]
    NoOutputDevice,

    #[error("no input device found")]
    NoInputDevice,

    #[error("track load error: {0}")]
    TrackLoad(String),

    #[error("track sample rate {actual} Hz does not match engine rate {expected} Hz")]
    SampleRateMismatch { expected: u32, actual: u32 },

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, OneClockError>;
