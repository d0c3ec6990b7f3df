//! Error types for session setup.
//!
//! Interpreter anomalies (unmapped notes, stray note-offs, foreign channels)
//! are not errors; see `interpreter::Outcome`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("No MIDI input available: {0}")]
    DeviceUnavailable(String),

    #[error("MIDI port error: {0}")]
    MidiPort(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(feature = "hardware")]
impl From<midir::InitError> for Error {
    fn from(e: midir::InitError) -> Self {
        Error::DeviceUnavailable(e.to_string())
    }
}

#[cfg(feature = "hardware")]
impl From<midir::ConnectError<midir::MidiInput>> for Error {
    fn from(e: midir::ConnectError<midir::MidiInput>) -> Self {
        Error::MidiPort(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
