use std::io;
use std::path::PathBuf;

use checkin_core::{Event, ParseError};
use nix::unistd::Pid;
use thiserror::Error;

/// Failures of the check-in processes
#[derive(Debug, Error)]
pub enum Error {
    /// Database missing or lacking read/write permission
    #[error("database {path} is not accessible: {source}")]
    StoreUnavailable { path: PathBuf, source: nix::Error },
    /// The database file could not be opened
    #[error("could not open database {path}: {source}")]
    StoreOpen { path: PathBuf, source: io::Error },
    /// Positioning on a slot failed
    #[error("could not seek to slot {index}: {source}")]
    StoreSeek { index: usize, source: io::Error },
    /// Reading a slot failed
    #[error("could not read slot {index}: {source}")]
    StoreRead { index: usize, source: io::Error },
    /// Writing a slot failed
    #[error("could not write slot {index}: {source}")]
    StoreWrite { index: usize, source: io::Error },
    /// Slot index past the end of the database
    #[error("database has no slot {0}")]
    NoSuchSlot(usize),

    /// Nothing at the request channel path
    #[error("request channel {0} does not exist")]
    ChannelMissing(PathBuf),
    /// Something other than a named pipe at the request channel path
    #[error("{0} exists but is not a named pipe")]
    ChannelNotFifo(PathBuf),
    /// `mkfifo(2)` failed
    #[error("could not create request channel {path}: {source}")]
    ChannelCreate { path: PathBuf, source: nix::Error },
    /// Opening, reading, writing or removing the channel failed
    #[error("request channel {path}: {source}")]
    ChannelIo { path: PathBuf, source: io::Error },
    /// The request did not go out in one write
    #[error("short write on request channel ({written} of {len} bytes)")]
    ShortWrite { written: usize, len: usize },
    /// An event became pending before any request was exchanged
    #[error("interrupted by an event")]
    Interrupted,
    /// A message or passenger input was not a valid request
    #[error("malformed request: {0}")]
    Parse(#[from] ParseError),

    /// No slot holds the requested tax id
    #[error("passenger {0} not found")]
    NotFound(i32),
    /// The first slot with the tax id has another password
    #[error("wrong password for passenger {0}")]
    WrongPassword(i32),

    /// Signal dispositions, masks or the event queue could not be set up
    #[error("could not arm signal handlers: {0}")]
    Signals(nix::Error),
    /// `kill(2)` towards another process failed
    #[error("could not deliver {event:?} to {pid}: {source}")]
    Notify {
        pid: Pid,
        event: Event,
        source: nix::Error,
    },
    /// `fork(2)` failed
    #[error("could not fork a worker: {0}")]
    Spawn(nix::Error),
    /// Reading the passenger's input failed
    #[error("could not read passenger input: {0}")]
    Input(io::Error),
}

/// Result type of the check-in processes
pub type Result<T, E = Error> = std::result::Result<T, E>;
