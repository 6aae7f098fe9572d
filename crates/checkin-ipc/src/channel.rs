//! The named pipe carrying requests from clients to the dispatcher

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use checkin_core::Request;
use nix::errno::Errno;
use nix::libc;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;

use crate::error::{Error, Result};

/// Largest message read from the channel in one go
const MAX_MESSAGE: usize = 255;

/// How often a sender checks again for a reader
const READER_POLL_MS: u16 = 100;

/// Handle on the request channel
#[derive(Clone, Debug)]
pub struct RequestChannel {
    path: PathBuf,
}

impl RequestChannel {
    /// Create the channel at `path`, replacing a stale one
    ///
    /// Anything at `path` that is not a named pipe is left alone and reported
    /// as [`Error::ChannelNotFifo`].
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        match fs::symlink_metadata(&path) {
            Ok(meta) if meta.file_type().is_fifo() => {
                tracing::info!(path = %path.display(), "removing stale request channel");
                fs::remove_file(&path).map_err(|source| Error::ChannelIo {
                    path: path.clone(),
                    source,
                })?;
            }
            Ok(_) => return Err(Error::ChannelNotFifo(path)),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => return Err(Error::ChannelIo { path, source }),
        }

        let mode = Mode::from_bits_truncate(0o666);
        mkfifo(&path, mode).map_err(|source| Error::ChannelCreate {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path })
    }

    /// Refer to an existing channel, checking it really is a named pipe
    pub fn check(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        match fs::metadata(&path) {
            Ok(meta) if meta.file_type().is_fifo() => Ok(Self { path }),
            Ok(_) => Err(Error::ChannelNotFifo(path)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::ChannelMissing(path)),
            Err(source) => Err(Error::ChannelIo { path, source }),
        }
    }

    /// Refer to a channel without checking anything
    ///
    /// 📌 Operations on such a handle fail late if the path is not a pipe.
    pub fn unchecked(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the channel
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for a writer and read one request
    ///
    /// Signals caught while waiting are retried, never reported.
    pub fn read_request(&self) -> Result<Request> {
        self.receive(None)
    }

    /// Like [`RequestChannel::read_request`], but give up with
    /// [`Error::Interrupted`] when `wake` becomes readable first
    ///
    /// Once a writer has started a message the message is read in full,
    /// whatever happens to `wake`.
    pub fn read_request_until(&self, wake: BorrowedFd<'_>) -> Result<Request> {
        self.receive(Some(wake))
    }

    fn receive(&self, wake: Option<BorrowedFd<'_>>) -> Result<Request> {
        // Opening without O_NONBLOCK would block until a writer shows up,
        // where nothing else can be watched.
        let mut file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;

        let mut buf = [0u8; MAX_MESSAGE];
        let mut len = 0;
        while len < MAX_MESSAGE {
            if len == 0 && !self.wait_readable(&file, wake)? {
                return Err(Error::Interrupted);
            }
            match file.read(&mut buf[len..]) {
                Ok(0) => break,
                Ok(n) => len += n,
                // A message is a single write: once data came in, an empty
                // pipe means the whole message is there.
                Err(e) if e.kind() == ErrorKind::WouldBlock && len > 0 => break,
                Err(e)
                    if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
                Err(e) => return Err(self.io_error(e)),
            }
        }
        drop(file);

        let message = String::from_utf8_lossy(&buf[..len]);
        Ok(Request::parse(&message)?)
    }

    /// Wait until `file` has data or a writer hung up (`true`), or `wake` is
    /// readable (`false`)
    fn wait_readable(&self, file: &File, wake: Option<BorrowedFd<'_>>) -> Result<bool> {
        loop {
            let mut fds = vec![PollFd::new(file.as_fd(), PollFlags::POLLIN)];
            fds.extend(wake.map(|fd| PollFd::new(fd, PollFlags::POLLIN)));
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) | Err(Errno::EINTR) => {}
                Err(errno) => return Err(self.io_error(errno.into())),
            }
            if fds.first().is_some_and(is_ready) {
                return Ok(true);
            }
            if fds.get(1).is_some_and(is_ready) {
                return Ok(false);
            }
        }
    }

    /// Send `request` with a single write
    ///
    /// Blocks in `open(2)` until the dispatcher opens the pipe for reading.
    pub fn send(&self, request: &Request) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        self.write_message(file, request)
    }

    /// Like [`RequestChannel::send`], but give up with [`Error::Interrupted`]
    /// when `wake` becomes readable before a reader shows up
    pub fn send_until(&self, request: &Request, wake: BorrowedFd<'_>) -> Result<()> {
        loop {
            let opened = OpenOptions::new()
                .write(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(&self.path);
            match opened {
                Ok(file) => return self.write_message(file, request),
                // No reader yet.
                Err(e) if e.raw_os_error() == Some(libc::ENXIO) => {}
                Err(e) => return Err(self.io_error(e)),
            }

            let mut fds = [PollFd::new(wake, PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::from(READER_POLL_MS)) {
                Ok(_) | Err(Errno::EINTR) => {}
                Err(errno) => return Err(self.io_error(errno.into())),
            }
            if is_ready(&fds[0]) {
                return Err(Error::Interrupted);
            }
        }
    }

    fn write_message(&self, mut file: File, request: &Request) -> Result<()> {
        let message = request.encode();
        let written = file.write(message.as_bytes()).map_err(|e| self.io_error(e))?;
        if written != message.len() {
            return Err(Error::ShortWrite {
                written,
                len: message.len(),
            });
        }
        Ok(())
    }

    /// Remove the channel from the file system
    pub fn remove(&self) -> Result<()> {
        fs::remove_file(&self.path).map_err(|e| self.io_error(e))
    }

    fn io_error(&self, source: std::io::Error) -> Error {
        Error::ChannelIo {
            path: self.path.clone(),
            source,
        }
    }
}

fn is_ready(fd: &PollFd<'_>) -> bool {
    fd.revents().is_some_and(|events| !events.is_empty())
}
