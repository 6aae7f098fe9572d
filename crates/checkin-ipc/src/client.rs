//! Implementation of the client
//!
//! A client sends one request and then does nothing but wait for the single
//! event that decides its exit code. Events are watched from the start: an
//! interrupt while the passenger is still typing ends the session before
//! anything is sent.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};

use checkin_core::{parse_tax_id, validate_password, Config, Event, Request};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::unistd::Pid;

use crate::channel::RequestChannel;
use crate::error::{Error, Result};
use crate::signals::{self, Waiter};

/// Events that end a client
pub const CLIENT_EVENTS: [Event; 4] = [
    Event::ClientAccepted,
    Event::ClientRejected,
    Event::InterruptRequested,
    Event::TimeoutExpired,
];

/// Run a whole client session on the standard streams
///
/// Returns the process exit code: 0 when checked in or interrupted, 1 on
/// rejection, timeout or any error.
pub fn run(config: &Config) -> i32 {
    match session(config, std::io::stdin(), std::io::stdout()) {
        Ok(event) => {
            match event {
                Event::ClientAccepted => tracing::info!("check-in completed"),
                Event::ClientRejected => tracing::error!("check-in refused"),
                Event::InterruptRequested => tracing::info!("interrupted"),
                _ => tracing::error!("no answer from the server in time"),
            }
            event.client_exit_code().unwrap_or(1)
        }
        Err(e) => {
            tracing::error!(error = %e, "check-in failed");
            1
        }
    }
}

/// Check the channel, collect input, send the request and wait for the outcome
///
/// Any armed event arriving before the request is sent ends the session with
/// that event and nothing is sent.
pub fn session<I: AsFd, W: Write>(config: &Config, input: I, prompt: W) -> Result<Event> {
    let channel = RequestChannel::check(&config.fifo)?;
    let mut waiter = Waiter::arm(&CLIENT_EVENTS)?;

    let mut input = WatchedInput::new(input.as_fd(), &mut waiter)?;
    let collected = collect_request(BufReader::new(&mut input), prompt, Pid::this().as_raw());
    let pending = input.event;
    drop(input);
    if let Some(event) = pending {
        tracing::info!(?event, "event before the request was sent");
        return Ok(event);
    }
    let request = collected?;

    if let Some(event) = waiter.try_take()? {
        tracing::info!(?event, "event before the request was sent");
        return Ok(event);
    }
    match channel.send_until(&request, waiter.as_fd()) {
        Ok(()) => {}
        Err(Error::Interrupted) => return waiter.wait(),
        Err(e) => return Err(e),
    }
    tracing::info!(tax_id = request.tax_id(), "request sent");

    signals::arm_timer(config.max_wait);
    waiter.wait()
}

/// Ask the passenger for tax id and password
///
/// An invalid tax id is rejected before the password is even asked for.
pub fn collect_request<R: BufRead, W: Write>(
    mut input: R,
    mut prompt: W,
    client_pid: i32,
) -> Result<Request> {
    write!(prompt, "Online check-in\n---------------\nTax id: ").map_err(Error::Input)?;
    prompt.flush().map_err(Error::Input)?;
    let tax_id = parse_tax_id(&read_line(&mut input)?)?;

    write!(prompt, "Password: ").map_err(Error::Input)?;
    prompt.flush().map_err(Error::Input)?;
    let password = read_line(&mut input)?;
    let password = password.trim();
    validate_password(password)?;

    Ok(Request::new(tax_id, password, client_pid)?)
}

fn read_line<R: BufRead>(input: &mut R) -> Result<String> {
    let mut line = String::new();
    input.read_line(&mut line).map_err(Error::Input)?;
    Ok(line)
}

/// Passenger input that stops reading as soon as an event is pending
///
/// Reads go straight to the descriptor, so nothing is buffered behind the
/// back of `poll`.
struct WatchedInput<'w> {
    file: File,
    waiter: &'w mut Waiter,
    event: Option<Event>,
}

impl<'w> WatchedInput<'w> {
    fn new(input: BorrowedFd<'_>, waiter: &'w mut Waiter) -> Result<Self> {
        let file = File::from(input.try_clone_to_owned().map_err(Error::Input)?);
        Ok(Self {
            file,
            waiter,
            event: None,
        })
    }

    fn event_arrived() -> io::Error {
        io::Error::new(io::ErrorKind::Other, "event arrived while reading input")
    }
}

impl Read for WatchedInput<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.event.is_some() {
            return Err(Self::event_arrived());
        }
        loop {
            let mut fds = [
                PollFd::new(self.file.as_fd(), PollFlags::POLLIN),
                PollFd::new(self.waiter.as_fd(), PollFlags::POLLIN),
            ];
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) | Err(Errno::EINTR) => {}
                Err(errno) => return Err(errno.into()),
            }
            let [input, events] = fds.map(|fd| fd.revents().is_some_and(|r| !r.is_empty()));

            if events {
                let taken = self
                    .waiter
                    .try_take()
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                if let Some(event) = taken {
                    self.event = Some(event);
                    return Err(Self::event_arrived());
                }
            }
            if input {
                return self.file.read(buf);
            }
        }
    }
}
