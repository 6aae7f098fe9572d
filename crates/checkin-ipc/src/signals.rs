//! Event delivery over UNIX signals
//!
//! Each [`Event`] travels as one signal. Two receiving styles are used:
//!
//! - the dispatcher and the client block their signals and read them from a
//!   `signalfd`. A delivered event stays readable on the descriptor until it
//!   is taken, so it can be polled together with the request channel or the
//!   passenger's input and is never lost between two checks;
//! - a worker installs a single handler that ends the process with `_exit`.

use std::os::fd::{AsFd, BorrowedFd};

use checkin_core::Event;
use nix::errno::Errno;
use nix::libc;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use nix::unistd::{alarm, Pid};

use crate::error::{Error, Result};

/// Signal carrying `event`
pub fn signal_for(event: Event) -> Signal {
    match event {
        Event::ClientAccepted => Signal::SIGUSR1,
        Event::ClientRejected => Signal::SIGHUP,
        Event::InterruptRequested => Signal::SIGINT,
        Event::TimeoutExpired => Signal::SIGALRM,
        Event::WorkerTerminate => Signal::SIGUSR2,
        Event::ChildExited => Signal::SIGCHLD,
    }
}

/// Event carried by `signal`, if any
pub fn event_for(signal: Signal) -> Option<Event> {
    Event::ALL.into_iter().find(|&e| signal_for(e) == signal)
}

/// Delivery of events to other processes
pub trait Notifier {
    /// Send `event` to process `pid`
    fn notify(&self, pid: Pid, event: Event) -> Result<()>;
}

/// [`Notifier`] sending real signals with `kill(2)`
#[derive(Clone, Copy, Debug, Default)]
pub struct Kill;

impl Notifier for Kill {
    fn notify(&self, pid: Pid, event: Event) -> Result<()> {
        signal::kill(pid, signal_for(event)).map_err(|source| Error::Notify { pid, event, source })
    }
}

/// Blocked signals readable from a non-blocking `signalfd`
struct Queue {
    fd: SignalFd,
}

impl Queue {
    /// Block the signals of `events` in the calling thread and open the queue
    fn arm(events: &[Event]) -> Result<Self> {
        let mut mask = SigSet::empty();
        for &event in events {
            mask.add(signal_for(event));
        }
        mask.thread_block().map_err(Error::Signals)?;
        let fd = SignalFd::with_flags(&mask, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC)
            .map_err(Error::Signals)?;
        Ok(Self { fd })
    }

    fn try_next(&mut self) -> Result<Option<Event>> {
        loop {
            match self.fd.read_signal() {
                Ok(Some(info)) => {
                    let event = Signal::try_from(info.ssi_signo as libc::c_int)
                        .ok()
                        .and_then(event_for);
                    if event.is_some() {
                        return Ok(event);
                    }
                }
                Ok(None) => return Ok(None),
                Err(Errno::EINTR) => {}
                Err(e) => return Err(Error::Signals(e)),
            }
        }
    }
}

/// Pending events of the dispatcher
///
/// Arming blocks the signals, so it must happen before any other thread is
/// spawned for the mask to cover the whole process.
pub struct Inbox {
    queue: Queue,
}

impl Inbox {
    /// Start queueing `events`
    pub fn arm(events: &[Event]) -> Result<Self> {
        Ok(Self {
            queue: Queue::arm(events)?,
        })
    }

    /// Take every event received since the last call
    ///
    /// Repeated deliveries of one event are reported once.
    pub fn take(&mut self) -> Result<Vec<Event>> {
        let mut bits = 0u8;
        while let Some(event) = self.queue.try_next()? {
            bits |= event.bit();
        }
        Ok(Event::from_bits(bits).collect())
    }
}

impl AsFd for Inbox {
    /// Readable while an event is pending
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.queue.fd.as_fd()
    }
}

/// Synchronous receiver for the client's events
pub struct Waiter {
    queue: Queue,
}

impl Waiter {
    /// Block the signals of `events` so they queue up until taken
    pub fn arm(events: &[Event]) -> Result<Self> {
        Ok(Self {
            queue: Queue::arm(events)?,
        })
    }

    /// An event already received, without waiting
    pub fn try_take(&mut self) -> Result<Option<Event>> {
        self.queue.try_next()
    }

    /// Suspend until one of the armed events arrives
    pub fn wait(&mut self) -> Result<Event> {
        loop {
            if let Some(event) = self.try_take()? {
                return Ok(event);
            }
            let mut fds = [PollFd::new(self.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) | Err(Errno::EINTR) => {}
                Err(e) => return Err(Error::Signals(e)),
            }
        }
    }
}

impl AsFd for Waiter {
    /// Readable while an event is pending
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.queue.fd.as_fd()
    }
}

/// Deliver [`Event::TimeoutExpired`] to this process in `secs` seconds
pub fn arm_timer(secs: u32) {
    alarm::set(secs);
}

extern "C" fn terminate_now(_: libc::c_int) {
    const MSG: &[u8] = b"worker: terminating on dispatcher request\n";
    // SAFETY: write(2) and _exit(2) are async-signal-safe.
    unsafe {
        libc::write(libc::STDERR_FILENO, MSG.as_ptr().cast(), MSG.len());
        libc::_exit(0);
    }
}

/// Signal dispositions of a freshly forked worker
///
/// Interrupts are ignored so the dispatcher alone handles them;
/// [`Event::WorkerTerminate`] ends the worker at once with status 0;
/// [`Event::ChildExited`] goes back to its default. The signal mask inherited
/// from the dispatcher is cleared.
pub fn arm_worker() -> Result<()> {
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    let terminate = SigAction::new(
        SigHandler::Handler(terminate_now),
        SaFlags::empty(),
        SigSet::empty(),
    );
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());

    // SAFETY: the only installed handler calls async-signal-safe functions.
    unsafe {
        signal::sigaction(signal_for(Event::InterruptRequested), &ignore)
            .map_err(Error::Signals)?;
        signal::sigaction(signal_for(Event::WorkerTerminate), &terminate)
            .map_err(Error::Signals)?;
        signal::sigaction(signal_for(Event::ChildExited), &default).map_err(Error::Signals)?;
    }
    SigSet::empty().thread_set_mask().map_err(Error::Signals)
}
