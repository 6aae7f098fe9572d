//! Implementation of the dispatcher (server)
//!
//! The dispatcher owns the request channel. It reads one request at a time
//! and forks a [`Worker`] for each, reaps workers as they finish and, when
//! interrupted, asks every active worker to terminate before removing the
//! channel.

use std::os::fd::AsFd;

use checkin_core::{Config, Event, Request};
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};

use crate::channel::RequestChannel;
use crate::database::RecordStore;
use crate::error::{Error, Result};
use crate::signals::{self, Inbox, Kill, Notifier};
use crate::worker::Worker;

/// Events the dispatcher reacts to
pub const DISPATCHER_EVENTS: [Event; 2] = [Event::InterruptRequested, Event::ChildExited];

/// The long-lived server process
pub struct Dispatcher {
    channel: RequestChannel,
    store: RecordStore,
    inbox: Inbox,
    max_wait: u32,
}

impl Dispatcher {
    /// Check the database, arm the inbox and create the request channel
    pub fn start(config: &Config) -> Result<Self> {
        let store = RecordStore::new(&config.database);
        store.check_access()?;
        tracing::info!(path = %store.path().display(), "database available");

        // Armed before the channel exists, so no interrupt meets the default
        // disposition once clients can connect.
        let inbox = Inbox::arm(&DISPATCHER_EVENTS)?;

        let channel = RequestChannel::create(&config.fifo)?;
        tracing::info!(path = %channel.path().display(), "request channel created");

        Ok(Self {
            channel,
            store,
            inbox,
            max_wait: config.max_wait,
        })
    }

    /// Serve requests until interrupted
    ///
    /// Never returns: the dispatcher exits from its shutdown path and every
    /// forked worker exits once its session is over.
    pub fn run(mut self) -> ! {
        loop {
            self.drain_inbox();

            match self.channel.read_request_until(self.inbox.as_fd()) {
                Ok(request) => self.spawn_worker(request),
                Err(Error::Interrupted) => {}
                Err(e) => tracing::warn!(error = %e, "discarding request"),
            }
        }
    }

    fn drain_inbox(&mut self) {
        let events = match self.inbox.take() {
            Ok(events) => events,
            Err(e) => {
                tracing::error!(error = %e, "event inbox unreadable");
                self.teardown(1);
            }
        };
        for event in events {
            match event {
                Event::ChildExited => {
                    reap_workers();
                }
                Event::InterruptRequested => self.shutdown(),
                _ => {}
            }
        }
    }

    fn spawn_worker(&self, request: Request) {
        tracing::info!(?request, "request accepted");
        // SAFETY: the dispatcher is single-threaded, so the child starts from
        // a consistent copy of its state.
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                tracing::info!(worker = %child, "worker started");
            }
            Ok(ForkResult::Child) => self.become_worker(request),
            Err(e) => {
                tracing::error!(error = %Error::Spawn(e), "giving up");
                self.teardown(1);
            }
        }
    }

    fn become_worker(&self, request: Request) -> ! {
        if let Err(e) = signals::arm_worker() {
            tracing::warn!(error = %e, "worker runs with inherited signal handlers");
        }
        let worker = Worker::new(&self.store, &Kill, self.max_wait);
        let code = match worker.serve(request) {
            Ok(()) => 0,
            Err(e) => {
                tracing::error!(worker = %worker.pid(), error = %e, "session aborted");
                1
            }
        };
        std::process::exit(code)
    }

    /// Terminate every active worker, remove the channel and exit
    pub fn shutdown(&self) -> ! {
        tracing::info!("shutdown requested");
        match broadcast_terminate(&self.store, &Kill) {
            Ok(workers) => tracing::info!(count = workers.len(), "workers asked to terminate"),
            Err(e) => tracing::error!(error = %e, "database scan aborted"),
        }
        self.teardown(0)
    }

    fn teardown(&self, code: i32) -> ! {
        match self.channel.remove() {
            Ok(()) => tracing::info!("request channel removed"),
            Err(e) => tracing::error!(error = %e, "could not remove request channel"),
        }
        std::process::exit(code)
    }
}

/// Send [`Event::WorkerTerminate`] to the worker of every active slot
///
/// Slots are visited in index order. Delivery failures are logged and skipped;
/// a database failure stops the scan. Returns the workers notified.
pub fn broadcast_terminate<N: Notifier>(store: &RecordStore, notifier: &N) -> Result<Vec<Pid>> {
    let mut notified = Vec::new();
    for slot in store.scan()? {
        let (index, record) = slot?;
        let Some(worker) = record.worker().map(Pid::from_raw) else {
            continue;
        };
        match notifier.notify(worker, Event::WorkerTerminate) {
            Ok(()) => {
                tracing::info!(index, %worker, "worker asked to terminate");
                notified.push(worker);
            }
            Err(e) => tracing::warn!(index, error = %e, "could not reach worker"),
        }
    }
    Ok(notified)
}

/// Collect every finished worker without blocking
///
/// Returns the workers reaped along with how they ended.
pub fn reap_workers() -> Vec<WaitStatus> {
    let mut reaped = Vec::new();
    loop {
        match waitpid(None::<Pid>, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => break,
            Ok(status) => {
                tracing::info!(?status, "worker finished");
                reaped.push(status);
            }
            Err(Errno::EINTR) => {}
            Err(e) => {
                tracing::warn!(error = %e, "could not reap worker");
                break;
            }
        }
    }
    reaped
}
