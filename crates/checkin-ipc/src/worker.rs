//! Implementation of the worker (dedicated server)
//!
//! A worker is forked by the dispatcher for exactly one request and runs it
//! through search, reserve, acknowledge and close before exiting. The request
//! and the session record are passed from step to step explicitly.

use std::thread::sleep;
use std::time::Duration;

use checkin_core::{CheckInRecord, Event, Request};
use nix::unistd::Pid;
use rand::Rng;

use crate::database::Slots;
use crate::error::{Error, Result};
use crate::signals::Notifier;

/// Worker handling a single check-in session
pub struct Worker<'a, S, N> {
    store: &'a S,
    notifier: &'a N,
    max_wait: u32,
    pid: Pid,
}

impl<'a, S: Slots, N: Notifier> Worker<'a, S, N> {
    /// Create a worker identified by the calling process
    pub fn new(store: &'a S, notifier: &'a N, max_wait: u32) -> Self {
        Self {
            store,
            notifier,
            max_wait,
            pid: Pid::this(),
        }
    }

    /// Process id written into the reserved slot
    #[inline]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Run the whole session for `request`
    ///
    /// The client receives exactly one event: [`Event::ClientRejected`] when
    /// search or reserve fail, [`Event::ClientAccepted`] otherwise. Failures
    /// of the close step are only reported through the returned error.
    pub fn serve(&self, request: Request) -> Result<()> {
        let client = Pid::from_raw(request.client_pid());

        let (index, stored) = self
            .search(&request)
            .map_err(|e| self.reject(client, e))?;

        let session = request.check_in(&stored, self.pid.as_raw());
        match self.reserve(index, &session) {
            Ok(()) => self.acknowledge(client),
            Err(e @ Error::StoreWrite { .. }) => {
                let e = self.reject(client, e);
                tracing::warn!(index, error = %e, "reservation not persisted, closing without acknowledgement");
            }
            Err(e) => return Err(self.reject(client, e)),
        }

        self.close(index, session)?;
        Ok(())
    }

    /// Find the passenger's slot and check the password
    ///
    /// The first slot with a matching tax id decides: a password mismatch
    /// there is final even if a later slot would match.
    pub fn search(&self, request: &Request) -> Result<(usize, CheckInRecord)> {
        let Some((index, stored)) = self.store.find(request.tax_id())? else {
            return Err(Error::NotFound(request.tax_id()));
        };
        if stored.password.as_bytes() != request.password().as_bytes() {
            return Err(Error::WrongPassword(request.tax_id()));
        }
        tracing::info!(index, tax_id = request.tax_id(), "passenger found");
        Ok((index, stored))
    }

    /// Persist the session into slot `index`, attaching client and worker
    pub fn reserve(&self, index: usize, session: &CheckInRecord) -> Result<()> {
        tracing::info!(
            index,
            name = %session.name,
            flight = %session.flight_number,
            worker = session.worker_pid,
            "reserving slot"
        );
        self.store.put(index, session)
    }

    /// Wait a random delay, then tell the client it is checked in
    pub fn acknowledge(&self, client: Pid) {
        let delay = ack_delay(self.max_wait, &mut rand::thread_rng());
        tracing::info!(secs = delay.as_secs(), %client, "acknowledging after delay");
        sleep(delay);
        if let Err(e) = self.notifier.notify(client, Event::ClientAccepted) {
            tracing::warn!(error = %e, "client missed the acknowledgement");
        }
    }

    /// Detach client and worker from slot `index`, ending the session
    ///
    /// Writing an already released record leaves the slot unchanged.
    pub fn close(&self, index: usize, session: CheckInRecord) -> Result<CheckInRecord> {
        let released = session.released();
        self.store.put(index, &released)?;
        tracing::info!(index, "session closed");
        Ok(released)
    }

    /// Tell the client its request failed, passing `err` through
    fn reject(&self, client: Pid, err: Error) -> Error {
        tracing::error!(error = %err, %client, "rejecting check-in");
        if let Err(e) = self.notifier.notify(client, Event::ClientRejected) {
            tracing::warn!(error = %e, "client missed the rejection");
        }
        err
    }
}

/// Acknowledgement delay, uniformly drawn from `1..=max_wait` seconds
pub fn ack_delay<R: Rng + ?Sized>(max_wait: u32, rng: &mut R) -> Duration {
    Duration::from_secs(rng.gen_range(1..=max_wait.max(1)) as u64)
}
