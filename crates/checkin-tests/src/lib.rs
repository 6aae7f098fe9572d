//! Test harness for the check-in system
//!
//! Every test gets its own scratch directory holding a seeded passenger
//! database and room for a request channel, plus a [`RecordingNotifier`] that
//! captures events instead of signalling real processes.

use std::collections::HashSet;
use std::io;
use std::path::PathBuf;

use checkin_core::{CheckInRecord, Config, Event};
use checkin_ipc::{database::sample_passengers, Error, Notifier, RecordStore, Slots, Worker};
use eyre::Result;
use nix::errno::Errno;
use nix::unistd::Pid;
use parking_lot::Mutex;
use tempfile::TempDir;

/// [`Notifier`] remembering every event instead of delivering it
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(Pid, Event)>>,
    unreachable: Mutex<HashSet<Pid>>,
}

impl RecordingNotifier {
    /// Every event sent so far, in order
    pub fn sent(&self) -> Vec<(Pid, Event)> {
        self.sent.lock().clone()
    }

    /// Events sent to `pid`, in order
    pub fn sent_to(&self, pid: i32) -> Vec<Event> {
        let pid = Pid::from_raw(pid);
        self.sent
            .lock()
            .iter()
            .filter(|(to, _)| *to == pid)
            .map(|(_, event)| *event)
            .collect()
    }

    /// Make deliveries to `pid` fail as if the process were gone
    pub fn make_unreachable(&self, pid: i32) {
        self.unreachable.lock().insert(Pid::from_raw(pid));
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, pid: Pid, event: Event) -> checkin_ipc::Result<()> {
        if self.unreachable.lock().contains(&pid) {
            return Err(Error::Notify {
                pid,
                event,
                source: Errno::ESRCH,
            });
        }
        tracing::debug!(%pid, ?event, "recorded event");
        self.sent.lock().push((pid, event));
        Ok(())
    }
}

/// [`Slots`] over a [`RecordStore`] whose first writes fail as if the disk
/// were full
pub struct FailingWrites<'a> {
    store: &'a RecordStore,
    failures: Mutex<usize>,
    puts: Mutex<Vec<(usize, CheckInRecord)>>,
}

impl<'a> FailingWrites<'a> {
    /// Fail the next `failures` writes to `store`
    pub fn new(store: &'a RecordStore, failures: usize) -> Self {
        Self {
            store,
            failures: Mutex::new(failures),
            puts: Mutex::new(Vec::new()),
        }
    }

    /// Every write attempted so far, failed or not, in order
    pub fn puts(&self) -> Vec<(usize, CheckInRecord)> {
        self.puts.lock().clone()
    }
}

impl Slots for FailingWrites<'_> {
    fn find(&self, tax_id: i32) -> checkin_ipc::Result<Option<(usize, CheckInRecord)>> {
        self.store.find(tax_id)
    }

    fn put(&self, index: usize, record: &CheckInRecord) -> checkin_ipc::Result<()> {
        self.puts.lock().push((index, record.clone()));
        let mut failures = self.failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(Error::StoreWrite {
                index,
                source: io::Error::from_raw_os_error(Errno::ENOSPC as i32),
            });
        }
        self.store.put(index, record)
    }
}

/// Builder for a [`TestCtx`]
pub struct TestCtxBuilder {
    /// Number of sample passengers in the database
    pub passengers: usize,
    /// Worker process ids to preset, by slot index
    pub workers: Vec<(usize, i32)>,
    /// Maximum wait in seconds
    pub max_wait: u32,
}

impl Default for TestCtxBuilder {
    fn default() -> Self {
        Self {
            passengers: 4,
            workers: Vec::new(),
            max_wait: 1,
        }
    }
}

impl TestCtxBuilder {
    /// Start from four passengers and a one second maximum wait
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of sample passengers
    pub fn with_passengers(mut self, passengers: usize) -> Self {
        self.passengers = passengers;
        self
    }

    /// Mark slot `index` as held by worker `pid`
    pub fn with_worker(mut self, index: usize, pid: i32) -> Self {
        self.workers.push((index, pid));
        self
    }

    /// Set the maximum wait (in seconds)
    pub fn with_max_wait(mut self, max_wait: u32) -> Self {
        assert_ne!(max_wait, 0);
        self.max_wait = max_wait;
        self
    }

    /// Create the scratch directory and the database
    pub fn build(self) -> Result<TestCtx> {
        let dir = tempfile::tempdir()?;

        let mut records = sample_passengers(self.passengers);
        for (index, pid) in self.workers {
            records[index].worker_pid = pid;
        }

        let config = Config {
            max_wait: self.max_wait,
            fifo: dir.path().join("server.fifo"),
            database: dir.path().join("bd_passageiros.dat"),
        };
        let store = RecordStore::create(&config.database, &records)?;

        Ok(TestCtx {
            store,
            config,
            notifier: RecordingNotifier::default(),
            dir,
        })
    }
}

/// Test context
pub struct TestCtx {
    /// The seeded passenger database
    pub store: RecordStore,
    /// Configuration pointing into the scratch directory
    pub config: Config,
    /// Captures the events sent by the code under test
    pub notifier: RecordingNotifier,
    dir: TempDir,
}

impl TestCtx {
    /// A worker running in this process, reporting to [`TestCtx::notifier`]
    pub fn worker(&self) -> Worker<'_, RecordStore, RecordingNotifier> {
        Worker::new(&self.store, &self.notifier, self.config.max_wait)
    }

    /// Like [`TestCtx::worker`], on top of `slots` instead of the database
    pub fn worker_on<'s, S: Slots>(&'s self, slots: &'s S) -> Worker<'s, S, RecordingNotifier> {
        Worker::new(slots, &self.notifier, self.config.max_wait)
    }

    /// Every slot of the database, in index order
    pub fn slots(&self) -> Result<Vec<CheckInRecord>> {
        let mut slots = Vec::new();
        for slot in self.store.scan()? {
            slots.push(slot?.1);
        }
        Ok(slots)
    }

    /// A path inside the scratch directory
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

/// Process id of the test process, as stored in records
pub fn own_pid() -> i32 {
    Pid::this().as_raw()
}
