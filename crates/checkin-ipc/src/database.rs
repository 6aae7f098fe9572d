//! Implementation of the passenger database
//!
//! The database is a direct-access file of fixed-size [`CheckInRecord`]s. A
//! slot is addressed only by its position: slot `i` lives at byte offset
//! `i * RECORD_SIZE`.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use checkin_core::{CheckInRecord, RECORD_SIZE};
use nix::unistd::{access, AccessFlags};

use crate::error::{Error, Result};

/// Handle on the passenger database file
///
/// Every operation opens the file anew, so a handle is cheap to clone and
/// safe to carry across `fork`.
#[derive(Clone, Debug)]
pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    /// Refer to the database at `path` without touching it
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Write a fresh database holding `records`, replacing any existing file
    pub fn create(path: impl Into<PathBuf>, records: &[CheckInRecord]) -> Result<Self> {
        let store = Self::new(path);
        let open_err = |source| Error::StoreOpen {
            path: store.path.clone(),
            source,
        };
        let mut file = File::create(&store.path).map_err(open_err)?;
        for (index, record) in records.iter().enumerate() {
            file.write_all(&record.encode())
                .map_err(|source| Error::StoreWrite { index, source })?;
        }
        file.sync_all().map_err(open_err)?;
        Ok(store)
    }

    /// Write a database of `count` sample passengers
    ///
    /// Slot `i` holds tax id `1000001 + i`, password `pass_{i+1}`, name
    /// `Name{i+1} Surname{i+1}` and flight `TAP` followed by `(i+1) % 1000` on
    /// three digits, with no process attached.
    pub fn seed(path: impl Into<PathBuf>, count: usize) -> Result<Self> {
        Self::create(path, &sample_passengers(count))
    }

    /// Path of the database file
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check the database exists and may be read and written
    pub fn check_access(&self) -> Result<()> {
        access(&self.path, AccessFlags::R_OK | AccessFlags::W_OK).map_err(|source| {
            Error::StoreUnavailable {
                path: self.path.clone(),
                source,
            }
        })
    }

    /// Open the database read-only and iterate over its slots in index order
    pub fn scan(&self) -> Result<Scan> {
        let file = File::open(&self.path).map_err(|source| Error::StoreOpen {
            path: self.path.clone(),
            source,
        })?;
        Ok(Scan {
            reader: BufReader::new(file),
            index: 0,
            done: false,
        })
    }

    /// Number of complete slots in the database
    pub fn len(&self) -> Result<usize> {
        let meta = std::fs::metadata(&self.path).map_err(|source| Error::StoreOpen {
            path: self.path.clone(),
            source,
        })?;
        Ok(meta.len() as usize / RECORD_SIZE)
    }

    /// Whether the database holds no slot at all
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Read slot `index`
    pub fn get(&self, index: usize) -> Result<CheckInRecord> {
        let mut file = File::open(&self.path).map_err(|source| Error::StoreOpen {
            path: self.path.clone(),
            source,
        })?;
        file.seek(SeekFrom::Start(offset(index)))
            .map_err(|source| Error::StoreSeek { index, source })?;

        let mut buf = [0u8; RECORD_SIZE];
        match file.read_exact(&mut buf) {
            Ok(()) => Ok(CheckInRecord::decode(&buf)),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(Error::NoSuchSlot(index)),
            Err(source) => Err(Error::StoreRead { index, source }),
        }
    }

    /// Overwrite slot `index` with `record`
    ///
    /// The file is opened read-write without creating it. Open, seek and write
    /// failures are reported as distinct errors since callers treat them
    /// differently.
    pub fn put(&self, index: usize, record: &CheckInRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|source| Error::StoreOpen {
                path: self.path.clone(),
                source,
            })?;
        file.seek(SeekFrom::Start(offset(index)))
            .map_err(|source| Error::StoreSeek { index, source })?;
        file.write_all(&record.encode())
            .and_then(|()| file.flush())
            .map_err(|source| Error::StoreWrite { index, source })
    }

    /// First slot whose tax id is `tax_id`
    pub fn find(&self, tax_id: i32) -> Result<Option<(usize, CheckInRecord)>> {
        for slot in self.scan()? {
            let (index, record) = slot?;
            if record.tax_id == tax_id {
                return Ok(Some((index, record)));
            }
        }
        Ok(None)
    }
}

/// Slot access needed by a [`Worker`](crate::Worker)
pub trait Slots {
    /// First slot whose tax id is `tax_id`
    fn find(&self, tax_id: i32) -> Result<Option<(usize, CheckInRecord)>>;

    /// Overwrite slot `index` with `record`
    fn put(&self, index: usize, record: &CheckInRecord) -> Result<()>;
}

impl Slots for RecordStore {
    fn find(&self, tax_id: i32) -> Result<Option<(usize, CheckInRecord)>> {
        RecordStore::find(self, tax_id)
    }

    fn put(&self, index: usize, record: &CheckInRecord) -> Result<()> {
        RecordStore::put(self, index, record)
    }
}

#[inline]
fn offset(index: usize) -> u64 {
    (index * RECORD_SIZE) as u64
}

/// Sample passengers used to seed test databases
pub fn sample_passengers(count: usize) -> Vec<CheckInRecord> {
    (1..=count)
        .map(|idx| {
            CheckInRecord::new(
                1_000_000 + idx as i32,
                format!("pass_{idx}"),
                format!("Name{idx} Surname{idx}"),
                format!("TAP{:03}", idx % 1000),
            )
        })
        .collect()
}

/// Iterator over the slots of a [`RecordStore`], see [`RecordStore::scan`]
pub struct Scan {
    reader: BufReader<File>,
    index: usize,
    done: bool,
}

impl Iterator for Scan {
    type Item = Result<(usize, CheckInRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut buf = [0u8; RECORD_SIZE];
        let mut filled = 0;
        while filled < RECORD_SIZE {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(source) => {
                    self.done = true;
                    return Some(Err(Error::StoreRead {
                        index: self.index,
                        source,
                    }));
                }
            }
        }

        if filled < RECORD_SIZE {
            self.done = true;
            if filled > 0 {
                tracing::warn!(
                    index = self.index,
                    bytes = filled,
                    "ignoring trailing partial record"
                );
            }
            return None;
        }

        let index = self.index;
        self.index += 1;
        Some(Ok((index, CheckInRecord::decode(&buf))))
    }
}
