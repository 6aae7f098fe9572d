//! Fixed-width layout of a passenger slot

use std::fmt;

use bytemuck::{bytes_of, pod_read_unaligned, Pod, Zeroable};

/// Width of the password field, including the NUL terminator
pub const PASSWORD_LEN: usize = 40;
/// Width of the name field, including the NUL terminator
pub const NAME_LEN: usize = 60;
/// Width of the flight number field, including the NUL terminator
pub const FLIGHT_LEN: usize = 8;

/// Size in bytes of one encoded [`CheckInRecord`]
pub const RECORD_SIZE: usize = 4 + PASSWORD_LEN + NAME_LEN + FLIGHT_LEN + 4 + 4;

/// Value of a process id field when no process is attached
pub const NO_PROCESS: i32 = -1;

/// One passenger slot, as stored in the database and carried by a session
#[derive(Clone, PartialEq, Eq)]
pub struct CheckInRecord {
    /// Passenger tax identification number, the lookup key
    pub tax_id: i32,
    /// Clear-text credential
    pub password: String,
    /// Passenger name
    pub name: String,
    /// Flight the passenger is booked on
    pub flight_number: String,
    /// Process id of the client attached to this slot, or [`NO_PROCESS`]
    pub client_pid: i32,
    /// Process id of the worker holding this slot, or [`NO_PROCESS`]
    pub worker_pid: i32,
}

impl fmt::Debug for CheckInRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckInRecord")
            .field("tax_id", &self.tax_id)
            .field("password", &format_args!(".."))
            .field("name", &self.name)
            .field("flight_number", &self.flight_number)
            .field("client_pid", &self.client_pid)
            .field("worker_pid", &self.worker_pid)
            .finish()
    }
}

impl CheckInRecord {
    /// Create a record with no client or worker attached
    pub fn new(
        tax_id: i32,
        password: impl Into<String>,
        name: impl Into<String>,
        flight_number: impl Into<String>,
    ) -> Self {
        Self {
            tax_id,
            password: password.into(),
            name: name.into(),
            flight_number: flight_number.into(),
            client_pid: NO_PROCESS,
            worker_pid: NO_PROCESS,
        }
    }

    /// The attached client, if any
    #[inline]
    pub fn client(&self) -> Option<i32> {
        (self.client_pid > 0).then_some(self.client_pid)
    }

    /// The worker holding this slot, if any
    #[inline]
    pub fn worker(&self) -> Option<i32> {
        (self.worker_pid > 0).then_some(self.worker_pid)
    }

    /// Whether the slot can be taken by a new check-in
    #[inline]
    pub fn is_free(&self) -> bool {
        self.client_pid == NO_PROCESS && self.worker_pid == NO_PROCESS
    }

    /// Detach both client and worker, ending the session
    pub fn released(mut self) -> Self {
        self.client_pid = NO_PROCESS;
        self.worker_pid = NO_PROCESS;
        self
    }

    /// Encode into the on-disk layout
    ///
    /// Strings longer than their field are cut at a character boundary so
    /// that the last byte of every field stays NUL.
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut raw = RawCheckIn::zeroed();
        raw.tax_id = self.tax_id;
        put_str(&mut raw.password, &self.password);
        put_str(&mut raw.name, &self.name);
        put_str(&mut raw.flight_number, &self.flight_number);
        raw.client_pid = self.client_pid;
        raw.worker_pid = self.worker_pid;

        let mut buf = [0u8; RECORD_SIZE];
        buf.copy_from_slice(bytes_of(&raw));
        buf
    }

    /// Decode from the on-disk layout
    pub fn decode(buf: &[u8; RECORD_SIZE]) -> Self {
        let raw: RawCheckIn = pod_read_unaligned(buf);
        Self {
            tax_id: raw.tax_id,
            password: get_str(&raw.password),
            name: get_str(&raw.name),
            flight_number: get_str(&raw.flight_number),
            client_pid: raw.client_pid,
            worker_pid: raw.worker_pid,
        }
    }
}

/// A slot exactly as it sits in the database file, in native byte order
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RawCheckIn {
    tax_id: i32,
    password: [u8; PASSWORD_LEN],
    name: [u8; NAME_LEN],
    flight_number: [u8; FLIGHT_LEN],
    client_pid: i32,
    worker_pid: i32,
}

const _: () = assert!(std::mem::size_of::<RawCheckIn>() == RECORD_SIZE);

fn put_str(field: &mut [u8], s: &str) {
    let mut len = s.len().min(field.len() - 1);
    while !s.is_char_boundary(len) {
        len -= 1;
    }
    field[..len].copy_from_slice(&s.as_bytes()[..len]);
}

fn get_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}
