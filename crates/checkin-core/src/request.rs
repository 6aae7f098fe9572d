use std::fmt;

use thiserror::Error;

use crate::record::{CheckInRecord, PASSWORD_LEN};

/// Largest accepted tax id (nine decimal digits)
pub const TAX_ID_MAX: i32 = 999_999_999;

/// Reasons a request cannot be built or parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The message contained nothing
    #[error("empty request")]
    Empty,
    /// A field was absent
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    /// Tax id not a number or outside `(0, 999999999]`
    #[error("invalid tax id `{0}`")]
    InvalidTaxId(String),
    /// Password empty, too long or containing whitespace
    #[error("invalid password")]
    InvalidPassword,
    /// Client process id not a positive number
    #[error("invalid client process id `{0}`")]
    InvalidClient(String),
}

/// Check-in request carried over the request channel
///
/// A `Request` always holds a tax id in range, a usable password and a valid
/// client process id, so an invalid request can never reach a worker.
#[derive(Clone, PartialEq, Eq)]
pub struct Request {
    tax_id: i32,
    password: String,
    client_pid: i32,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("tax_id", &self.tax_id)
            .field("password", &format_args!(".."))
            .field("client_pid", &self.client_pid)
            .finish()
    }
}

impl Request {
    /// Build a request, validating every field
    pub fn new(tax_id: i32, password: impl Into<String>, client_pid: i32) -> Result<Self, ParseError> {
        if !(1..=TAX_ID_MAX).contains(&tax_id) {
            return Err(ParseError::InvalidTaxId(tax_id.to_string()));
        }
        let password = password.into();
        validate_password(&password)?;
        if client_pid <= 0 {
            return Err(ParseError::InvalidClient(client_pid.to_string()));
        }
        Ok(Self {
            tax_id,
            password,
            client_pid,
        })
    }

    /// Passenger tax id
    #[inline]
    pub fn tax_id(&self) -> i32 {
        self.tax_id
    }

    /// Credential as typed by the passenger
    #[inline]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Process id of the client awaiting the outcome
    #[inline]
    pub fn client_pid(&self) -> i32 {
        self.client_pid
    }

    /// Serialize for the request channel
    pub fn encode(&self) -> String {
        format!("{}\n{}\n{}\n", self.tax_id, self.password, self.client_pid)
    }

    /// Parse a message read from the request channel
    ///
    /// Fields are separated by any ASCII whitespace; trailing data after the
    /// third field is ignored.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let mut fields = raw.split_ascii_whitespace();
        let tax_id = fields.next().ok_or(ParseError::Empty)?;
        let tax_id = parse_tax_id(tax_id)?;
        let password = fields
            .next()
            .ok_or(ParseError::MissingField("password"))?;
        let client = fields
            .next()
            .ok_or(ParseError::MissingField("client_pid"))?;
        let client_pid = client
            .parse()
            .map_err(|_| ParseError::InvalidClient(client.to_owned()))?;
        Self::new(tax_id, password, client_pid)
    }

    /// Session record for this request checked in against `stored`
    ///
    /// Name and flight come from the database; the worker attaches itself.
    pub fn check_in(&self, stored: &CheckInRecord, worker_pid: i32) -> CheckInRecord {
        CheckInRecord {
            tax_id: self.tax_id,
            password: self.password.clone(),
            name: stored.name.clone(),
            flight_number: stored.flight_number.clone(),
            client_pid: self.client_pid,
            worker_pid,
        }
    }
}

/// Parse a tax id as typed by a passenger: 1 to 9 decimal digits, not zero
pub fn parse_tax_id(raw: &str) -> Result<i32, ParseError> {
    let raw = raw.trim();
    let invalid = || ParseError::InvalidTaxId(raw.to_owned());
    if raw.is_empty() || raw.len() > 9 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    match raw.parse() {
        Ok(tax_id) if tax_id > 0 => Ok(tax_id),
        _ => Err(invalid()),
    }
}

/// Check a password fits the record field and the wire format
pub fn validate_password(password: &str) -> Result<(), ParseError> {
    if password.is_empty()
        || password.len() >= PASSWORD_LEN
        || password.chars().any(|c| c.is_ascii_whitespace())
    {
        return Err(ParseError::InvalidPassword);
    }
    Ok(())
}
