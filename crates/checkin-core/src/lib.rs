//! 🏗 Shared vocabulary of the check-in system: the passenger record layout,
//! the request wire format, the events processes exchange and the
//! configuration.
#![warn(missing_docs)]

mod config;
mod event;
pub mod record;
mod request;

pub use config::{Config, ConfigError, CONFIG_FILE};
pub use event::Event;
pub use record::{CheckInRecord, NO_PROCESS, RECORD_SIZE};
pub use request::{parse_tax_id, validate_password, ParseError, Request, TAX_ID_MAX};
