//! :airplane: The processes of the check-in system and the IPC they share.
//!
//! Components, leaf first: the passenger [database], the request [channel],
//! event delivery through [signals], the [worker] handling one session, the
//! [dispatcher] forking workers and the [client] submitting requests.

mod error;

pub mod channel;
pub mod client;
pub mod database;
pub mod dispatcher;
pub mod signals;
pub mod worker;

pub use channel::RequestChannel;
pub use database::{RecordStore, Slots};
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use signals::{Kill, Notifier};
pub use worker::Worker;
