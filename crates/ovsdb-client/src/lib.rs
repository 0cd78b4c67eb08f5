//! Asynchronous client for the Open vSwitch Database Management Protocol
//! (RFC 7047).
//!
//! Covers what a host agent needs: `transact`, `monitor` with an in-memory
//! replica of the monitored tables, row change events, and answering the
//! server's `echo` keepalives.

mod cache;
mod client;
mod codec;
mod error;
mod operation;
pub mod value;

pub use cache::{EventKind, Row, RowEvent, TableCache};
pub use client::{Endpoint, MonitorRequest, OvsDbClient};
pub use error::{OvsDbError, Result};
pub use operation::{Condition, Mutation, Mutator, Operation, OperationResult};
