//! trafficd - parallel traffic scoring over a pool of persistent
//! browser-session worker processes.
//!
//! The pieces, bottom-up:
//!
//! - [`pool`]: spawns worker processes, distributes jobs over a shared queue
//!   and collects results in completion order.
//! - [`worker`]: the worker process itself, owning one browser session.
//! - [`correlator`]: turns a list of locations into one batch and puts the
//!   results back in submission order.
//! - [`server`]: the HTTP API over the correlator.

pub mod correlator;
pub mod error;
pub mod job;
pub mod logging;
pub mod pool;
pub mod server;
pub mod sink;
pub mod worker;

pub use correlator::{BatchReport, Correlator, WorkQueue};
pub use error::{Result, TrafficError};
pub use pool::{WorkerPool, WorkerPoolConfig};
