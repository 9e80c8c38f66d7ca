//! Pool of persistent worker processes.
//!
//! Each worker is a separate OS process holding one browser session for its
//! whole life. The parent owns two shared FIFO channels and relays between
//! them and the workers over JSON lines on each worker's stdin/stdout.
//!
//! # Architecture
//!
//! ```text
//!   dispatch()                                         get_result()
//!       │                                                   ▲
//!  ┌────▼────────┐                                   ┌──────┴───────┐
//!  │ job channel │                                   │result channel│
//!  └──┬───────┬──┘                                   └──▲───────▲───┘
//!     │       │                                         │       │
//!  ┌──▼───┐ ┌─▼────┐        stdin / stdout           ┌──┴───┐   │
//!  │link 0│ │link 1│ ◄──────────────────────────────►│link 0│  ...
//!  └──┬───┘ └──┬───┘                                 └──────┘
//!     │        │
//!  ┌──▼──────┐ ┌▼────────┐
//!  │Worker 0 │ │Worker 1 │   one process and one session each
//!  └─────────┘ └─────────┘
//! ```
//!
//! # Lifecycle
//!
//! - `start()` blocks until every worker has acquired its session; one
//!   failure tears the rest down and fails the start.
//! - `stop()` queues one stop sentinel per worker and waits for all of them
//!   to exit. In-flight jobs are never preempted.
//! - A worker that dies mid-job produces no result for that job. The death
//!   is logged and shows up in [`PoolHealth`] as a degraded pool.
//! - A worker that dies between jobs takes no further jobs; the surviving
//!   workers drain the queue.

mod health;
mod ipc;
mod link;
mod manager;
mod proc;
mod protocol;
mod signals;
mod spawn;

pub use health::{PoolHealth, PoolStatus};
pub use ipc::{LineReader, LineWriter};
pub use manager::{WorkerPool, WorkerPoolConfig, WorkerPoolStats};
pub use proc::{Proc, ProcHandle};
pub use protocol::{WorkRequest, WorkResponse};
pub use signals::{TerminationReason, analyze_exit_status};
pub use spawn::{WORKER_ID_ENV, WorkerCommand, spawn_worker, worker_id_from_env};
