//! Server-side settlement: durable job queue, payment capture, worker.

mod backoff;
mod job;
mod payment;
mod worker;

pub use backoff::*;
pub use job::*;
pub use payment::*;
pub use worker::*;
