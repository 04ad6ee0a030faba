//! Application layer: the dispatcher, the callback receiver and the
//! reconciliation sweeper, all resolving through one shared path.

pub mod dispatcher;
pub mod receiver;
pub(crate) mod resolution;
pub mod retry;
pub mod sweeper;
