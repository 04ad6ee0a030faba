//! Domain layer: the payout state machine, reconciliation records and the
//! ports the application layer depends on.

pub mod notification;
pub mod payout;
pub mod ports;
pub mod provider;
pub mod reconciliation;
