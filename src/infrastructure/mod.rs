//! Adapters implementing the domain ports.

pub mod http_provider;
pub mod in_memory;
pub mod mock;
pub mod notifier;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
