//! Shared services used across the sync engine and clients.

mod store;

pub use store::LocalStore;
