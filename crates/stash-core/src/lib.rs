//! stash-core - Core library for Stash
//!
//! This crate contains the shared models, the local libSQL store, and the
//! offline-first sync engine used by every Stash client: the pending operation
//! log, the authenticated transport, the sync orchestrator, the deferred
//! reconciliation queue, and the realtime channel.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod editor;
pub mod error;
pub mod media;
pub mod models;
pub mod realtime;
pub mod services;
pub mod session;
pub mod state;
pub mod sync;
pub mod util;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{Error, Result};
pub use models::{LocalId, Message, PendingOperation, Tab};
