//! Data models for Stash

mod id;
mod message;
mod pending;
mod tab;

pub use id::LocalId;
pub use message::{MediaRef, Message};
pub use pending::{EntityKind, NewPendingOperation, OperationKind, PendingOperation};
pub use tab::Tab;
