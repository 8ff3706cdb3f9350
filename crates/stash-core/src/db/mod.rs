//! Database layer for Stash

mod connection;
mod entity_repository;
mod migrations;
mod pending_repository;
mod state_repository;

pub use connection::Database;
pub use entity_repository::{EntityRepository, LibSqlEntityRepository};
pub use pending_repository::{LibSqlPendingRepository, PendingRepository};
pub use state_repository::{
    LibSqlStateRepository, StateRepository, KEY_INITIAL_SYNC_COMPLETE, KEY_SYNC_WATERMARK,
};

/// Read a nullable TEXT column.
pub(crate) fn optional_text(row: &libsql::Row, index: i32) -> crate::Result<Option<String>> {
    match row.get_value(index)? {
        libsql::Value::Null => Ok(None),
        libsql::Value::Text(value) => Ok(Some(value)),
        other => Err(crate::Error::Database(format!(
            "expected TEXT or NULL in column {index}, found {other:?}"
        ))),
    }
}

/// Bind an optional string as TEXT or NULL.
pub(crate) fn text_or_null(value: Option<&str>) -> libsql::Value {
    value.map_or(libsql::Value::Null, |value| {
        libsql::Value::Text(value.to_string())
    })
}
