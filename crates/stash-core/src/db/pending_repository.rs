//! Pending operation log storage

use libsql::{params, Connection, Row};

use super::optional_text;
use crate::error::{Error, Result};
use crate::models::{NewPendingOperation, PendingOperation};

/// Trait for pending operation storage (async)
#[allow(async_fn_in_trait)]
pub trait PendingRepository {
    /// Append an operation and return the stored record
    async fn append(&self, operation: &NewPendingOperation) -> Result<PendingOperation>;

    /// List every operation ordered by creation time
    async fn list(&self) -> Result<Vec<PendingOperation>>;

    /// Remove an operation. Returns `false` when it was already gone.
    async fn remove(&self, id: i64) -> Result<bool>;

    /// Persist the retry counter and last error of an operation
    async fn record_failure(&self, operation: &PendingOperation) -> Result<()>;

    /// Number of stored operations
    async fn count(&self) -> Result<u64>;

    /// Remove every operation
    async fn clear(&self) -> Result<()>;
}

/// libSQL implementation of `PendingRepository`
pub struct LibSqlPendingRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlPendingRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_operation(row: &Row) -> Result<PendingOperation> {
        let kind: String = row.get(1)?;
        let entity: String = row.get(2)?;
        let local_id: String = row.get(3)?;
        let payload: String = row.get(4)?;
        let retry_count: i64 = row.get(6)?;

        Ok(PendingOperation {
            id: row.get(0)?,
            kind: kind.parse().map_err(Error::Database)?,
            entity: entity.parse().map_err(Error::Database)?,
            local_id: local_id
                .parse()
                .map_err(|_| Error::Database(format!("invalid local id '{local_id}'")))?,
            payload: serde_json::from_str(&payload)?,
            created_at: row.get(5)?,
            retry_count: u32::try_from(retry_count).unwrap_or(u32::MAX),
            last_error: optional_text(row, 7)?,
        })
    }
}

impl PendingRepository for LibSqlPendingRepository<'_> {
    async fn append(&self, operation: &NewPendingOperation) -> Result<PendingOperation> {
        let created_at = chrono::Utc::now().timestamp_millis();
        let payload = serde_json::to_string(&operation.payload)?;

        self.conn
            .execute(
                "INSERT INTO pending_operations (kind, entity, local_id, payload, created_at, retry_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0)",
                params![
                    operation.kind.as_str(),
                    operation.entity.as_str(),
                    operation.local_id.as_str(),
                    payload,
                    created_at
                ],
            )
            .await?;

        Ok(PendingOperation {
            id: self.conn.last_insert_rowid(),
            kind: operation.kind,
            entity: operation.entity,
            local_id: operation.local_id,
            payload: operation.payload.clone(),
            created_at,
            retry_count: 0,
            last_error: None,
        })
    }

    async fn list(&self) -> Result<Vec<PendingOperation>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, kind, entity, local_id, payload, created_at, retry_count, last_error
                 FROM pending_operations ORDER BY created_at ASC, id ASC",
                (),
            )
            .await?;

        let mut operations = Vec::new();
        while let Some(row) = rows.next().await? {
            operations.push(Self::parse_operation(&row)?);
        }
        Ok(operations)
    }

    async fn remove(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM pending_operations WHERE id = ?1", params![id])
            .await?;
        Ok(rows > 0)
    }

    async fn record_failure(&self, operation: &PendingOperation) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE pending_operations SET retry_count = ?1, last_error = ?2 WHERE id = ?3",
                params![
                    i64::from(operation.retry_count),
                    super::text_or_null(operation.last_error.as_deref()),
                    operation.id
                ],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("pending operation {}", operation.id)));
        }
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM pending_operations", ())
            .await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn clear(&self) -> Result<()> {
        self.conn
            .execute("DELETE FROM pending_operations", ())
            .await?;
        Ok(())
    }
}
