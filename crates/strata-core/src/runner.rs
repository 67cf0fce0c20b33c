//! Query runner: one reserved connection, explicit transaction control.
//!
//! A runner is single-owner and single-use. Once [`QueryRunner::release`]
//! has been called every further call fails with
//! [`CoreError::RunnerReleased`] instead of reconnecting.

use sqlx::pool::PoolConnection;
use sqlx::sqlite::{Sqlite, SqliteConnection, SqlitePool, SqliteRow};
use tracing::{debug, error, warn};

use crate::error::{CoreError, Result};
use crate::value::{Value, bind_value};

/// Outcome of a statement that returns no rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecuteResult {
    /// Rows changed by the statement.
    pub rows_affected: u64,
    /// Rowid of the last inserted row on this connection.
    pub last_insert_id: i64,
}

/// A connection reserved from the pool for one logical operation.
pub struct QueryRunner {
    connection: Option<PoolConnection<Sqlite>>,
    transaction_active: bool,
}

impl QueryRunner {
    /// Reserves a connection from the pool.
    pub async fn connect(pool: &SqlitePool) -> Result<Self> {
        let connection = pool.acquire().await?;
        Ok(Self {
            connection: Some(connection),
            transaction_active: false,
        })
    }

    /// Whether [`Self::release`] has been called.
    #[must_use]
    pub const fn is_released(&self) -> bool {
        self.connection.is_none()
    }

    /// Whether a transaction is open.
    #[must_use]
    pub const fn is_transaction_active(&self) -> bool {
        self.transaction_active
    }

    fn connection(&mut self) -> Result<&mut SqliteConnection> {
        self.connection
            .as_deref_mut()
            .ok_or(CoreError::RunnerReleased)
    }

    /// Opens a transaction.
    pub async fn begin_transaction(&mut self) -> Result<()> {
        if self.is_released() {
            return Err(CoreError::RunnerReleased);
        }
        if self.transaction_active {
            return Err(CoreError::TransactionAlreadyStarted);
        }
        self.run("BEGIN", &[]).await?;
        self.transaction_active = true;
        Ok(())
    }

    /// Commits the open transaction.
    pub async fn commit(&mut self) -> Result<()> {
        if self.is_released() {
            return Err(CoreError::RunnerReleased);
        }
        if !self.transaction_active {
            return Err(CoreError::TransactionNotStarted);
        }
        self.run("COMMIT", &[]).await?;
        self.transaction_active = false;
        Ok(())
    }

    /// Rolls back the open transaction.
    pub async fn rollback(&mut self) -> Result<()> {
        if self.is_released() {
            return Err(CoreError::RunnerReleased);
        }
        if !self.transaction_active {
            return Err(CoreError::TransactionNotStarted);
        }
        // The transaction is over whatever ROLLBACK reports.
        self.transaction_active = false;
        self.run("ROLLBACK", &[]).await?;
        Ok(())
    }

    /// Runs a statement and returns its rows.
    pub async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<SqliteRow>> {
        debug!(sql = %sql, params = ?params, "Query");
        let connection = self.connection()?;
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        query.fetch_all(connection).await.map_err(|err| {
            error!(sql = %sql, params = ?params, error = %err, "Query failed");
            CoreError::Database(err)
        })
    }

    /// Runs a statement that returns no rows.
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<ExecuteResult> {
        self.run(sql, params).await
    }

    async fn run(&mut self, sql: &str, params: &[Value]) -> Result<ExecuteResult> {
        debug!(sql = %sql, params = ?params, "Execute");
        let connection = self.connection()?;
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        match query.execute(connection).await {
            Ok(result) => Ok(ExecuteResult {
                rows_affected: result.rows_affected(),
                last_insert_id: result.last_insert_rowid(),
            }),
            Err(err) => {
                error!(sql = %sql, params = ?params, error = %err, "Statement failed");
                Err(CoreError::Database(err))
            }
        }
    }

    /// Returns the connection to the pool, rolling back an open transaction.
    pub async fn release(&mut self) -> Result<()> {
        if self.is_released() {
            return Err(CoreError::RunnerReleased);
        }
        let rollback = if self.transaction_active {
            self.rollback().await
        } else {
            Ok(())
        };
        if let Some(mut connection) = self.connection.take() {
            if rollback.is_err() {
                connection.close_on_drop();
            }
        }
        rollback
    }
}

impl Drop for QueryRunner {
    fn drop(&mut self) {
        if !self.transaction_active {
            return;
        }
        if let Some(connection) = self.connection.as_mut() {
            warn!("Query runner dropped inside a transaction, closing its connection");
            connection.close_on_drop();
        }
    }
}

impl std::fmt::Debug for QueryRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRunner")
            .field("released", &self.is_released())
            .field("transaction_active", &self.transaction_active)
            .finish()
    }
}
