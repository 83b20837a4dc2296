//! Session traits the pipeline stages execute against.
//!
//! - [`SqlSession`]: executes T-SQL batches and brackets them in transactions
//! - [`CatalogSession`]: a source session that can also read the catalog
//! - [`SessionFactory`]: hands out fresh, exclusively-owned sessions per role
//!
//! A session is never shared between workers. Each table worker asks the
//! factory for its own source, destination and staging sessions and drops
//! them when its attempt ends.

use async_trait::async_trait;

use crate::error::Result;
use crate::source::ColumnDescriptor;

/// A single database session.
#[async_trait]
pub trait SqlSession: Send {
    /// Execute a batch, discarding any result sets.
    async fn execute(&mut self, sql: &str) -> Result<()>;

    /// Open a transaction on this session.
    async fn begin(&mut self) -> Result<()> {
        self.execute("BEGIN TRANSACTION").await
    }

    /// Commit the open transaction.
    async fn commit(&mut self) -> Result<()> {
        self.execute("COMMIT TRANSACTION").await
    }

    /// Roll back the open transaction, if any is still active.
    async fn rollback(&mut self) -> Result<()> {
        self.execute("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await
    }
}

/// A source-side session with catalog access.
#[async_trait]
pub trait CatalogSession: SqlSession {
    /// Names of all base tables in `schema`, ordered by name.
    async fn base_tables(&mut self, schema: &str) -> Result<Vec<String>>;

    /// Column metadata for one table, in ordinal order.
    async fn columns(&mut self, schema: &str, table: &str) -> Result<Vec<ColumnDescriptor>>;
}

/// Opens sessions for each connection role.
///
/// Implementations must return an independent session on every call so that
/// concurrent workers never interleave statements on one connection.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Establish connectivity ahead of the first session request.
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    /// Session on the source database.
    async fn source(&self) -> Result<Box<dyn CatalogSession>>;

    /// Session on the destination database.
    async fn destination(&self) -> Result<Box<dyn SqlSession>>;

    /// Session on the staging database (tempdb).
    async fn staging(&self) -> Result<Box<dyn SqlSession>>;
}
