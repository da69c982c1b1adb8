//! Client interface used by the readiness probe and the bootstrap stage.
//!
//! [`SqlClient`] takes structured [`Statement`]s; [`MysqlCli`] implements it by
//! running the installation's `mysql` binary against the server socket.

mod error;
mod mysql;
mod statement;

pub use error::*;
pub use mysql::*;
pub use statement::*;

use async_trait::async_trait;

/// Executes a batch of statements in order and returns the result rows
/// (tab-separated, no header), stopping at the first failing statement.
#[async_trait]
pub trait SqlClient: Send + Sync {
    async fn execute(&self, statements: &[Statement]) -> Result<Vec<String>, ClientError>;
}
