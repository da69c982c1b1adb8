//! Application database, account and grants.

use crate::client::{AccountHost, SqlClient, Statement};
use crate::credentials::BootstrapCredentials;
use crate::error::{Error, Result};

/// Statements applied on every run, in order. All are idempotent.
///
/// The grant is scoped to the application database. When `secure_root` is
/// set, root's password is assigned last so a failure earlier in the batch
/// leaves root reachable for the rerun.
pub fn bootstrap_statements(creds: &BootstrapCredentials, secure_root: bool) -> Vec<Statement> {
    let mut statements = vec![
        Statement::CreateDatabase {
            name: creds.database_name.clone(),
        },
        Statement::CreateUser {
            user: creds.app_user.clone(),
            host: AccountHost::Any,
            password: creds.app_password.clone(),
        },
        Statement::GrantDatabase {
            database: creds.database_name.clone(),
            user: creds.app_user.clone(),
            host: AccountHost::Any,
        },
        Statement::FlushPrivileges,
    ];
    if secure_root {
        statements.push(Statement::SetRootPassword {
            password: creds.root_password.clone(),
        });
    }
    statements
}

/// Apply the bootstrap statements. There is no fallback on failure.
#[tracing::instrument(skip_all, fields(database = %creds.database_name, user = %creds.app_user))]
pub async fn bootstrap(
    client: &dyn SqlClient,
    creds: &BootstrapCredentials,
    secure_root: bool,
) -> Result<()> {
    let statements = bootstrap_statements(creds, secure_root);
    client
        .execute(&statements)
        .await
        .map_err(|e| Error::Bootstrap(e.to_string()))?;
    tracing::info!(secured_root = secure_root, "Database and grants applied");
    Ok(())
}

/// List databases and check the application database is among them.
pub async fn verify(client: &dyn SqlClient, creds: &BootstrapCredentials) -> Result<Vec<String>> {
    let databases = client
        .execute(&[Statement::ShowDatabases])
        .await
        .map_err(|e| Error::Bootstrap(e.to_string()))?;
    if !databases.iter().any(|d| d == creds.database_name.as_str()) {
        return Err(Error::Bootstrap(format!(
            "database '{}' missing after bootstrap (server lists: {})",
            creds.database_name,
            databases.join(", ")
        )));
    }
    Ok(databases)
}
