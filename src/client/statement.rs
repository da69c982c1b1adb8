//! Structured bootstrap statements.
//!
//! Callers never build SQL text. Identifiers are validated against a strict
//! character set and quoted; passwords only ever appear as escaped string
//! literals, and statements carrying them are flagged so the client can keep
//! them out of argv.

use crate::error::{Error, Result};
use std::fmt;

const MAX_IDENTIFIER_LEN: usize = 64;

/// A validated schema or account name: `[A-Za-z0-9_$]{1,64}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() || name.len() > MAX_IDENTIFIER_LEN {
            return Err(Error::InvalidStatement(format!(
                "identifier '{}' must be 1-{} characters",
                name, MAX_IDENTIFIER_LEN
            )));
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '$'))
        {
            return Err(Error::InvalidStatement(format!(
                "identifier '{}' contains '{}'; only letters, digits, '_' and '$' are allowed",
                name, bad
            )));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn quoted(&self) -> String {
        format!("`{}`", self.0)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A password. `Debug` is redacted so secrets never reach logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Host part of a MySQL account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountHost {
    /// `'%'` - connections from any host.
    Any,
}

impl AccountHost {
    fn literal(self) -> &'static str {
        match self {
            AccountHost::Any => "'%'",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Trivial liveness query.
    Ping,
    CreateDatabase {
        name: Identifier,
    },
    CreateUser {
        user: Identifier,
        host: AccountHost,
        password: Secret,
    },
    /// All privileges on a single database, never `*.*`.
    GrantDatabase {
        database: Identifier,
        user: Identifier,
        host: AccountHost,
    },
    FlushPrivileges,
    SetRootPassword {
        password: Secret,
    },
    ShowDatabases,
}

impl Statement {
    pub fn to_sql(&self) -> String {
        match self {
            Statement::Ping => "SELECT 1".to_string(),
            Statement::CreateDatabase { name } => {
                format!("CREATE DATABASE IF NOT EXISTS {}", name.quoted())
            }
            Statement::CreateUser {
                user,
                host,
                password,
            } => format!(
                "CREATE USER IF NOT EXISTS '{}'@{} IDENTIFIED BY {}",
                user,
                host.literal(),
                string_literal(password.expose())
            ),
            Statement::GrantDatabase {
                database,
                user,
                host,
            } => format!(
                "GRANT ALL PRIVILEGES ON {}.* TO '{}'@{}",
                database.quoted(),
                user,
                host.literal()
            ),
            Statement::FlushPrivileges => "FLUSH PRIVILEGES".to_string(),
            Statement::SetRootPassword { password } => format!(
                "ALTER USER 'root'@'localhost' IDENTIFIED BY {}",
                string_literal(password.expose())
            ),
            Statement::ShowDatabases => "SHOW DATABASES".to_string(),
        }
    }

    /// Whether the rendered SQL contains a secret and must not be passed in argv.
    pub fn carries_secret(&self) -> bool {
        matches!(
            self,
            Statement::CreateUser { .. } | Statement::SetRootPassword { .. }
        )
    }

    /// Short label for logs; never includes secrets.
    pub fn label(&self) -> String {
        match self {
            Statement::Ping => "ping".to_string(),
            Statement::CreateDatabase { name } => format!("create database {}", name),
            Statement::CreateUser { user, .. } => format!("create user {}", user),
            Statement::GrantDatabase { database, user, .. } => {
                format!("grant {} on {}", user, database)
            }
            Statement::FlushPrivileges => "flush privileges".to_string(),
            Statement::SetRootPassword { .. } => "secure root".to_string(),
            Statement::ShowDatabases => "show databases".to_string(),
        }
    }
}

/// Render a batch as a script, one statement per line.
pub fn render_script(statements: &[Statement]) -> String {
    let mut script = String::new();
    for statement in statements {
        script.push_str(&statement.to_sql());
        script.push_str(";\n");
    }
    script
}

/// Quote a string literal with MySQL's default escaping rules.
fn string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x1a' => out.push_str("\\Z"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(s: &str) -> Identifier {
        Identifier::new(s).unwrap()
    }

    #[test]
    fn identifiers_reject_injection() {
        assert!(Identifier::new("myapp_db").is_ok());
        assert!(Identifier::new("a$b").is_ok());
        assert!(Identifier::new("").is_err());
        assert!(Identifier::new("db; DROP DATABASE mysql").is_err());
        assert!(Identifier::new("user'@'%").is_err());
        assert!(Identifier::new("name`x").is_err());
        assert!(Identifier::new(&"a".repeat(65)).is_err());
    }

    #[test]
    fn statements_use_idempotent_forms() {
        let create = Statement::CreateDatabase { name: ident("shop") };
        assert_eq!(create.to_sql(), "CREATE DATABASE IF NOT EXISTS `shop`");

        let user = Statement::CreateUser {
            user: ident("appuser"),
            host: AccountHost::Any,
            password: Secret::new("pw"),
        };
        assert_eq!(
            user.to_sql(),
            "CREATE USER IF NOT EXISTS 'appuser'@'%' IDENTIFIED BY 'pw'"
        );
    }

    #[test]
    fn grant_is_scoped_to_one_database() {
        let grant = Statement::GrantDatabase {
            database: ident("shop"),
            user: ident("appuser"),
            host: AccountHost::Any,
        };
        let sql = grant.to_sql();
        assert_eq!(sql, "GRANT ALL PRIVILEGES ON `shop`.* TO 'appuser'@'%'");
        assert!(!sql.contains("*.*"));
    }

    #[test]
    fn passwords_are_escaped() {
        let stmt = Statement::SetRootPassword {
            password: Secret::new("it's\\a\ntest"),
        };
        assert_eq!(
            stmt.to_sql(),
            "ALTER USER 'root'@'localhost' IDENTIFIED BY 'it\\'s\\\\a\\ntest'"
        );
    }

    #[test]
    fn secret_statements_are_flagged() {
        assert!(!Statement::Ping.carries_secret());
        assert!(!Statement::ShowDatabases.carries_secret());
        assert!(Statement::SetRootPassword {
            password: Secret::new("x")
        }
        .carries_secret());
    }

    #[test]
    fn secret_debug_is_redacted() {
        let stmt = Statement::SetRootPassword {
            password: Secret::new("hunter2"),
        };
        assert!(!format!("{:?}", stmt).contains("hunter2"));
        assert!(!stmt.label().contains("hunter2"));
    }

    #[test]
    fn render_script_terminates_each_statement() {
        let script = render_script(&[Statement::Ping, Statement::FlushPrivileges]);
        assert_eq!(script, "SELECT 1;\nFLUSH PRIVILEGES;\n");
    }
}
