//! Bootstrap statements as seen by the SQL client.

use async_trait::async_trait;
use service_bringup::bootstrap::{bootstrap, verify};
use service_bringup::client::{ClientError, Identifier, Secret, SqlClient, Statement};
use service_bringup::credentials::BootstrapCredentials;
use service_bringup::Error;
use std::sync::Mutex;

/// Records every batch it receives and answers `SHOW DATABASES` with `databases`.
struct RecordingClient {
    batches: Mutex<Vec<Vec<String>>>,
    databases: Vec<String>,
}

impl RecordingClient {
    fn new(databases: &[&str]) -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            databases: databases.iter().map(|d| d.to_string()).collect(),
        }
    }

    fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl SqlClient for RecordingClient {
    async fn execute(&self, statements: &[Statement]) -> Result<Vec<String>, ClientError> {
        self.batches
            .lock()
            .unwrap()
            .push(statements.iter().map(Statement::to_sql).collect());
        if statements.iter().any(|s| matches!(s, Statement::ShowDatabases)) {
            return Ok(self.databases.clone());
        }
        Ok(Vec::new())
    }
}

fn creds() -> BootstrapCredentials {
    BootstrapCredentials {
        database_name: Identifier::new("shop").unwrap(),
        app_user: Identifier::new("appuser").unwrap(),
        app_password: Secret::new("s3cr3t'pw"),
        root_password: Secret::new("root-pw"),
        root_secured: true,
    }
}

#[tokio::test]
async fn test_rerun_issues_identical_statements() {
    let client = RecordingClient::new(&[]);
    let creds = creds();

    bootstrap(&client, &creds, false).await.unwrap();
    bootstrap(&client, &creds, false).await.unwrap();

    let batches = client.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0], batches[1]);
    for sql in &batches[0] {
        assert!(
            sql.contains("IF NOT EXISTS") || sql.starts_with("GRANT") || sql.starts_with("FLUSH"),
            "not idempotent: {}",
            sql
        );
    }
}

#[tokio::test]
async fn test_grant_is_scoped_to_application_database() {
    let client = RecordingClient::new(&[]);
    bootstrap(&client, &creds(), true).await.unwrap();

    let batch = &client.batches()[0];
    let grant = batch.iter().find(|s| s.starts_with("GRANT")).unwrap();
    assert_eq!(grant, "GRANT ALL PRIVILEGES ON `shop`.* TO 'appuser'@'%'");
    assert!(batch.last().unwrap().starts_with("ALTER USER 'root'@'localhost'"));
    // Quotes in passwords are escaped, not terminated.
    assert!(batch.iter().any(|s| s.contains("'s3cr3t\\'pw'")));
}

#[tokio::test]
async fn test_verify_requires_application_database() {
    let creds = creds();

    let present = RecordingClient::new(&["information_schema", "mysql", "shop"]);
    let listed = verify(&present, &creds).await.unwrap();
    assert!(listed.contains(&"shop".to_string()));

    let missing = RecordingClient::new(&["information_schema", "mysql"]);
    let err = verify(&missing, &creds).await.unwrap_err();
    match err {
        Error::Bootstrap(message) => assert!(message.contains("shop")),
        other => panic!("expected Bootstrap, got {:?}", other),
    }
}
