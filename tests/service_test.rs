//! End-to-end tests of the running journal service

use std::time::Duration;

use rusqlite::params;
use serde_json::json;
use tempfile::TempDir;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sdn_journal::config::{Config, ControllerConfig, JournalConfig, MaintenanceConfig};
use sdn_journal::{JournalDb, JournalService, ObjectType, Operation, RowState};

async fn controller() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/neo/login"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/neo/cloudx/network"))
        .respond_with(ResponseTemplate::new(501))
        .mount(&server)
        .await;
    server
}

fn config(server: &MockServer, dir: &TempDir) -> Config {
    Config {
        controller: ControllerConfig {
            url: format!("{}/neo", server.uri()),
            domain: "cloudx".to_string(),
            username: "admin".to_string(),
            password: "admin".to_string(),
            timeout_secs: 2,
        },
        journal: JournalConfig {
            database_path: dir.path().join("journal.db"),
            sync_interval_secs: 1,
            retry_count: -1,
            busy_timeout_ms: 1000,
        },
        maintenance: MaintenanceConfig {
            interval_secs: 1,
            completed_rows_retention_secs: -1,
            processing_timeout_secs: 100,
        },
    }
}

async fn wait_for_state(db: &JournalDb, id: Uuid, state: RowState) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if db.get_row(id).unwrap().map(|r| r.state) == Some(state) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("row {} never reached {}", id, state));
}

#[tokio::test]
async fn test_recorded_row_is_synced() {
    let server = controller().await;
    let dir = TempDir::new().unwrap();
    let service = JournalService::start(&config(&server, &dir)).unwrap();

    let id = service
        .recorder()
        .record(&ObjectType::network(), "n1", Operation::Create, &json!({"id": "n1"}))
        .unwrap();

    wait_for_state(service.db(), id, RowState::Completed).await;
    service.shutdown().await;
}

#[tokio::test]
async fn test_rows_left_by_previous_run_are_synced_on_start() {
    let server = controller().await;
    let dir = TempDir::new().unwrap();
    let config = config(&server, &dir);

    let id = {
        let db = JournalDb::open(&config.journal.database_path, Duration::from_secs(1)).unwrap();
        db.create_pending(&ObjectType::network(), "n1", Operation::Create, &json!({}))
            .unwrap()
    };

    let service = JournalService::start(&config).unwrap();
    wait_for_state(service.db(), id, RowState::Completed).await;
    service.shutdown().await;
}

#[tokio::test]
async fn test_orphaned_row_recovered_and_synced() {
    let server = controller().await;
    let dir = TempDir::new().unwrap();
    let config = config(&server, &dir);

    // A crashed process left this row in processing an hour ago
    let id = {
        let db = JournalDb::open(&config.journal.database_path, Duration::from_secs(1)).unwrap();
        db.create_pending(&ObjectType::network(), "n1", Operation::Create, &json!({}))
            .unwrap();
        let row = db.claim_oldest_pending().unwrap().unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE journal SET last_retried = last_retried - ?1 WHERE id = ?2",
                params![3_600_000_000i64, row.id.to_string()],
            )?;
            Ok(())
        })
        .unwrap();
        row.id
    };

    let service = JournalService::start(&config).unwrap();
    wait_for_state(service.db(), id, RowState::Completed).await;
    service.shutdown().await;
}

#[tokio::test]
async fn test_start_rejects_incomplete_config() {
    let server = controller().await;
    let dir = TempDir::new().unwrap();
    let mut config = config(&server, &dir);
    config.controller.password.clear();

    let err = JournalService::start(&config).err().unwrap();
    assert!(err.to_string().contains("password"));
}
