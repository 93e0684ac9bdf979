use agime_cfpm_eval::cli::Cli;
use clap::Parser;
use serde_json::{json, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SECRET: &str = "flow-secret";
const SESSION_ID: &str = "20260301_7";

fn sse(events: &[Value]) -> String {
    events
        .iter()
        .map(|event| format!("data: {}\n\n", event))
        .collect()
}

fn api_facts() -> Value {
    json!([
        { "category": "artifact", "content": "C:\\Users\\bob\\OneDrive\\Desktop", "status": "active", "source": "cfpm_auto" },
        { "category": "artifact_path", "content": "C:\\Users\\bob\\Desktop", "status": "active", "source": "cfpm_auto" },
        { "category": "note", "content": "2026/03/01", "status": "stale", "source": "cfpm_auto" }
    ])
}

async fn mount_service(server: &MockServer, reply: ResponseTemplate, facts: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/agent/start"))
        .and(header("X-Secret-Key", SECRET))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": SESSION_ID,
            "working_dir": "/tmp/w",
            "conversation": []
        })))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/agent/update_provider"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/reply"))
        .respond_with(reply)
        .expect(2)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/sessions/{}", SESSION_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": SESSION_ID,
            "conversation": [
                {"role": "assistant", "created": 1, "content": [
                    {"type": "toolRequest", "id": "a", "toolCall": {"status": "success", "value": {"name": "developer__shell", "arguments": {"command": "echo %USERPROFILE%"}}}}
                ]},
                {"role": "assistant", "created": 2, "content": [
                    {"type": "toolRequest", "id": "b", "toolCall": {"status": "success", "value": {"name": "developer__shell", "arguments": {"command": "dir \"C:\\Users\\bob\\OneDrive\\Desktop\""}}}}
                ]}
            ]
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/sessions/{}/memory/facts", SESSION_ID)))
        .respond_with(facts)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/sessions/{}/memory/candidates", SESSION_ID)))
        .and(query_param("limit", "200"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "category": "note", "content": "2026-3-1", "source": "cfpm_auto", "decision": "accepted", "reason": "" }
        ])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/sessions/{}/memory/tool-gates", SESSION_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
}

async fn seed_store(path: &Path) {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    sqlx::query(
        "CREATE TABLE memory_facts (id TEXT PRIMARY KEY, session_id TEXT, category TEXT, content TEXT, status TEXT, pinned BOOLEAN DEFAULT FALSE, source TEXT, confidence REAL DEFAULT 0.7, evidence_count INTEGER DEFAULT 1, last_validated_at TIMESTAMP, validation_command TEXT, created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP, updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP)",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "CREATE TABLE memory_candidates (id TEXT PRIMARY KEY, session_id TEXT, category TEXT, content TEXT, source TEXT, decision TEXT, reason TEXT, created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP)",
    )
    .execute(&pool)
    .await
    .unwrap();
    for (id, category, content, status) in [
        ("f1", "artifact", "C:\\Users\\bob\\OneDrive\\Desktop", "active"),
        ("f2", "artifact_path", "C:\\Users\\bob\\Desktop", "active"),
    ] {
        sqlx::query(
            "INSERT INTO memory_facts (id, session_id, category, content, status, source) VALUES (?, ?, ?, ?, ?, 'cfpm_auto')",
        )
        .bind(id)
        .bind(SESSION_ID)
        .bind(category)
        .bind(content)
        .bind(status)
        .execute(&pool)
        .await
        .unwrap();
    }
    pool.close().await;
}

fn run_cli(server: &MockServer, output: &Path, sessions_db: &Path, reply_timeout_secs: u64) -> Cli {
    let port = server.address().port().to_string();
    let reply_timeout = reply_timeout_secs.to_string();
    Cli::try_parse_from([
        "cfpm-eval",
        "run",
        "--no-start-server",
        "--ready-timeout-secs",
        "5",
        "--port",
        port.as_str(),
        "--secret",
        SECRET,
        "--provider",
        "openai",
        "--model",
        "gpt-4o",
        "--working-dir",
        "/tmp/w",
        "--reply-timeout-secs",
        reply_timeout.as_str(),
        "--sessions-db",
        sessions_db.to_str().unwrap(),
        "--output",
        output.to_str().unwrap(),
    ])
    .unwrap()
}

fn read_report(path: &PathBuf) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_run_flow_produces_report_with_issues_and_delta() {
    let server = MockServer::start().await;
    let reply = sse(&[
        json!({"type": "Message", "message": {"role": "assistant", "created": 1, "content": [{"type": "text", "text": "Your desktop is in OneDrive."}]}}),
        json!({"type": "Finish", "reason": "stop"}),
    ]);
    mount_service(
        &server,
        ResponseTemplate::new(200).set_body_raw(reply, "text/event-stream"),
        ResponseTemplate::new(200).set_body_json(api_facts()),
    )
    .await;

    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("sessions.db");
    seed_store(&db_path).await;
    let output = temp_dir.path().join("reports/run.json");

    run_cli(&server, &output, &db_path, 10).execute().await;
    let report = read_report(&output);

    assert_eq!(report["success"], true);
    assert!(report["error"].is_null());
    assert_eq!(report["sessionId"], SESSION_ID);
    assert_eq!(report["provider"], "openai");
    assert_eq!(
        report["steps"],
        json!([
            "server_reused",
            "session_started",
            "provider_updated",
            "turn1_completed",
            "turn2_completed",
            "memory_fetched",
            "quality_evaluated",
            "storage_checked"
        ])
    );
    assert_eq!(report["turn1"]["eventCount"], 2);
    assert_eq!(report["turn2"]["finishReason"], "stop");
    assert_eq!(report["apiSnapshot"]["toolCommandsCaptured"], 2);
    assert_eq!(
        report["quality"]["issues"],
        json!([
            "date_noise_candidate_accepted",
            "wrong_desktop_without_invalid_marker",
            "second_turn_repeated_probe_despite_memory"
        ])
    );
    assert_eq!(report["quality"]["activeFactCount"], 2);
    assert_eq!(report["dbSnapshot"]["factRows"], 2);
    assert_eq!(report["apiDbFactDelta"]["apiOnly"].as_array().unwrap().len(), 1);
    assert_eq!(report["apiDbFactDelta"]["apiOnly"][0][1], "2026/03/01");
    assert_eq!(report["apiDbFactDelta"]["dbOnly"], json!([]));
}

#[tokio::test]
async fn test_reply_timeout_is_not_fatal() {
    let server = MockServer::start().await;
    mount_service(
        &server,
        ResponseTemplate::new(200)
            .set_body_raw(sse(&[json!({"type": "Finish", "reason": "late"})]), "text/event-stream")
            .set_delay(Duration::from_secs(5)),
        ResponseTemplate::new(200).set_body_json(json!([])),
    )
    .await;

    let temp_dir = TempDir::new().unwrap();
    let output = temp_dir.path().join("timeout.json");
    let missing_db = temp_dir.path().join("missing.db");

    run_cli(&server, &output, &missing_db, 1).execute().await;
    let report = read_report(&output);

    assert_eq!(report["success"], true);
    assert_eq!(report["turn1"]["eventCount"], 0);
    assert!(report["turn1"]["error"].is_null());
    assert_eq!(report["turn1"]["timedOut"], true);
    assert_eq!(report["turn2"]["eventCount"], 0);
    assert_eq!(report["steps"].as_array().unwrap().last().unwrap(), "storage_skipped");
}

#[tokio::test]
async fn test_failed_step_still_writes_report() {
    let server = MockServer::start().await;
    mount_service(
        &server,
        ResponseTemplate::new(200).set_body_raw(
            sse(&[json!({"type": "Finish", "reason": "stop"})]),
            "text/event-stream",
        ),
        ResponseTemplate::new(500).set_body_string("database is locked"),
    )
    .await;

    let temp_dir = TempDir::new().unwrap();
    let output = temp_dir.path().join("failed.json");
    let missing_db = temp_dir.path().join("missing.db");

    run_cli(&server, &output, &missing_db, 10).execute().await;
    let report = read_report(&output);

    assert_eq!(report["success"], false);
    assert_eq!(report["error"]["kind"], "http_error");
    assert!(report["error"]["message"]
        .as_str()
        .unwrap()
        .contains("database is locked"));
    assert_eq!(report["turn2"]["finishReason"], "stop");
    assert!(report.get("quality").is_none());
}
