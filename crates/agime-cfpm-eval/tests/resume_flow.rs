use agime_cfpm_eval::cli::Cli;
use clap::Parser;
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_resume_flow_embeds_memory_and_uses_reply_commands() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/agent/resume"))
        .and(body_json(json!({ "session_id": "s-old", "load_model_and_extensions": true })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "s-old",
            "name": "desktop files",
            "provider_name": "anthropic"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let reply: String = [
        json!({"type": "Message", "message": {"role": "assistant", "created": 1, "content": [
            {"type": "toolRequest", "id": "t1", "toolCall": {"status": "success", "value": {"name": "developer__shell", "arguments": {"command": "Test-Path \"C:\\Users\\bob\\OneDrive\\Desktop\""}}}},
            {"type": "systemNotification", "notificationType": "inlineMessage", "msg": "[CFPM_TOOL_GATE_V1] rewritten"}
        ]}}),
        json!({"type": "Finish", "reason": "stop"}),
    ]
    .iter()
    .map(|event| format!("data: {}\n\n", event))
    .collect();
    Mock::given(method("POST"))
        .and(path("/reply"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(reply, "text/event-stream"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sessions/s-old/memory/facts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "category": "artifact", "content": "C:\\Users\\bob\\OneDrive\\Desktop", "status": "active", "source": "cfpm_auto" }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sessions/s-old/memory/candidates"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sessions/s-old/memory/tool-gates"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "action": "rewrite", "tool": "developer__shell", "target": "desktop", "path": "C:\\Users\\bob\\OneDrive\\Desktop",
              "originalCommand": "dir C:\\Users\\bob\\Desktop", "rewrittenCommand": "dir C:\\Users\\bob\\OneDrive\\Desktop",
              "verbosity": "brief", "createdTimestamp": 1767225600 }
        ])))
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let output = temp_dir.path().join("resume.json");
    let missing_db = temp_dir.path().join("none.db");
    let port = server.address().port().to_string();

    let cli = Cli::try_parse_from([
        "cfpm-eval",
        "resume",
        "--session-id",
        "s-old",
        "--no-start-server",
        "--port",
        port.as_str(),
        "--sessions-db",
        missing_db.to_str().unwrap(),
        "--output",
        output.to_str().unwrap(),
    ])
    .unwrap();
    cli.execute().await;

    let report: Value = serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(report["success"], true);
    assert_eq!(report["sessionId"], "s-old");
    assert_eq!(report["resumed"], json!({ "name": "desktop files", "provider": "anthropic" }));
    assert_eq!(report["reply"]["toolRequestCount"], 1);
    assert_eq!(
        report["reply"]["cfpmSystemNotifications"],
        json!(["[CFPM_TOOL_GATE_V1] rewritten"])
    );
    assert_eq!(report["api"]["gateCount"], 1);
    assert_eq!(report["api"]["gates"][0]["rewrittenCommand"], "dir C:\\Users\\bob\\OneDrive\\Desktop");
    assert_eq!(report["api"]["facts"].as_array().unwrap().len(), 1);
    assert_eq!(
        report["quality"]["issues"],
        json!(["second_turn_repeated_probe_despite_memory"])
    );
    assert!(report["db"]["warning"].is_string());
}
