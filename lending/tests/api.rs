//! HTTP API tests against the in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::http::StatusCode;
use axum_test::TestServer;
use chrono::Duration;
use lending_core::environment::Clock;
use lending_core::notification::Channel;
use lending_testing::{InMemoryAuditLog, ManualClock, RecordingNotifier, test_clock};
use serde_json::{Value, json};
use station_lending::store::InMemoryLendingStore;
use station_lending::types::{CatalogItem, Condition, ItemId, Station, StationId};
use station_lending::{Config, LendingApp, Services};
use std::sync::Arc;

struct Harness {
    server: TestServer,
    app: LendingApp,
    store: Arc<InMemoryLendingStore>,
    clock: Arc<ManualClock>,
    notifier: Arc<RecordingNotifier>,
    station: Station,
    rope: CatalogItem,
}

async fn harness() -> Harness {
    let station = Station {
        id: StationId::new(),
        name: "North".to_string(),
        manager_emails: vec!["manager@north.org".to_string()],
    };
    let roster = format!("alice={}", station.id);
    let config = Config::from_lookup(|name| match name {
        "STATION_MANAGERS" => Some(roster.clone()),
        "PUBLIC_BASE_URL" => Some("https://lend.example.org".to_string()),
        _ => None,
    });

    let store = Arc::new(InMemoryLendingStore::new());
    store.add_station(station.clone()).await;
    let rope = CatalogItem {
        id: ItemId::new(),
        name: "rope".to_string(),
        is_consumable: false,
    };
    store
        .put_stock(station.id, &rope, 5, Condition::Working, None)
        .await;

    let clock = Arc::new(ManualClock::new(test_clock().now()));
    let notifier = Arc::new(RecordingNotifier::new());
    let app = LendingApp::assemble(
        config,
        Services {
            store: store.clone(),
            notifier: notifier.clone(),
            audit: Arc::new(InMemoryAuditLog::new()),
            clock: clock.clone(),
        },
    )
    .expect("assemble");
    let server = TestServer::new(app.router()).expect("test server");

    Harness {
        server,
        app,
        store,
        clock,
        notifier,
        station,
        rope,
    }
}

impl Harness {
    async fn submit(&self, quantity: u32) -> Value {
        let response = self
            .server
            .post("/api/requests")
            .json(&json!({
                "station_id": self.station.id,
                "requester_name": "Dana",
                "requester_phone": "+972500000001",
                "items": [{"item_id": self.rope.id, "quantity": quantity}],
            }))
            .await;
        response.assert_status(StatusCode::CREATED);
        response.json::<Value>()
    }

    async fn act(&self, request_id: &Value, action: &str, actor: &str) -> axum_test::TestResponse {
        self.server
            .post(&format!("/api/requests/{}/actions", request_id.as_str().unwrap()))
            .json(&json!({
                "action": action,
                "actor_name": actor,
                "station_id": self.station.id,
            }))
            .await
    }
}

#[tokio::test]
async fn health_reports_version() {
    let h = harness().await;
    let response = h.server.get("/health").await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["status"], "ok");
}

#[tokio::test]
async fn submit_approve_and_read_status() {
    let h = harness().await;
    let submitted = h.submit(2).await;
    assert_eq!(submitted["status"], "pending");
    let token = submitted["token"].as_str().unwrap().to_string();

    let approved = h.act(&submitted["request_id"], "approve", "alice").await;
    approved.assert_status_ok();
    assert_eq!(approved.json::<Value>()["status"], "picked_up");

    let status = h.server.get(&format!("/api/status/{token}")).await;
    status.assert_status_ok();
    let body = status.json::<Value>();
    assert_eq!(body["status"], "picked_up");
    assert_eq!(body["items"][0]["quantity"], 2);

    h.app
        .dispatcher()
        .wait_idle(std::time::Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(h.notifier.sent_on(Channel::WhatsApp).len(), 2);
}

#[tokio::test]
async fn empty_request_is_unprocessable() {
    let h = harness().await;
    let response = h
        .server
        .post("/api/requests")
        .json(&json!({
            "station_id": h.station.id,
            "requester_name": "Dana",
            "requester_phone": "+972500000001",
            "items": [],
        }))
        .await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.json::<Value>()["code"], "INVALID");
}

#[tokio::test]
async fn errors_map_to_http_statuses() {
    let h = harness().await;
    let submitted = h.submit(1).await;
    let id = &submitted["request_id"];

    h.act(id, "approve", "mallory")
        .await
        .assert_status(StatusCode::FORBIDDEN);
    h.act(id, "undo_pickup", "alice")
        .await
        .assert_status(StatusCode::CONFLICT);
    h.act(id, "confirm_pickup", "alice")
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    h.act(&json!(ItemId::new().to_string()), "approve", "alice")
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let rejected = h.act(id, "reject", "alice").await;
    rejected.assert_status_ok();
    let again = h.act(id, "approve", "alice").await;
    again.assert_status(StatusCode::CONFLICT);
    assert_eq!(again.json::<Value>()["code"], "INVALID_TRANSITION");
}

#[tokio::test]
async fn insufficient_stock_is_a_conflict() {
    let h = harness().await;
    let submitted = h.submit(9).await;

    let response = h.act(&submitted["request_id"], "approve", "alice").await;
    response.assert_status(StatusCode::CONFLICT);
    assert_eq!(response.json::<Value>()["code"], "INSUFFICIENT_STOCK");
}

#[tokio::test]
async fn lapsed_token_is_gone_and_unknown_token_not_found() {
    let h = harness().await;
    let submitted = h.submit(1).await;
    let token = submitted["token"].as_str().unwrap().to_string();

    h.clock.advance(Duration::hours(73));
    let response = h.server.get(&format!("/api/status/{token}")).await;
    response.assert_status(StatusCode::GONE);
    assert!(
        response.json::<Value>()["message"]
            .as_str()
            .unwrap()
            .contains("ask the station")
    );

    h.server
        .get("/api/status/not-a-real-token")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn manual_escalation_requires_a_manager() {
    let h = harness().await;
    h.store
        .put_stock(h.station.id, &h.rope, 1, Condition::Working, None)
        .await;

    h.server
        .post(&format!("/api/stations/{}/escalations", h.station.id))
        .json(&json!({"actor_name": "mallory"}))
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let response = h
        .server
        .post(&format!("/api/stations/{}/escalations", h.station.id))
        .json(&json!({"actor_name": "alice"}))
        .await;
    response.assert_status_ok();
    let report = response.json::<Value>();
    assert_eq!(report["kinds"][0]["kind"], "low_stock");
    assert_eq!(report["kinds"][0]["raised"], 1);
}

#[tokio::test]
async fn link_sent_to_requester_resolves() {
    let h = harness().await;
    h.submit(1).await;
    h.app
        .dispatcher()
        .wait_idle(std::time::Duration::from_secs(1))
        .await
        .unwrap();

    let sent = h.notifier.sent_on(Channel::WhatsApp);
    let body = &sent[0].body;
    let start = body.find("https://lend.example.org").unwrap();
    let link = body[start..].split_whitespace().next().unwrap();
    let path = link.trim_start_matches("https://lend.example.org");
    assert!(path.starts_with("/status/"));

    let response = h.server.get(path).await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["status"], "pending");
}
