//! End-to-end API flows against a live server.

use reqwest::Method;
use serde_json::{json, Value};
use uuid::Uuid;

use formdesk::billing::webhook::{sign_payload, SIGNATURE_HEADER};

mod common;

use common::{test_config, TestServer, WEBHOOK_SECRET};

#[tokio::test]
async fn test_health_request_id_and_security_headers() {
    let server = TestServer::start().await;

    let res = server.get("/health").send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(res.headers()["x-content-type-options"], "nosniff");
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    let res = server
        .get("/health")
        .header("x-request-id", "trace-me")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-request-id"], "trace-me");
}

#[tokio::test]
async fn test_sign_up_and_identity() {
    let server = TestServer::start().await;
    let user_id = server.sign_up("Owner@Example.com").await;

    let res = server
        .post("/api/users")
        .json(&json!({ "email": "owner@example.com", "name": "Again" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 409);

    let res = server
        .post("/api/users")
        .json(&json!({ "email": "not-an-email", "name": "X" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation");

    let res = server.get("/api/me").send().await.unwrap();
    assert_eq!(res.status(), 401);

    let stranger = Uuid::new_v4().to_string();
    let res = server.as_user(Method::GET, "/api/me", &stranger).send().await.unwrap();
    assert_eq!(res.status(), 401);

    let res = server.as_user(Method::GET, "/api/me", &user_id).send().await.unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["user"]["email"], "owner@example.com");
    assert_eq!(body["plan"]["id"], "free");
}

#[tokio::test]
async fn test_free_plan_form_limit() {
    let server = TestServer::start().await;
    let user_id = server.sign_up("limit@example.com").await;

    server.create_form_id(&user_id, "First").await;
    let res = server.create_form(&user_id, "Second").await;
    assert_eq!(res.status(), 402);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "form_limit_reached");

    let res = server.as_user(Method::GET, "/api/usage", &user_id).send().await.unwrap();
    let usage: Value = res.json().await.unwrap();
    assert_eq!(usage["active_forms"], 1);
    assert_eq!(usage["form_limit"], 1);
}

#[tokio::test]
async fn test_downgrade_requires_selection_and_locks_the_rest() {
    let server = TestServer::start().await;
    let user_id = server.sign_up("downgrade@example.com").await;

    let res = server
        .as_admin(Method::POST, &format!("/admin/users/{user_id}/plan"))
        .json(&json!({ "plan_id": "starter" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let first = server.create_form_id(&user_id, "One").await;
    let second = server.create_form_id(&user_id, "Two").await;
    let keep = server.create_form_id(&user_id, "Three").await;

    let res = server
        .as_user(Method::GET, "/api/subscription/preview?plan_id=free", &user_id)
        .send()
        .await
        .unwrap();
    let preview: Value = res.json().await.unwrap();
    assert_eq!(preview["kind"], "downgrade");
    assert_eq!(preview["assessment"]["requires_selection"], true);
    assert_eq!(preview["assessment"]["excess"], 2);

    let res = server
        .as_user(Method::POST, "/api/subscription/change", &user_id)
        .json(&json!({ "plan_id": "free" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "selection_required");

    let res = server
        .as_user(Method::POST, "/api/subscription/change", &user_id)
        .json(&json!({ "plan_id": "free", "keep_form_ids": [first, second] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_selection");

    let res = server
        .as_user(Method::POST, "/api/subscription/change", &user_id)
        .json(&json!({ "plan_id": "free", "keep_form_ids": [keep] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["outcome"], "applied");
    assert_eq!(body["reconciliation"]["lock"].as_array().unwrap().len(), 2);

    let res = server
        .as_user(Method::PUT, &format!("/api/forms/{first}"), &user_id)
        .json(&json!({ "title": "Edited", "kind": "review" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 403);

    let res = server
        .as_user(Method::GET, &format!("/api/forms/{keep}"), &user_id)
        .send()
        .await
        .unwrap();
    let form: Value = res.json().await.unwrap();
    assert_eq!(form["status"], "active");

    let res = server
        .as_admin(Method::GET, &format!("/admin/audit?user_id={user_id}"))
        .send()
        .await
        .unwrap();
    let audit: Value = res.json().await.unwrap();
    assert!(audit
        .as_array()
        .unwrap()
        .iter()
        .any(|e| e["action"] == "forms_locked"));
}

#[tokio::test]
async fn test_manual_payment_approval_applies_plan() {
    let server = TestServer::start().await;
    let user_id = server.sign_up("manual@example.com").await;
    server.create_form_id(&user_id, "Existing").await;

    let res = server
        .as_user(Method::POST, "/api/subscription/change", &user_id)
        .json(&json!({ "plan_id": "starter" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);

    let res = server
        .as_user(Method::POST, "/api/subscription/change", &user_id)
        .json(&json!({ "plan_id": "starter", "payment_reference": "bank-transfer-42" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 202);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["outcome"], "awaiting_payment");
    let payment_id = body["payment"]["id"].as_str().unwrap().to_string();

    let res = server
        .as_user(Method::POST, "/api/subscription/change", &user_id)
        .json(&json!({ "plan_id": "starter", "payment_reference": "again" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 409);

    let res = server
        .as_admin(Method::GET, "/admin/payments?status=pending")
        .send()
        .await
        .unwrap();
    let pending: Value = res.json().await.unwrap();
    assert_eq!(pending.as_array().unwrap().len(), 1);

    let res = server
        .as_admin(Method::POST, &format!("/admin/payments/{payment_id}/approve"))
        .json(&json!({ "note": "received" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let decision: Value = res.json().await.unwrap();
    assert_eq!(decision["payment"]["status"], "approved");
    assert_eq!(decision["subscription"]["plan_id"], "starter");
    assert_eq!(decision["subscription"]["source"], "manual");

    server.create_form_id(&user_id, "Second").await;

    let res = server
        .as_admin(Method::POST, &format!("/admin/payments/{payment_id}/approve"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 409);
}

async fn send_webhook(server: &TestServer, body: &Value, secret: &str) -> reqwest::Response {
    let raw = serde_json::to_vec(body).unwrap();
    let signature = sign_payload(secret, &raw).unwrap();
    server
        .post("/webhooks/billing")
        .header(SIGNATURE_HEADER, signature)
        .header("content-type", "application/json")
        .body(raw)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_provider_webhook_signature_and_lifecycle() {
    let server = TestServer::start().await;
    let user_id = server.sign_up("provider@example.com").await;

    let res = server
        .as_user(Method::POST, "/api/subscription/change", &user_id)
        .json(&json!({ "plan_id": "pro" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 202);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["outcome"], "awaiting_provider");
    assert_eq!(body["provider_plan_id"], "plan_pro_monthly");

    let activated = json!({
        "id": "evt_activated",
        "event": "subscription.activated",
        "created_at": 1_790_000_000,
        "payload": {
            "subscription_id": "sub_live_1",
            "plan_id": "plan_pro_monthly",
            "customer_ref": user_id,
        }
    });

    let res = server
        .post("/webhooks/billing")
        .json(&activated)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);

    let res = send_webhook(&server, &activated, "wrong-secret").await;
    assert_eq!(res.status(), 401);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_signature");

    let res = send_webhook(&server, &activated, WEBHOOK_SECRET).await;
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["outcome"], "applied");
    assert_eq!(body["plan_id"], "pro");

    let res = send_webhook(&server, &activated, WEBHOOK_SECRET).await;
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["outcome"], "duplicate");

    let res = server
        .as_user(Method::GET, "/api/subscription", &user_id)
        .send()
        .await
        .unwrap();
    let current: Value = res.json().await.unwrap();
    assert_eq!(current["plan"]["id"], "pro");
    assert_eq!(current["subscription"]["source"], "provider");

    let cancelled = json!({
        "id": "evt_cancelled",
        "event": "subscription.cancelled",
        "payload": { "subscription_id": "sub_live_1" }
    });
    let res = send_webhook(&server, &cancelled, WEBHOOK_SECRET).await;
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["outcome"], "reverted");

    let res = server
        .as_user(Method::GET, "/api/subscription", &user_id)
        .send()
        .await
        .unwrap();
    let current: Value = res.json().await.unwrap();
    assert_eq!(current["plan"]["id"], "free");
}

#[tokio::test]
async fn test_provider_past_due_then_completed() {
    let server = TestServer::start().await;
    let user_id = server.sign_up("pastdue@example.com").await;

    let activated = json!({
        "id": "evt_pd_activated",
        "event": "subscription.activated",
        "payload": {
            "subscription_id": "sub_live_2",
            "plan_id": "plan_pro_monthly",
            "customer_ref": user_id,
        }
    });
    let res = send_webhook(&server, &activated, WEBHOOK_SECRET).await;
    assert_eq!(res.status(), 200);

    let pending = json!({
        "id": "evt_pd_pending",
        "event": "subscription.pending",
        "payload": { "subscription_id": "sub_live_2" }
    });
    let res = send_webhook(&server, &pending, WEBHOOK_SECRET).await;
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["outcome"], "past_due");

    let res = server
        .as_user(Method::GET, "/api/subscription", &user_id)
        .send()
        .await
        .unwrap();
    let current: Value = res.json().await.unwrap();
    assert_eq!(current["plan"]["id"], "pro");
    assert_eq!(current["subscription"]["status"], "past_due");

    let completed = json!({
        "id": "evt_pd_completed",
        "event": "subscription.completed",
        "payload": { "subscription_id": "sub_live_2" }
    });
    let res = send_webhook(&server, &completed, WEBHOOK_SECRET).await;
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["outcome"], "reverted");

    let res = server
        .as_user(Method::GET, "/api/subscription", &user_id)
        .send()
        .await
        .unwrap();
    let current: Value = res.json().await.unwrap();
    assert_eq!(current["plan"]["id"], "free");
    assert_eq!(current["subscription"]["status"], "active");
}

#[tokio::test]
async fn test_malformed_requests_get_json_errors() {
    let server = TestServer::start().await;
    let user_id = server.sign_up("malformed@example.com").await;

    let res = server
        .as_user(Method::POST, "/api/forms", &user_id)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation");

    let res = server
        .as_user(Method::GET, "/api/forms/not-a-uuid", &user_id)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation");

    let res = server
        .as_user(Method::GET, "/api/subscription/preview", &user_id)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation");
}

#[tokio::test]
async fn test_public_form_and_submissions() {
    let server = TestServer::start().await;
    let user_id = server.sign_up("public@example.com").await;
    let form_id = server.create_form_id(&user_id, "Feedback").await;

    let res = server.get(&format!("/public/forms/{form_id}")).send().await.unwrap();
    assert_eq!(res.status(), 404);

    let res = server
        .as_user(Method::POST, &format!("/api/forms/{form_id}/publish"), &user_id)
        .json(&json!({ "published": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let res = server.get(&format!("/public/forms/{form_id}")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    let form: Value = res.json().await.unwrap();
    assert_eq!(form["title"], "Feedback");
    assert!(form.get("owner_id").is_none());

    let submit = format!("/public/forms/{form_id}/submissions");
    let res = server
        .post(&submit)
        .json(&json!({ "answers": { "rating": 4, "comment": "Quick service" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 201);

    let res = server
        .post(&submit)
        .json(&json!({ "answers": { "rating": 9 } }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);

    let res = server
        .as_user(Method::GET, &format!("/api/forms/{form_id}/submissions"), &user_id)
        .send()
        .await
        .unwrap();
    let submissions: Value = res.json().await.unwrap();
    assert_eq!(submissions.as_array().unwrap().len(), 1);
    assert_eq!(submissions[0]["answers"]["comment"], "Quick service");
}

#[tokio::test]
async fn test_submission_rate_limit() {
    let mut config = test_config();
    config.security.submission_rps = 0;
    config.security.submission_burst = 2;
    let server = TestServer::start_with(config).await;

    let user_id = server.sign_up("busy@example.com").await;
    let form_id = server.create_form_id(&user_id, "Popular").await;
    server
        .as_user(Method::POST, &format!("/api/forms/{form_id}/publish"), &user_id)
        .json(&json!({ "published": true }))
        .send()
        .await
        .unwrap();

    let submit = format!("/public/forms/{form_id}/submissions");
    for _ in 0..2 {
        let res = server
            .post(&submit)
            .json(&json!({ "answers": { "rating": 5 } }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 201);
    }

    let res = server
        .post(&submit)
        .json(&json!({ "answers": { "rating": 5 } }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 429);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "rate_limited");
}

#[tokio::test]
async fn test_admin_routes_require_bearer_key() {
    let server = TestServer::start().await;
    server.sign_up("someone@example.com").await;

    let res = server.get("/admin/status").send().await.unwrap();
    assert_eq!(res.status(), 401);

    let res = server
        .get("/admin/status")
        .bearer_auth("not-the-key")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);

    let res = server.as_admin(Method::GET, "/admin/status").send().await.unwrap();
    assert_eq!(res.status(), 200);
    let status: Value = res.json().await.unwrap();
    assert_eq!(status["counts"]["users"], 1);

    let res = server
        .as_admin(Method::DELETE, "/admin/plans/free")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 409);
}
