//! REST backfill surface driven through the router with `oneshot`.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use chrono::Utc;
use http_body_util::BodyExt;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use huddle_api::{AppState, AppStateInner, routes};
use huddle_db::Database;
use huddle_gateway::Gateway;
use huddle_gateway::store::ChatStore;
use huddle_types::ConversationKey;
use huddle_types::api::Claims;
use huddle_types::models::Role;

const SECRET: &str = "rest-test-secret";

struct Harness {
    app: Router,
    state: AppState,
    alice: Uuid,
    bob: Uuid,
    carol: Uuid,
    channel: Uuid,
}

fn harness() -> Harness {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    db.upsert_identity(&alice.to_string(), "Alice", "admin").unwrap();
    db.upsert_identity(&bob.to_string(), "Bob", "developer").unwrap();
    db.upsert_identity(&carol.to_string(), "Carol", "viewer").unwrap();

    let channel = Uuid::new_v4();
    db.create_channel(&channel.to_string(), "release-review").unwrap();
    db.add_channel_member(&channel.to_string(), &alice.to_string()).unwrap();
    db.add_channel_member(&channel.to_string(), &bob.to_string()).unwrap();

    let store: Arc<dyn ChatStore> = db;
    let state = Arc::new(AppStateInner {
        gateway: Gateway::new(store, Duration::from_secs(3)),
        jwt_secret: SECRET.to_string(),
    });

    Harness {
        app: routes(state.clone()),
        state,
        alice,
        bob,
        carol,
        channel,
    }
}

fn token(user: Uuid, name: &str, role: Role) -> String {
    let claims = Claims {
        sub: user,
        display_name: name.to_string(),
        role,
        exp: (Utc::now().timestamp() + 3600) as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

async fn call(app: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn health_is_public_and_everything_else_needs_a_token() {
    let h = harness();

    let (status, _) = call(&h.app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(&h.app, Method::GET, "/contacts", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&h.app, Method::GET, "/contacts", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn send_then_page_history_with_gap_fill() {
    let h = harness();
    let alice = token(h.alice, "Alice", Role::Admin);
    let dm = ConversationKey::direct(h.alice, h.bob).unwrap();
    let uri = format!("/conversations/{}/messages", dm);

    let mut ids = Vec::new();
    for body in ["one", "two", "three", "four"] {
        let (status, message) = call(&h.app, Method::POST, &uri, Some(&alice), Some(json!({ "body": body }))).await;
        assert_eq!(status, StatusCode::CREATED);
        ids.push(message["id"].as_i64().unwrap());
    }

    let (status, page) = call(&h.app, Method::GET, &format!("{}?after={}", uri, ids[1]), Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
    let bodies: Vec<&str> = page.as_array().unwrap().iter().map(|m| m["body"].as_str().unwrap()).collect();
    assert_eq!(bodies, ["three", "four"]);

    let (_, page) = call(&h.app, Method::GET, &format!("{}?limit=2", uri), Some(&alice), None).await;
    let page_ids: Vec<i64> = page.as_array().unwrap().iter().map(|m| m["id"].as_i64().unwrap()).collect();
    assert_eq!(page_ids, [ids[2], ids[3]]);
}

#[tokio::test]
async fn outsiders_cannot_read_or_post() {
    let h = harness();
    let carol = token(h.carol, "Carol", Role::Viewer);
    let uri = format!("/conversations/{}/messages", ConversationKey::channel(h.channel));

    let (status, _) = call(&h.app, Method::GET, &uri, Some(&carol), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(&h.app, Method::POST, &uri, Some(&carol), Some(json!({ "body": "hi" }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["rejection"]["kind"], "not_a_member");

    let (status, _) = call(
        &h.app,
        Method::GET,
        &format!("/channels/{}/members", h.channel),
        Some(&carol),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn oversized_body_is_a_bad_request() {
    let h = harness();
    let bob = token(h.bob, "Bob", Role::Developer);
    let uri = format!("/conversations/{}/messages", ConversationKey::channel(h.channel));

    let (status, body) = call(&h.app, Method::POST, &uri, Some(&bob), Some(json!({ "body": "x".repeat(4001) }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["rejection"]["kind"], "body_too_long");
}

#[tokio::test]
async fn read_cursor_never_moves_backwards() {
    let h = harness();
    let alice = token(h.alice, "Alice", Role::Admin);
    let bob = token(h.bob, "Bob", Role::Developer);
    let channel = ConversationKey::channel(h.channel);
    let messages = format!("/conversations/{}/messages", channel);

    let mut ids = Vec::new();
    for body in ["a", "b", "c"] {
        let (_, message) = call(&h.app, Method::POST, &messages, Some(&alice), Some(json!({ "body": body }))).await;
        ids.push(message["id"].as_i64().unwrap());
    }

    let read = format!("/conversations/{}/read", channel);
    let (status, cursor) = call(&h.app, Method::PATCH, &read, Some(&bob), Some(json!({ "up_to_message_id": ids[1] }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cursor["last_read_message_id"].as_i64(), Some(ids[1]));

    let (_, cursor) = call(&h.app, Method::PATCH, &read, Some(&bob), Some(json!({ "up_to_message_id": ids[0] }))).await;
    assert_eq!(cursor["last_read_message_id"].as_i64(), Some(ids[1]));

    let (status, unread) = call(&h.app, Method::GET, &format!("/conversations/{}/unread", channel), Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(unread["unread"], 1);
}

#[tokio::test]
async fn reaction_toggle_adds_then_retracts() {
    let h = harness();
    let alice = token(h.alice, "Alice", Role::Admin);
    let bob = token(h.bob, "Bob", Role::Developer);
    let dm = ConversationKey::direct(h.alice, h.bob).unwrap();

    let (_, message) = call(
        &h.app,
        Method::POST,
        &format!("/conversations/{}/messages", dm),
        Some(&alice),
        Some(json!({ "body": "build is green" })),
    )
    .await;
    let uri = format!("/messages/{}/reactions", message["id"]);

    let (status, state) = call(&h.app, Method::POST, &uri, Some(&bob), Some(json!({ "emoji": "🎉" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state["added"], true);
    assert_eq!(state["reactions"][0]["count"], 1);

    let (_, state) = call(&h.app, Method::POST, &uri, Some(&bob), Some(json!({ "emoji": "🎉" }))).await;
    assert_eq!(state["added"], false);
    assert_eq!(state["reactions"].as_array().map(Vec::len), Some(0));

    let (status, _) = call(&h.app, Method::POST, "/messages/999999/reactions", Some(&bob), Some(json!({ "emoji": "👍" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn contacts_report_presence() {
    let h = harness();
    let alice = token(h.alice, "Alice", Role::Admin);

    let (_conn, _rx) = h.state.gateway.dispatcher.register_connection(h.bob).await;

    let (status, contacts) = call(&h.app, Method::GET, "/contacts", Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
    let contacts = contacts.as_array().unwrap();
    assert_eq!(contacts.len(), 2);
    for contact in contacts {
        let online = contact["id"] == json!(h.bob);
        assert_eq!(contact["online"], online);
    }
}

#[tokio::test]
async fn only_admins_moderate() {
    let h = harness();
    let alice = token(h.alice, "Alice", Role::Admin);
    let bob = token(h.bob, "Bob", Role::Developer);
    let uri = format!("/users/{}/moderation", h.bob);
    let mute = json!({ "is_muted": true, "mute_reason": "spam" });

    let (status, _) = call(&h.app, Method::PUT, &format!("/users/{}/moderation", h.alice), Some(&bob), Some(mute.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(&h.app, Method::PUT, &uri, Some(&alice), Some(mute)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = call(
        &h.app,
        Method::POST,
        &format!("/conversations/{}/messages", ConversationKey::channel(h.channel)),
        Some(&bob),
        Some(json!({ "body": "still here?" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["rejection"]["kind"], "muted");

    let (status, _) = call(&h.app, Method::PUT, &uri, Some(&alice), Some(json!({ "is_muted": false }))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = call(&h.app, Method::PUT, &format!("/users/{}/moderation", Uuid::new_v4()), Some(&alice), Some(json!({ "is_muted": false }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn fresh_accounts_can_message_after_authenticating() {
    let h = harness();
    let (dana, erin) = (Uuid::new_v4(), Uuid::new_v4());
    let dana_token = token(dana, "Dana", Role::Tester);
    let erin_token = token(erin, "Erin", Role::Manager);

    // Erin's first authenticated call mirrors her account
    let (status, _) = call(&h.app, Method::GET, "/contacts", Some(&erin_token), None).await;
    assert_eq!(status, StatusCode::OK);

    let dm = ConversationKey::direct(dana, erin).unwrap();
    let (status, message) = call(
        &h.app,
        Method::POST,
        &format!("/conversations/{}/messages", dm),
        Some(&dana_token),
        Some(json!({ "body": "welcome aboard" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(message["sender_name"], "Dana");

    let (_, contacts) = call(&h.app, Method::GET, "/contacts", Some(&erin_token), None).await;
    let names: Vec<&str> = contacts.as_array().unwrap().iter().map(|c| c["display_name"].as_str().unwrap()).collect();
    assert!(names.contains(&"Dana"));
}

#[tokio::test]
async fn retried_post_with_client_id_returns_original() {
    let h = harness();
    let bob = token(h.bob, "Bob", Role::Developer);
    let uri = format!("/conversations/{}/messages", ConversationKey::channel(h.channel));
    let send = json!({ "body": "deploying 2.4.1", "client_id": Uuid::new_v4() });

    let (status, first) = call(&h.app, Method::POST, &uri, Some(&bob), Some(send.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, again) = call(&h.app, Method::POST, &uri, Some(&bob), Some(send)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["id"], again["id"]);

    let (_, page) = call(&h.app, Method::GET, &uri, Some(&bob), None).await;
    assert_eq!(page.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn admins_manage_channel_membership() {
    let h = harness();
    let alice = token(h.alice, "Alice", Role::Admin);
    let bob = token(h.bob, "Bob", Role::Developer);

    let (status, _) = call(&h.app, Method::POST, "/channels", Some(&bob), Some(json!({ "name": "hotfix" }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, channel) = call(&h.app, Method::POST, "/channels", Some(&alice), Some(json!({ "name": "hotfix" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(channel["name"], "hotfix");
    let channel_id: Uuid = serde_json::from_value(channel["id"].clone()).unwrap();

    let member = format!("/channels/{}/members/{}", channel_id, h.bob);
    let (status, _) = call(&h.app, Method::PUT, &member, Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&h.app, Method::PUT, &member, Some(&alice), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let messages = format!("/conversations/{}/messages", ConversationKey::channel(channel_id));
    let (status, _) = call(&h.app, Method::POST, &messages, Some(&bob), Some(json!({ "body": "on it" }))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = call(&h.app, Method::DELETE, &member, Some(&alice), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&h.app, Method::POST, &messages, Some(&bob), Some(json!({ "body": "still?" }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(
        &h.app,
        Method::PUT,
        &format!("/channels/{}/members/{}", Uuid::new_v4(), h.bob),
        Some(&alice),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
