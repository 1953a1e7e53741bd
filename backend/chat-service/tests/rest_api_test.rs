use actix_web::{http::StatusCode, test, web, App};
use chat_service::config::Config;
use chat_service::models::{ConversationSummary, Message, UserSummary};
use chat_service::routes;
use chat_service::services::{LogNotificationSink, OfflineNotifier};
use chat_service::state::AppState;
use chat_service::store::InMemoryChatStore;
use chat_service::websocket::message_types::WsOutboundEvent;
use chat_service::websocket::{ConnectionRegistry, Group};
use crypto_core::JwtValidator;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

struct Fixture {
    state: AppState,
    store: Arc<InMemoryChatStore>,
    jwt: Arc<JwtValidator>,
}

impl Fixture {
    fn new() -> Self {
        let config = Arc::new(Config::for_tests());
        let store = Arc::new(InMemoryChatStore::new());
        let registry = ConnectionRegistry::new(config.ws.outbound_buffer);
        let (notifier, _workers) = OfflineNotifier::start(
            registry.clone(),
            config.notify.queue_capacity,
            config.notify.workers,
            Arc::new(LogNotificationSink),
        );
        let jwt = Arc::new(JwtValidator::from_secret(config.jwt_secret.as_bytes()).unwrap());
        let state = AppState::new(config, store.clone(), registry, notifier, jwt.clone());
        Self { state, store, jwt }
    }

    async fn user(&self, name: &str) -> UserSummary {
        self.store.insert_user(Uuid::new_v4(), name).await
    }

    fn bearer(&self, user: &UserSummary) -> (&'static str, String) {
        let token = self
            .jwt
            .issue_access_token(user.id, &user.username, chrono::Duration::minutes(5))
            .unwrap();
        ("Authorization", format!("Bearer {token}"))
    }
}

macro_rules! app {
    ($fixture:expr) => {{
        let jwt = $fixture.jwt.clone();
        test::init_service(
            App::new()
                .app_data(web::Data::new($fixture.state.clone()))
                .configure(move |cfg| routes::configure(cfg, jwt)),
        )
        .await
    }};
}

#[actix_rt::test]
async fn health_and_metrics_are_public() {
    let fx = Fixture::new();
    let app = app!(fx);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp =
        test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[actix_rt::test]
async fn api_requires_a_bearer_token() {
    let fx = Fixture::new();
    let app = app!(fx);

    let req = test::TestRequest::get()
        .uri("/api/v1/conversations")
        .to_request();
    let err = test::try_call_service(&app, req).await.unwrap_err();
    assert_eq!(
        err.as_response_error().status_code(),
        StatusCode::UNAUTHORIZED
    );
}

#[actix_rt::test]
async fn direct_conversation_creation_is_idempotent() {
    let fx = Fixture::new();
    let alice = fx.user("alice").await;
    let bob = fx.user("bob").await;
    let app = app!(fx);

    let req = test::TestRequest::post()
        .uri("/api/v1/conversations")
        .insert_header(fx.bearer(&alice))
        .set_json(json!({ "participant_id": bob.id }))
        .to_request();
    let created: ConversationSummary = test::call_and_read_body_json(&app, req).await;
    assert_eq!(created.other_user.as_ref().map(|u| u.id), Some(bob.id));

    let req = test::TestRequest::post()
        .uri("/api/v1/conversations")
        .insert_header(fx.bearer(&bob))
        .set_json(json!({ "participant_id": alice.id }))
        .to_request();
    let again: ConversationSummary = test::call_and_read_body_json(&app, req).await;
    assert_eq!(again.id, created.id);

    let req = test::TestRequest::post()
        .uri("/api/v1/conversations")
        .insert_header(fx.bearer(&alice))
        .set_json(json!({ "participant_id": Uuid::new_v4() }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "USER_NOT_FOUND");

    let req = test::TestRequest::post()
        .uri("/api/v1/conversations")
        .insert_header(fx.bearer(&alice))
        .set_json(json!({ "participant_id": alice.id }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_rt::test]
async fn rest_send_shares_the_socket_fan_out() {
    let fx = Fixture::new();
    let alice = fx.user("alice").await;
    let bob = fx.user("bob").await;
    let carol = fx.user("carol").await;
    let conversation = fx.store.create_group(&[alice.id, bob.id]).await.unwrap();

    let (bob_conn, mut bob_rx) = fx.state.registry.register(bob.id);
    fx.state
        .registry
        .join(Group::Conversation(conversation.id), bob_conn.id);

    let app = app!(fx);
    let uri = format!("/api/v1/conversations/{}/messages", conversation.id);

    let req = test::TestRequest::post()
        .uri(&uri)
        .insert_header(fx.bearer(&alice))
        .set_json(json!({ "content": "  hi there  " }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let sent: Message = test::read_body_json(resp).await;
    assert_eq!(sent.content, "hi there");
    assert_eq!(sent.sender_username, "alice");

    let frame = bob_rx.try_recv().expect("bob got the message");
    match serde_json::from_str::<WsOutboundEvent>(&frame).unwrap() {
        WsOutboundEvent::NewMessage { message } => assert_eq!(message.id, sent.id),
        other => panic!("expected new_message, got {other:?}"),
    }

    let req = test::TestRequest::post()
        .uri(&uri)
        .insert_header(fx.bearer(&alice))
        .set_json(json!({ "content": "   " }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::post()
        .uri(&uri)
        .insert_header(fx.bearer(&alice))
        .set_json(json!({ "message_type": "image", "file": "uploads/cat.png" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let req = test::TestRequest::post()
        .uri(&uri)
        .insert_header(fx.bearer(&carol))
        .set_json(json!({ "content": "let me in" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(fx.store.message_count(conversation.id).await, 2);
}

#[actix_rt::test]
async fn history_read_and_delete() {
    let fx = Fixture::new();
    let alice = fx.user("alice").await;
    let bob = fx.user("bob").await;
    let conversation = fx.store.create_group(&[alice.id, bob.id]).await.unwrap();
    let app = app!(fx);
    let messages_uri = format!("/api/v1/conversations/{}/messages", conversation.id);

    let mut sent = Vec::new();
    for text in ["one", "two", "three"] {
        let req = test::TestRequest::post()
            .uri(&messages_uri)
            .insert_header(fx.bearer(&alice))
            .set_json(json!({ "content": text }))
            .to_request();
        let message: Message = test::call_and_read_body_json(&app, req).await;
        sent.push(message);
    }

    let req = test::TestRequest::get()
        .uri(&format!("{messages_uri}?limit=2"))
        .insert_header(fx.bearer(&bob))
        .to_request();
    let page: Vec<Message> = test::call_and_read_body_json(&app, req).await;
    let contents: Vec<&str> = page.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["two", "three"]);

    let req = test::TestRequest::get()
        .uri(&format!("{messages_uri}?before={}", sent[1].id))
        .insert_header(fx.bearer(&bob))
        .to_request();
    let page: Vec<Message> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, sent[0].id);

    let req = test::TestRequest::get()
        .uri("/api/v1/conversations")
        .insert_header(fx.bearer(&bob))
        .to_request();
    let list: Vec<ConversationSummary> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].unread_count, 3);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/messages/{}/read", sent[0].id))
        .insert_header(fx.bearer(&bob))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let read_uri = format!("/api/v1/conversations/{}/read", conversation.id);
    let req = test::TestRequest::post()
        .uri(&read_uri)
        .insert_header(fx.bearer(&bob))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["marked"], 2);

    let req = test::TestRequest::post()
        .uri(&read_uri)
        .insert_header(fx.bearer(&bob))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["marked"], 0);

    let delete_uri = format!("/api/v1/messages/{}", sent[2].id);
    let req = test::TestRequest::delete()
        .uri(&delete_uri)
        .insert_header(fx.bearer(&bob))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::delete()
        .uri(&delete_uri)
        .insert_header(fx.bearer(&alice))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let req = test::TestRequest::get()
        .uri(&messages_uri)
        .insert_header(fx.bearer(&alice))
        .to_request();
    let page: Vec<Message> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(page.len(), 2);
    assert!(page.iter().all(|m| m.id != sent[2].id));
}

#[actix_rt::test]
async fn non_participants_cannot_read_a_conversation() {
    let fx = Fixture::new();
    let alice = fx.user("alice").await;
    let bob = fx.user("bob").await;
    let mallory = fx.user("mallory").await;
    let conversation = fx.store.create_group(&[alice.id, bob.id]).await.unwrap();
    let app = app!(fx);

    for uri in [
        format!("/api/v1/conversations/{}", conversation.id),
        format!("/api/v1/conversations/{}/messages", conversation.id),
    ] {
        let req = test::TestRequest::get()
            .uri(&uri)
            .insert_header(fx.bearer(&mallory))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "NOT_CONVERSATION_MEMBER");
    }

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/conversations/{}", Uuid::new_v4()))
        .insert_header(fx.bearer(&alice))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
