//! Stream connection and end-to-end chat session behaviour against a mock API.

use fitcoach::config::CoachConfig;
use fitcoach::controller::{
    CONNECTION_FAILED_MESSAGE, CREDENTIAL_UNAVAILABLE_MESSAGE, STREAM_DROPPED_MESSAGE,
};
use fitcoach::credentials::{CredentialBroker, MemoryStore};
use fitcoach::mode::StreamTarget;
use fitcoach::stream::{Classified, SessionConnection, StreamEvent, StreamUpdate};
use fitcoach::{ChatSession, CoachError, ConversationMode, Phase, SessionClient, SessionSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WAIT: Duration = Duration::from_secs(5);

fn config_for(server: &MockServer) -> CoachConfig {
    let mut config = CoachConfig::default();
    config.api.base_url = server.uri();
    config.api.request_timeout_secs = 5;
    config
}

fn signed_in() -> Arc<MemoryStore> {
    Arc::new(
        MemoryStore::new()
            .with_entry("user_id", "user-42")
            .with_entry("access_token", "tok"),
    )
}

fn sse(frames: &[&str], done: bool) -> ResponseTemplate {
    let mut body = String::new();
    for frame in frames {
        body.push_str(&format!("data: {frame}\n\n"));
    }
    if done {
        body.push_str("event: done\ndata: [DONE]\n\n");
    }
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

async fn mount_auth(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/auth/verify"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/ai/conversation/close"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

async fn mount_stream(server: &MockServer, stream_path: &str, template: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(stream_path))
        .respond_with(template)
        .mount(server)
        .await;
}

async fn hits(server: &MockServer, endpoint: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == endpoint)
        .count()
}

// ────────────────────────────────────────────────────────────────────────────
// Session connection
// ────────────────────────────────────────────────────────────────────────────

fn connection(server: &MockServer, store: Arc<MemoryStore>) -> SessionConnection {
    let config = config_for(server);
    let client = reqwest::Client::new();
    let broker = CredentialBroker::new(&config, store, client.clone()).expect("broker builds");
    SessionConnection::new(&config, Arc::new(broker), client).expect("connection builds")
}

fn target(input: &str) -> StreamTarget {
    StreamTarget {
        mode: ConversationMode::General,
        user_id: "user-42".into(),
        input: input.into(),
        meal: None,
    }
}

async fn collect(mut rx: mpsc::Receiver<StreamUpdate>) -> Vec<StreamUpdate> {
    let mut updates = Vec::new();
    while let Ok(Some(update)) = tokio::time::timeout(WAIT, rx.recv()).await {
        let last = matches!(update.event, StreamEvent::Terminal | StreamEvent::Failed(_));
        updates.push(update);
        if last {
            break;
        }
    }
    updates
}

#[tokio::test]
async fn stream_delivers_frames_then_terminal() {
    let server = MockServer::start().await;
    mount_auth(&server).await;
    Mock::given(method("GET"))
        .and(path("/ai/stream/general"))
        .and(query_param("user_id", "user-42"))
        .and(query_param("message", "2 eggs"))
        .and(header("accept", "text/event-stream"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(sse(&["Two", "eggs", "logged."], true))
        .expect(1)
        .mount(&server)
        .await;

    let (tx, rx) = mpsc::channel(64);
    let _handle = connection(&server, signed_in()).open(&target("2 eggs"), 7, tx);
    let updates = collect(rx).await;

    assert!(updates.iter().all(|u| u.generation == 7));
    assert!(matches!(updates[0].event, StreamEvent::Opened));
    let tokens: Vec<&str> = updates
        .iter()
        .filter_map(|u| match &u.event {
            StreamEvent::Frame(Classified::Token { text }) => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(tokens, vec!["Two", "eggs", "logged."]);
    assert!(matches!(
        updates.last().map(|u| &u.event),
        Some(StreamEvent::Terminal)
    ));
}

#[tokio::test]
async fn non_success_status_is_connection_failure() {
    let server = MockServer::start().await;
    mount_auth(&server).await;
    mount_stream(&server, "/ai/stream/general", ResponseTemplate::new(502)).await;

    let (tx, rx) = mpsc::channel(64);
    let _handle = connection(&server, signed_in()).open(&target("hi"), 1, tx);
    let updates = collect(rx).await;

    assert_eq!(updates.len(), 1);
    assert!(matches!(
        updates[0].event,
        StreamEvent::Failed(CoachError::ConnectionFailed(_))
    ));
}

#[tokio::test]
async fn eof_before_done_is_a_drop() {
    let server = MockServer::start().await;
    mount_auth(&server).await;
    mount_stream(&server, "/ai/stream/general", sse(&["one", "two"], false)).await;

    let (tx, rx) = mpsc::channel(64);
    let _handle = connection(&server, signed_in()).open(&target("hi"), 1, tx);
    let updates = collect(rx).await;

    assert!(matches!(
        updates.last().map(|u| &u.event),
        Some(StreamEvent::Failed(CoachError::StreamDropped(_)))
    ));
}

#[tokio::test]
async fn missing_credential_skips_the_stream_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ai/stream/general"))
        .respond_with(sse(&["never"], true))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new().with_entry("user_id", "user-42"));
    let (tx, rx) = mpsc::channel(64);
    let _handle = connection(&server, store).open(&target("hi"), 1, tx);
    let updates = collect(rx).await;

    assert_eq!(updates.len(), 1);
    assert!(matches!(
        updates[0].event,
        StreamEvent::Failed(CoachError::CredentialUnavailable(_))
    ));
}

#[tokio::test]
async fn closing_twice_is_harmless() {
    let server = MockServer::start().await;
    mount_auth(&server).await;
    mount_stream(
        &server,
        "/ai/stream/general",
        sse(&["slow"], true).set_delay(Duration::from_secs(2)),
    )
    .await;

    let (tx, mut rx) = mpsc::channel::<StreamUpdate>(64);
    let mut handle = connection(&server, signed_in()).open(&target("hi"), 1, tx);
    handle.close();
    handle.close();
    assert!(handle.is_closed());

    let next = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
    assert!(matches!(next, Ok(None) | Err(_)));
}

// ────────────────────────────────────────────────────────────────────────────
// Chat session end to end
// ────────────────────────────────────────────────────────────────────────────

fn start_session(server: &MockServer, store: Arc<MemoryStore>) -> SessionClient {
    let (client, _task) = ChatSession::spawn(&config_for(server), store).expect("session starts");
    client
}

async fn wait_until(
    client: &SessionClient,
    condition: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    let mut rx = client.watch();
    let result = tokio::time::timeout(WAIT, rx.wait_for(condition)).await;
    let snapshot = result
        .expect("timed out waiting for session state")
        .expect("session stopped")
        .clone();
    snapshot
}

fn settled(snapshot: &SessionSnapshot, messages: usize) -> bool {
    snapshot.phase == Phase::Idle && snapshot.messages.len() >= messages
}

#[tokio::test]
async fn text_turn_streams_into_transcript() {
    let server = MockServer::start().await;
    mount_auth(&server).await;
    mount_stream(&server, "/ai/stream/general", sse(&["Two", "eggs", "logged."], true)).await;

    let client = start_session(&server, signed_in());
    wait_until(&client, |s| s.messages.len() == 1).await;

    client.submit_text("2 eggs").await.expect("accepted");
    let snapshot = wait_until(&client, |s| settled(s, 3)).await;

    let user = &snapshot.messages[1];
    assert!(user.is_user && user.is_complete);
    assert_eq!(user.text, "2 eggs");

    let reply = &snapshot.messages[2];
    assert!(!reply.is_user && reply.is_complete && !reply.is_streaming);
    assert_eq!(reply.text, "Two eggs logged.");
    assert!(!snapshot.indicators.thinking && !snapshot.indicators.typing);
    assert!(snapshot.can_submit);
}

#[tokio::test]
async fn food_log_event_sets_reward_points() {
    let server = MockServer::start().await;
    mount_auth(&server).await;
    mount_stream(
        &server,
        "/ai/stream/general",
        sse(
            &[
                "Logging",
                r#"{"type":"food_log","status":"logged","reward_point":50,"message":"Meal logged!"}"#,
                "now",
            ],
            true,
        ),
    )
    .await;

    let client = start_session(&server, signed_in());
    wait_until(&client, |s| s.messages.len() == 1).await;
    client.submit_text("2 eggs").await.expect("accepted");
    let snapshot = wait_until(&client, |s| settled(s, 4)).await;

    assert_eq!(snapshot.reward_points, Some(50));
    let texts: Vec<&str> = snapshot.messages.iter().map(|m| m.text.as_str()).collect();
    assert!(texts.contains(&"Meal logged!"));
    assert!(texts.contains(&"Logging now"));
}

#[tokio::test]
async fn dropped_stream_keeps_partial_reply() {
    let server = MockServer::start().await;
    mount_auth(&server).await;
    mount_stream(&server, "/ai/stream/general", sse(&["one", "two", "three"], false)).await;

    let client = start_session(&server, signed_in());
    wait_until(&client, |s| s.messages.len() == 1).await;
    client.submit_text("plan").await.expect("accepted");
    let snapshot = wait_until(&client, |s| settled(s, 4)).await;

    let partial = &snapshot.messages[2];
    assert_eq!(partial.text, "one two three");
    assert!(partial.is_complete);
    let advisory = &snapshot.messages[3];
    assert!(advisory.is_error);
    assert_eq!(advisory.text, STREAM_DROPPED_MESSAGE);
}

#[tokio::test]
async fn rejected_credential_with_failed_refresh_shows_one_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/verify"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_stream(&server, "/ai/stream/general", sse(&["never"], true)).await;

    let client = start_session(&server, signed_in());
    wait_until(&client, |s| s.messages.len() == 1).await;
    client.submit_text("hi").await.expect("accepted");
    let snapshot = wait_until(&client, |s| settled(s, 3)).await;

    assert_eq!(snapshot.messages.len(), 3);
    let error = &snapshot.messages[2];
    assert!(error.is_error);
    assert_eq!(error.text, CREDENTIAL_UNAVAILABLE_MESSAGE);
    assert_eq!(hits(&server, "/auth/refresh").await, 1);
    assert_eq!(hits(&server, "/ai/stream/general").await, 0);
}

#[tokio::test]
async fn unreachable_stream_shows_connection_error() {
    let server = MockServer::start().await;
    mount_auth(&server).await;
    mount_stream(&server, "/ai/stream/general", ResponseTemplate::new(503)).await;

    let client = start_session(&server, signed_in());
    wait_until(&client, |s| s.messages.len() == 1).await;
    client.submit_text("hi").await.expect("accepted");
    let snapshot = wait_until(&client, |s| settled(s, 3)).await;
    assert_eq!(snapshot.messages[2].text, CONNECTION_FAILED_MESSAGE);
}

#[tokio::test]
async fn food_log_mode_blocks_until_meal_selected() {
    let server = MockServer::start().await;
    mount_auth(&server).await;
    Mock::given(method("GET"))
        .and(path("/ai/stream/food-log"))
        .and(query_param("meal", "Lunch"))
        .respond_with(sse(&["Logged."], true))
        .expect(1)
        .mount(&server)
        .await;

    let client = start_session(&server, signed_in());
    client
        .switch_mode(ConversationMode::FoodLog)
        .await
        .expect("switched");

    let snapshot = client.snapshot();
    assert_eq!(snapshot.mode, ConversationMode::FoodLog);
    assert!(snapshot.messages.is_empty());
    assert!(!snapshot.can_submit);
    assert!(hits(&server, "/ai/conversation/close").await >= 1);

    let err = client.submit_text("salad").await.expect_err("blocked");
    assert!(matches!(err, CoachError::SubmissionBlocked(_)));

    client
        .select_required_parameter("Lunch")
        .await
        .expect("selected");
    client.submit_text("salad").await.expect("accepted");
    let snapshot = wait_until(&client, |s| settled(s, 3)).await;
    assert_eq!(snapshot.messages[2].text, "Logged.");
}

#[tokio::test]
async fn shutdown_resets_conversation() {
    let server = MockServer::start().await;
    mount_auth(&server).await;

    let (client, task) =
        ChatSession::spawn(&config_for(&server), signed_in()).expect("session starts");
    client.shutdown().await.expect("shut down");
    tokio::time::timeout(WAIT, task)
        .await
        .expect("session exits")
        .expect("session task ok");

    assert_eq!(hits(&server, "/ai/conversation/close").await, 1);
    assert!(client.submit_text("hi").await.is_err());
}

#[tokio::test]
async fn mode_switch_mid_turn_replaces_the_live_stream() {
    let server = MockServer::start().await;
    mount_auth(&server).await;
    mount_stream(
        &server,
        "/ai/stream/general",
        sse(&["stale", "reply"], true).set_delay(Duration::from_secs(1)),
    )
    .await;
    mount_stream(&server, "/ai/stream/analysis", sse(&["Weekly", "summary."], true)).await;

    let client = start_session(&server, signed_in());
    wait_until(&client, |s| s.messages.len() == 1).await;
    client.submit_text("hi").await.expect("accepted");
    assert_eq!(client.snapshot().phase, Phase::Thinking);

    client
        .switch_mode(ConversationMode::Analysis)
        .await
        .expect("switched");
    let snapshot = wait_until(&client, |s| {
        s.mode == ConversationMode::Analysis
            && s.phase == Phase::Idle
            && s.messages.iter().any(|m| m.text == "Weekly summary.")
    })
    .await;
    assert!(hits(&server, "/ai/conversation/close").await >= 1);

    // Outlast the delayed general response; nothing from it may land.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let after = client.snapshot();
    assert_eq!(after.messages, snapshot.messages);
    assert_eq!(after.phase, Phase::Idle);
    assert!(!after.messages.iter().any(|m| m.text.contains("stale")));
}
