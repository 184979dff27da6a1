use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::time::{Duration, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::*;
use crate::destination::BoardId;
use crate::frame::{HEADER_AUTHORIZATION, HEADER_RETRYABLE, HEADER_SESSION, HEADER_USER_NAME};
use crate::state::test_helpers::{
    TestApp, drain, grant, identity, recv_body, recv_frame, test_app, token_for, watch_board,
};

fn text(frame: &Frame) -> String {
    serde_json::to_string(frame).unwrap()
}

fn connect_frame(token: Option<&str>) -> Frame {
    let frame = Frame::new(Command::Connect);
    match token {
        Some(t) => frame.with_header(HEADER_AUTHORIZATION, format!("Bearer {t}")),
        None => frame,
    }
}

fn subscribe_frame(id: &str, destination: &str) -> Frame {
    Frame::new(Command::Subscribe).with_id(id).with_destination(destination)
}

fn send_frame_to(destination: &str) -> Frame {
    Frame::new(Command::Send).with_destination(destination)
}

struct Conn {
    ctx: ConnectionContext,
    tx: mpsc::Sender<Frame>,
    rx: mpsc::Receiver<Frame>,
}

impl Conn {
    fn new(session_id: &str) -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self { ctx: ConnectionContext::new(session_id), tx, rx }
    }

    async fn send(&self, app: &TestApp, frame: &Frame) -> Dispatch {
        process_inbound_text(&app.state, &self.ctx, &self.tx, &text(frame)).await
    }
}

fn only_error(dispatch: &Dispatch) -> &Frame {
    assert_eq!(dispatch.replies.len(), 1, "expected exactly one reply");
    let frame = &dispatch.replies[0];
    assert_eq!(frame.command, Command::Error);
    frame
}

// =============================================================================
// FRAME HANDLING
// =============================================================================

#[tokio::test]
async fn frames_before_connect_are_refused() {
    let app = test_app();
    let conn = Conn::new("s1");
    let dispatch = conn.send(&app, &subscribe_frame("a", "/topic/board/1")).await;
    assert_eq!(only_error(&dispatch).header(HEADER_MESSAGE), Some("CONNECT required"));
    assert!(!dispatch.close);
}

#[tokio::test]
async fn invalid_json_gets_error_frame() {
    let app = test_app();
    let conn = Conn::new("s1");
    let dispatch = process_inbound_text(&app.state, &conn.ctx, &conn.tx, "{not json").await;
    only_error(&dispatch);
}

#[tokio::test]
async fn authenticated_connect_binds_identity() {
    let app = test_app();
    let conn = Conn::new("s1");
    let dispatch = conn.send(&app, &connect_frame(Some(&token_for(&identity("alice"))))).await;

    let reply = &dispatch.replies[0];
    assert_eq!(reply.command, Command::Connected);
    assert_eq!(reply.header(HEADER_SESSION), Some("s1"));
    assert_eq!(reply.header(HEADER_USER_NAME), Some("alice"));
    assert_eq!(app.state.registry.resolve_user("s1").await.unwrap().as_deref(), Some("alice"));
}

#[tokio::test]
async fn bad_token_connects_anonymously() {
    let app = test_app();
    let conn = Conn::new("s1");
    let dispatch = conn.send(&app, &connect_frame(Some("forged"))).await;
    let reply = &dispatch.replies[0];
    assert_eq!(reply.command, Command::Connected);
    assert_eq!(reply.header(HEADER_USER_NAME), None);
    assert!(conn.ctx.is_connected());
    assert!(conn.ctx.identity().is_none());

    let denied = conn.send(&app, &subscribe_frame("a", "/topic/board/1")).await;
    assert_eq!(only_error(&denied).header(HEADER_CODE), Some("E_ACCESS_DENIED"));

    let private = conn.send(&app, &subscribe_frame("b", "/user/queue/errors")).await;
    assert_eq!(only_error(&private).header(HEADER_CODE), Some("E_AUTH_REQUIRED"));
}

#[tokio::test]
async fn second_connect_cannot_rebind() {
    let app = test_app();
    let conn = Conn::new("s1");
    conn.send(&app, &connect_frame(None)).await;
    let dispatch = conn.send(&app, &connect_frame(Some(&token_for(&identity("alice"))))).await;
    only_error(&dispatch);
    assert!(conn.ctx.identity().is_none());
}

#[tokio::test]
async fn unauthorized_board_subscription_is_rejected() {
    let app = test_app();
    let conn = Conn::new("s1");
    conn.send(&app, &connect_frame(Some(&token_for(&identity("alice"))))).await;

    let dispatch = conn.send(&app, &subscribe_frame("sub-7", "/topic/board/7")).await;
    let err = only_error(&dispatch);
    assert_eq!(err.header(HEADER_CODE), Some("E_ACCESS_DENIED"));
    assert_eq!(err.id.as_deref(), Some("sub-7"));
    assert!(!dispatch.close);
    assert!(!app.state.broker.is_subscribed("s1", "sub-7").await);
    assert!(app.state.presence.active_users(BoardId(7)).await.unwrap().is_empty());
}

#[tokio::test]
async fn malformed_board_destination_is_access_denied() {
    let app = test_app();
    let conn = Conn::new("s1");
    conn.send(&app, &connect_frame(Some(&token_for(&identity("alice"))))).await;
    let dispatch = conn.send(&app, &subscribe_frame("x", "/topic/board/abc")).await;
    let err = only_error(&dispatch);
    assert_eq!(err.header(HEADER_CODE), Some("E_ACCESS_DENIED"));
    assert_eq!(err.header(HEADER_RETRYABLE), Some("false"));
}

#[tokio::test]
async fn authorized_subscription_receives_board_traffic() {
    let app = test_app();
    grant(&app, "alice", &[1]).await;
    let mut conn = Conn::new("s1");
    conn.send(&app, &connect_frame(Some(&token_for(&identity("alice"))))).await;
    let dispatch = conn.send(&app, &subscribe_frame("sub-1", "/topic/board/1")).await;
    assert!(dispatch.replies.is_empty());

    app.state.fanout.notify_board_updated(BoardId(1), "carol").await;
    let frame = recv_frame(&mut conn.rx).await;
    assert_eq!(frame.command, Command::Message);
    assert_eq!(frame.subscription.as_deref(), Some("sub-1"));
    assert_eq!(frame.body.unwrap()["type"], "BOARD_UPDATED");

    conn.send(&app, &Frame::new(Command::Unsubscribe).with_id("sub-1")).await;
    app.state.fanout.notify_board_updated(BoardId(1), "carol").await;
    assert!(drain(&mut conn.rx).is_empty());
}

#[tokio::test]
async fn join_over_send_confirms_on_private_queue() {
    let app = test_app();
    grant(&app, "alice", &[1]).await;
    let mut conn = Conn::new("s1");
    let mut board = watch_board(&app.state, "w", BoardId(1)).await;
    conn.send(&app, &connect_frame(Some(&token_for(&identity("alice"))))).await;
    conn.send(&app, &subscribe_frame("c", "/user/queue/confirmations")).await;

    let dispatch = conn.send(&app, &send_frame_to("/app/board/1/join")).await;
    assert!(dispatch.replies.is_empty());

    assert_eq!(recv_body(&mut board).await["type"], "USER_JOINED");
    let confirmation = recv_frame(&mut conn.rx).await;
    assert_eq!(confirmation.destination.as_deref(), Some("/user/queue/confirmations"));
    assert_eq!(confirmation.body.unwrap()["message"], "Connected to board 1. Active users: 1");
}

#[tokio::test]
async fn anonymous_join_gets_error_frame() {
    let app = test_app();
    let conn = Conn::new("s1");
    conn.send(&app, &connect_frame(None)).await;
    let dispatch = conn.send(&app, &send_frame_to("/app/board/1/join")).await;
    assert_eq!(only_error(&dispatch).header(HEADER_CODE), Some("E_AUTH_REQUIRED"));
}

#[tokio::test]
async fn unknown_app_destination_is_not_found() {
    let app = test_app();
    let conn = Conn::new("s1");
    conn.send(&app, &connect_frame(Some(&token_for(&identity("alice"))))).await;
    let dispatch = conn.send(&app, &send_frame_to("/app/board/1/dance")).await;
    assert_eq!(only_error(&dispatch).header(HEADER_CODE), Some("E_NOT_FOUND"));
}

#[tokio::test]
async fn disconnect_frame_closes() {
    let app = test_app();
    let conn = Conn::new("s1");
    conn.send(&app, &connect_frame(None)).await;
    let dispatch = conn.send(&app, &Frame::new(Command::Disconnect)).await;
    assert!(dispatch.close);
    assert!(dispatch.replies.is_empty());
}

// =============================================================================
// TRANSPORT
// =============================================================================

type Client = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn serve(app: &TestApp) -> String {
    let router = crate::routes::app(app.state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("ws://{addr}/api/ws")
}

async fn ws_send(client: &mut Client, frame: &Frame) {
    client.send(WsMessage::text(text(frame))).await.unwrap();
}

async fn ws_recv(client: &mut Client) -> Frame {
    loop {
        let msg = timeout(Duration::from_secs(2), client.next())
            .await
            .expect("ws receive timed out")
            .expect("ws stream ended")
            .expect("ws error");
        if let WsMessage::Text(body) = msg {
            return serde_json::from_str(body.as_str()).unwrap();
        }
    }
}

async fn ws_connect(url: &str, username: &str) -> Client {
    let (mut client, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws_send(&mut client, &connect_frame(Some(&token_for(&identity(username))))).await;
    let connected = ws_recv(&mut client).await;
    assert_eq!(connected.command, Command::Connected);
    client
}

async fn wait_for_subscribers(app: &TestApp, routing_key: &str, count: usize) {
    for _ in 0..100 {
        if app.state.broker.subscriber_count(routing_key).await >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("subscribers on {routing_key} never reached {count}");
}

fn body_of(frame: &Frame) -> &Value {
    frame.body.as_ref().expect("message body")
}

#[tokio::test]
async fn socket_close_announces_departure_to_peers() {
    let app = test_app();
    grant(&app, "alice", &[1]).await;
    grant(&app, "bob", &[1]).await;
    let url = serve(&app).await;

    let mut bob = ws_connect(&url, "bob").await;
    ws_send(&mut bob, &subscribe_frame("b-1", "/topic/board/1")).await;
    wait_for_subscribers(&app, "/topic/board/1", 1).await;

    let mut alice = ws_connect(&url, "alice").await;
    ws_send(&mut alice, &subscribe_frame("a-c", "/user/queue/confirmations")).await;
    ws_send(&mut alice, &send_frame_to("/app/board/1/join")).await;

    let confirmation = ws_recv(&mut alice).await;
    assert_eq!(confirmation.subscription.as_deref(), Some("a-c"));
    assert_eq!(body_of(&confirmation)["activeUsers"], 1);

    let joined = ws_recv(&mut bob).await;
    assert_eq!(joined.subscription.as_deref(), Some("b-1"));
    assert_eq!(body_of(&joined)["type"], "USER_JOINED");
    assert_eq!(body_of(&joined)["username"], "alice");

    alice.close(None).await.unwrap();

    let left = ws_recv(&mut bob).await;
    assert_eq!(body_of(&left)["type"], "USER_LEFT");
    assert_eq!(body_of(&left)["message"], "alice disconnected from the board");
    assert!(app.state.presence.active_users(BoardId(1)).await.unwrap().is_empty());
}

#[tokio::test]
async fn rejected_subscription_keeps_socket_open() {
    let app = test_app();
    let url = serve(&app).await;
    let mut client = ws_connect(&url, "mallory").await;

    ws_send(&mut client, &subscribe_frame("s", "/topic/board/7")).await;
    let err = ws_recv(&mut client).await;
    assert_eq!(err.command, Command::Error);
    assert_eq!(err.header(HEADER_CODE), Some("E_ACCESS_DENIED"));

    ws_send(&mut client, &send_frame_to("/app/board/7/join")).await;
    ws_send(&mut client, &connect_frame(None)).await;
    let again = ws_recv(&mut client).await;
    assert_eq!(again.header(HEADER_MESSAGE), Some("already connected"));
    assert!(app.state.presence.active_users(BoardId(7)).await.unwrap().is_empty());
}
