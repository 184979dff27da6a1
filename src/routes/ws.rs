//! WebSocket handler relaying control frames.
//!
//! DESIGN
//! ======
//! On upgrade, generates a session id and enters a `select!` loop:
//! - Incoming client frames → parse → authorizer / broker / presence
//! - Frames routed to this connection by the broker → forward to client
//!
//! Frame handling returns the frames meant for the sender; the loop owns
//! the socket. Board-wide and private traffic always goes through the
//! broker, never straight to the socket.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → wait for CONNECT
//! 2. CONNECT → authenticate, register via lifecycle bus → CONNECTED
//! 3. SUBSCRIBE / UNSUBSCRIBE / SEND until DISCONNECT or close
//! 4. Close → drop subscriptions → lifecycle disconnect cleanup

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::destination::parse_app_destination;
use crate::error::RealtimeError;
use crate::frame::{Command, Frame, HEADER_CODE, HEADER_MESSAGE};
use crate::services::authorizer::ConnectionContext;
use crate::services::lifecycle::LifecycleEvent;
use crate::state::AppState;

/// Per-connection outbound buffer; the broker drops frames past this.
const OUTBOUND_CAPACITY: usize = 256;

/// What frame handling hands back to the socket loop.
#[derive(Debug, Default)]
pub(crate) struct Dispatch {
    pub replies: Vec<Frame>,
    /// Close the connection after sending `replies`.
    pub close: bool,
}

impl Dispatch {
    fn none() -> Self {
        Self::default()
    }

    fn reply(frame: Frame) -> Self {
        Self { replies: vec![frame], close: false }
    }

    fn fatal(frame: Frame) -> Self {
        Self { replies: vec![frame], close: true }
    }
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let ctx = ConnectionContext::new(Uuid::new_v4().to_string());
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(OUTBOUND_CAPACITY);
    debug!(session_id = %ctx.session_id(), "ws: transport open");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let dispatch = process_inbound_text(&state, &ctx, &client_tx, text.as_str()).await;
                        if send_all(&mut socket, &dispatch.replies).await.is_err() || dispatch.close {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    let session_id = ctx.session_id();
    let dropped = state.broker.drop_session(session_id).await;
    let boards = if ctx.is_connected() { state.lifecycle.disconnect(session_id).await } else { 0 };
    info!(%session_id, subscriptions = dropped, boards, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame.
///
/// Socket transport concerns stay in `run_ws` so tests can drive frame
/// handling with a plain channel standing in for the connection.
pub(crate) async fn process_inbound_text(
    state: &AppState,
    ctx: &ConnectionContext,
    client_tx: &mpsc::Sender<Frame>,
    text: &str,
) -> Dispatch {
    let session_id = ctx.session_id();
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(%session_id, error = %e, "ws: invalid inbound frame");
            return Dispatch::reply(Frame::error(format!("invalid frame: {e}")));
        }
    };

    if frame.command != Command::Connect && !ctx.is_connected() {
        debug!(%session_id, command = ?frame.command, "ws: frame before CONNECT");
        return Dispatch::reply(Frame::error("CONNECT required"));
    }

    match frame.command {
        Command::Connect => handle_connect(state, ctx, &frame).await,
        Command::Subscribe => handle_subscribe(state, ctx, client_tx, &frame).await,
        Command::Unsubscribe => handle_unsubscribe(state, ctx, &frame).await,
        Command::Send => handle_send(state, ctx, &frame).await,
        Command::Disconnect => Dispatch { replies: Vec::new(), close: true },
        Command::Connected | Command::Message | Command::Error => {
            Dispatch::reply(Frame::error(format!("unexpected command: {:?}", frame.command)))
        }
    }
}

async fn handle_connect(state: &AppState, ctx: &ConnectionContext, frame: &Frame) -> Dispatch {
    let session_id = ctx.session_id();
    if ctx.is_connected() {
        warn!(%session_id, "ws: repeated CONNECT ignored");
        return Dispatch::reply(Frame::error("already connected"));
    }

    let identity = state.authorizer.authenticate(session_id, frame);
    if let Err(e) = state.lifecycle.connect(session_id, identity.clone()).await {
        error!(%session_id, error = %e, "ws: session registration failed");
        return Dispatch::fatal(Frame::error_from(&e));
    }
    ctx.bind(identity);

    let username = ctx.identity().map(|i| i.username.as_str());
    Dispatch::reply(Frame::connected(session_id, username))
}

async fn handle_subscribe(
    state: &AppState,
    ctx: &ConnectionContext,
    client_tx: &mpsc::Sender<Frame>,
    frame: &Frame,
) -> Dispatch {
    let session_id = ctx.session_id();
    let (Some(subscription_id), Some(destination)) = (frame.id.as_deref(), frame.destination.as_deref()) else {
        return Dispatch::reply(Frame::error("SUBSCRIBE requires id and destination"));
    };

    match state.authorizer.authorize_subscribe(session_id, ctx.identity(), destination).await {
        Ok(route) => {
            state
                .broker
                .subscribe(session_id, subscription_id, &route.routing_key, destination, client_tx.clone())
                .await;
            state.lifecycle.observe(LifecycleEvent::Subscribe {
                session_id: session_id.to_owned(),
                destination: destination.to_owned(),
            });
            Dispatch::none()
        }
        Err(e) => Dispatch::reply(Frame::error_from(&e).with_id(subscription_id)),
    }
}

async fn handle_unsubscribe(state: &AppState, ctx: &ConnectionContext, frame: &Frame) -> Dispatch {
    let session_id = ctx.session_id();
    let Some(subscription_id) = frame.id.as_deref() else {
        return Dispatch::reply(Frame::error("UNSUBSCRIBE requires id"));
    };
    if state.broker.unsubscribe(session_id, subscription_id).await.is_some() {
        state.lifecycle.observe(LifecycleEvent::Unsubscribe {
            session_id: session_id.to_owned(),
            subscription_id: subscription_id.to_owned(),
        });
    }
    Dispatch::none()
}

async fn handle_send(state: &AppState, ctx: &ConnectionContext, frame: &Frame) -> Dispatch {
    let session_id = ctx.session_id();
    let Some(destination) = frame.destination.as_deref() else {
        return Dispatch::reply(Frame::error("SEND requires destination"));
    };
    let (board_id, action) = match parse_app_destination(destination) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!(%session_id, %destination, error = %e, "ws: unroutable SEND");
            return Dispatch::reply(Frame::error_from(&RealtimeError::from(e)));
        }
    };
    match state.presence.handle(session_id, board_id, action, ctx.identity()).await {
        Ok(()) => Dispatch::none(),
        Err(e) => Dispatch::reply(Frame::error_from(&e)),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_all(socket: &mut WebSocket, frames: &[Frame]) -> Result<(), ()> {
    for frame in frames {
        send_frame(socket, frame).await?;
    }
    Ok(())
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.command == Command::Error {
        let code = frame.header(HEADER_CODE).unwrap_or("-");
        let message = frame.header(HEADER_MESSAGE).unwrap_or("-");
        warn!(code, message, "ws: send ERROR frame");
    } else {
        debug!(command = ?frame.command, destination = ?frame.destination, "ws: send frame");
    }
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
