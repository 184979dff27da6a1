//! Destination naming shared with clients.
//!
//! Board topics are `/topic/board/<id>`. Private queues are subscribed as
//! `/user/queue/<name>` and resolved per user to `/user/<username>/queue/<name>`.
//! Application commands are sent to `/app/board/<id>/<action>`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const BOARD_TOPIC_PREFIX: &str = "/topic/board/";
pub const APP_BOARD_PREFIX: &str = "/app/board/";
pub const USER_PREFIX: &str = "/user/";

pub const QUEUE_CONFIRMATIONS: &str = "/queue/confirmations";
pub const QUEUE_ERRORS: &str = "/queue/errors";
pub const QUEUE_NOTIFICATIONS: &str = "/queue/notifications";

/// Numeric board identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoardId(pub u64);

impl fmt::Display for BoardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BoardId {
    type Err = DestinationError;

    /// Digits only: signs, whitespace and empty input are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DestinationError::MalformedBoardId(s.to_owned()));
        }
        s.parse::<u64>()
            .map(BoardId)
            .map_err(|_| DestinationError::MalformedBoardId(s.to_owned()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DestinationError {
    #[error("invalid board id: {0:?}")]
    MalformedBoardId(String),
    #[error("unknown application destination: {0}")]
    UnknownAction(String),
}

/// What a subscription destination refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    BoardTopic(BoardId),
    /// Private queue path (`/queue/<name>`), resolved against the subscriber.
    UserQueue(String),
    Other(String),
}

/// Classify a SUBSCRIBE destination.
///
/// # Errors
///
/// Returns `MalformedBoardId` when the destination is board-scoped but the
/// suffix is not a numeric id.
pub fn classify(destination: &str) -> Result<Destination, DestinationError> {
    if let Some(suffix) = destination.strip_prefix(BOARD_TOPIC_PREFIX) {
        return suffix.parse().map(Destination::BoardTopic);
    }
    if let Some(queue) = destination.strip_prefix("/user") {
        if queue.starts_with("/queue/") && queue.len() > "/queue/".len() {
            return Ok(Destination::UserQueue(queue.to_owned()));
        }
    }
    Ok(Destination::Other(destination.to_owned()))
}

#[must_use]
pub fn board_topic(board_id: BoardId) -> String {
    format!("{BOARD_TOPIC_PREFIX}{board_id}")
}

/// Resolved private destination for one user, e.g. `/user/alice/queue/errors`.
///
/// `%` and `/` in the username are percent-encoded, so no username can
/// collide with another user's queue path.
#[must_use]
pub fn user_destination(username: &str, queue: &str) -> String {
    let escaped = username.replace('%', "%25").replace('/', "%2F");
    format!("{USER_PREFIX}{escaped}{queue}")
}

/// Presence commands addressed to `/app/board/<id>/<action>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppAction {
    Join,
    Leave,
    Ping,
}

/// Parse a SEND destination into board id and action.
///
/// # Errors
///
/// `MalformedBoardId` for a non-numeric id, `UnknownAction` for anything
/// outside the board command namespace.
pub fn parse_app_destination(destination: &str) -> Result<(BoardId, AppAction), DestinationError> {
    let unknown = || DestinationError::UnknownAction(destination.to_owned());
    let rest = destination.strip_prefix(APP_BOARD_PREFIX).ok_or_else(unknown)?;
    let (id, action) = rest.split_once('/').ok_or_else(unknown)?;
    let board_id: BoardId = id.parse()?;
    let action = match action {
        "join" => AppAction::Join,
        "leave" => AppAction::Leave,
        "ping" => AppAction::Ping,
        _ => return Err(unknown()),
    };
    Ok((board_id, action))
}

#[cfg(test)]
#[path = "destination_test.rs"]
mod tests;
