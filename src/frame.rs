//! Control message exchanged over the realtime socket.
//!
//! ARCHITECTURE
//! ============
//! Every websocket text message is one JSON `Frame`, shaped after STOMP:
//! a command, a small string header map, an optional destination, an
//! optional subscription id, and an optional JSON body. Clients send
//! CONNECT / SUBSCRIBE / UNSUBSCRIBE / SEND / DISCONNECT; the server answers
//! with CONNECTED / MESSAGE / ERROR.
//!
//! DESIGN
//! ======
//! - Headers are flat strings, never nested.
//! - Error frames are built from typed errors through `ErrorCode`, so the
//!   client sees a grepable code and a message, never a stack trace.
//! - The socket driver routes on `command` and `destination` only; bodies
//!   are opaque to it.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// =============================================================================
// FIELD CONSTANTS
// =============================================================================

/// Header carrying the bearer credential on CONNECT.
pub const HEADER_AUTHORIZATION: &str = "Authorization";

/// Header carrying the transport-assigned session id on CONNECTED.
pub const HEADER_SESSION: &str = "session";

/// Header carrying the bound username on CONNECTED.
pub const HEADER_USER_NAME: &str = "user-name";

/// Header key for error messages.
pub const HEADER_MESSAGE: &str = "message";

/// Header key for grepable error codes.
pub const HEADER_CODE: &str = "code";

/// Header key for the retryable flag on error frames.
pub const HEADER_RETRYABLE: &str = "retryable";

// =============================================================================
// TYPES
// =============================================================================

/// Flat string headers. Alias to reduce noise in signatures.
pub type Headers = HashMap<String, String>;

/// Frame command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Command {
    Connect,
    Connected,
    Subscribe,
    Unsubscribe,
    Send,
    Message,
    Error,
    Disconnect,
}

/// The universal message type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub command: Command,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    /// Subscription id on SUBSCRIBE / UNSUBSCRIBE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Subscription the MESSAGE was delivered through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    /// Milliseconds since Unix epoch. Set automatically at construction.
    #[serde(default)]
    pub ts: i64,
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and retryable flag for structured error frames.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

impl Frame {
    /// Create a bare frame for the given command.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Headers::new(),
            destination: None,
            id: None,
            subscription: None,
            body: None,
            ts: now_ms(),
        }
    }

    /// CONNECTED reply for a freshly accepted connection.
    #[must_use]
    pub fn connected(session_id: &str, username: Option<&str>) -> Self {
        let frame = Self::new(Command::Connected).with_header(HEADER_SESSION, session_id);
        match username {
            Some(name) => frame.with_header(HEADER_USER_NAME, name),
            None => frame,
        }
    }

    /// MESSAGE frame delivered to one subscription.
    #[must_use]
    pub fn message(destination: impl Into<String>, subscription: impl Into<String>, body: serde_json::Value) -> Self {
        let mut frame = Self::new(Command::Message);
        frame.destination = Some(destination.into());
        frame.subscription = Some(subscription.into());
        frame.body = Some(body);
        frame
    }

    /// ERROR frame from a plain string.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Command::Error).with_header(HEADER_MESSAGE, message)
    }

    /// Structured ERROR frame from a typed error.
    #[must_use]
    pub fn error_from(err: &(impl ErrorCode + ?Sized)) -> Self {
        Self::new(Command::Error)
            .with_header(HEADER_CODE, err.error_code())
            .with_header(HEADER_MESSAGE, err.to_string())
            .with_header(HEADER_RETRYABLE, err.retryable().to_string())
    }
}

// =============================================================================
// BUILDERS
// =============================================================================

impl Frame {
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

// =============================================================================
// ACCESSORS
// =============================================================================

impl Frame {
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Bearer credential from the `Authorization` header, if well formed.
    ///
    /// Header lookup is case-insensitive on the key; the value must carry the
    /// `Bearer ` scheme and a non-empty token.
    #[must_use]
    pub fn bearer_token(&self) -> Option<&str> {
        let raw = self
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(HEADER_AUTHORIZATION))
            .map(|(_, v)| v.as_str())?;
        let token = raw.strip_prefix("Bearer ")?.trim();
        if token.is_empty() { None } else { Some(token) }
    }
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
